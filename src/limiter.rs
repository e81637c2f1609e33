//! Crash-rate limiter.
//!
//! Remembers recent reports in `<root>/limiter.json` and refuses new ones
//! once a period holds too many overall, too many with the same stack-trace
//! hash, or too many of the same exception class.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::administrator::ReportingAdministrator;
use crate::config::ReporterConfig;
use crate::data::{CrashReportData, ReportField};
use crate::notify::Notifier;
use crate::startup::{StartupProcessor, StartupReport};
use crate::store::StoreError;

const LIMITER_FILE: &str = "limiter.json";
const LIMITER_VERSION_FILE: &str = "limiter_version";

/// What the limiter remembers about one accepted report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub stack_trace_hash: Option<String>,
    pub exception_class: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ReportMetadata {
    pub fn of(report: &CrashReportData, now: DateTime<Utc>) -> Self {
        Self {
            stack_trace_hash: report.get_str(ReportField::StackTraceHash).map(String::from),
            exception_class: report.get_str(ReportField::ExceptionClass).map(String::from),
            timestamp: now,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterData {
    pub reports: Vec<ReportMetadata>,
}

impl LimiterData {
    /// Reads the limiter file. A missing or corrupt file counts as empty.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Discarding corrupt limiter data");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn store(&self, path: &Path) -> Result<(), StoreError> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    pub fn purge_older_than(&mut self, cutoff: DateTime<Utc>) {
        self.reports.retain(|r| r.timestamp >= cutoff);
    }

    fn count_where(&self, pred: impl Fn(&ReportMetadata) -> bool) -> u32 {
        self.reports.iter().filter(|r| pred(r)).count() as u32
    }
}

/// [`ReportingAdministrator`] enforcing the limits in `config.limiter`.
pub struct LimitingAdministrator {
    path: PathBuf,
    lock: Mutex<()>,
    notifier: Arc<dyn Notifier>,
}

impl LimitingAdministrator {
    pub fn new(root: &Path, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            path: root.join(LIMITER_FILE),
            lock: Mutex::new(()),
            notifier,
        }
    }

    fn admit(&self, config: &ReporterConfig, report: &CrashReportData, now: DateTime<Utc>) -> bool {
        let limits = &config.limiter;
        let _guard = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut data = LimiterData::load(&self.path);
        let cutoff = i64::try_from(limits.period_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|period| now.checked_sub_signed(period))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        data.purge_older_than(cutoff);

        let meta = ReportMetadata::of(report, now);
        let overall = data.reports.len() as u32;
        let same_trace = match &meta.stack_trace_hash {
            Some(hash) => data.count_where(|r| r.stack_trace_hash.as_ref() == Some(hash)),
            None => 0,
        };
        let same_class = match &meta.exception_class {
            Some(class) => data.count_where(|r| r.exception_class.as_ref() == Some(class)),
            None => 0,
        };

        if overall >= limits.overall_limit {
            info!(overall, "Overall report limit reached");
            return false;
        }
        if same_trace >= limits.stacktrace_limit {
            info!(same_trace, "Report limit for this stack trace reached");
            return false;
        }
        if same_class >= limits.exception_class_limit {
            info!(same_class, "Report limit for this exception class reached");
            return false;
        }

        data.reports.push(meta);
        if let Err(e) = data.store(&self.path) {
            warn!(error = %e, "Could not update limiter data");
        }
        true
    }
}

impl ReportingAdministrator for LimitingAdministrator {
    fn name(&self) -> &str {
        "limiter"
    }

    fn should_send_report(&self, config: &ReporterConfig, report: &CrashReportData) -> bool {
        if !config.limiter.enabled {
            return true;
        }
        self.admit(config, report, Utc::now())
    }

    fn notify_report_dropped(&self, config: &ReporterConfig) {
        if !config.limiter.enabled {
            return;
        }
        if let Some(text) = &config.limiter.ignored_crash_toast {
            self.notifier.show_toast(text);
        }
    }
}

/// Clears limiter data after an application update.
pub struct LimiterStartupProcessor {
    root: PathBuf,
}

impl LimiterStartupProcessor {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl StartupProcessor for LimiterStartupProcessor {
    fn name(&self) -> &str {
        "limiter-reset"
    }

    fn process_reports(&self, config: &ReporterConfig, _reports: &mut [StartupReport]) {
        if !config.limiter.enabled || !config.limiter.reset_on_app_update {
            return;
        }
        let version_file = self.root.join(LIMITER_VERSION_FILE);
        let last = fs::read_to_string(&version_file).unwrap_or_default();
        if last.trim() == config.app_version {
            return;
        }

        debug!(from = last.trim(), to = %config.app_version, "Resetting limiter after update");
        let limiter_file = self.root.join(LIMITER_FILE);
        if limiter_file.exists() {
            if let Err(e) = fs::remove_file(&limiter_file) {
                warn!(error = %e, "Could not reset limiter data");
            }
        }
        if let Err(e) = fs::write(&version_file, &config.app_version) {
            warn!(error = %e, "Could not record limiter version");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigBuilder, LimiterConfig};

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<String>>);

    impl Notifier for RecordingNotifier {
        fn show_toast(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    fn config(limiter: LimiterConfig) -> ReporterConfig {
        ConfigBuilder::new("editor", "1.0.0").limiter(limiter).build().unwrap()
    }

    fn report(hash: &str, class: &str) -> CrashReportData {
        let mut data = CrashReportData::new();
        data.put(ReportField::StackTraceHash, hash);
        data.put(ReportField::ExceptionClass, class);
        data
    }

    fn enabled() -> LimiterConfig {
        LimiterConfig {
            enabled: true,
            overall_limit: 4,
            stacktrace_limit: 2,
            exception_class_limit: 3,
            ..LimiterConfig::default()
        }
    }

    #[test]
    fn disabled_limiter_admits_everything() {
        let dir = tempfile::tempdir().unwrap();
        let admin = LimitingAdministrator::new(dir.path(), Arc::new(RecordingNotifier::default()));
        let config = config(LimiterConfig::default());

        for _ in 0..50 {
            assert!(admin.should_send_report(&config, &report("h", "panic")));
        }
        assert!(!dir.path().join(LIMITER_FILE).exists());
    }

    #[test]
    fn limits_identical_stack_traces() {
        let dir = tempfile::tempdir().unwrap();
        let admin = LimitingAdministrator::new(dir.path(), Arc::new(RecordingNotifier::default()));
        let config = config(enabled());

        assert!(admin.should_send_report(&config, &report("h1", "panic")));
        assert!(admin.should_send_report(&config, &report("h1", "panic")));
        assert!(!admin.should_send_report(&config, &report("h1", "panic")));
        assert!(admin.should_send_report(&config, &report("h2", "io")));
    }

    #[test]
    fn limits_exception_classes_and_overall() {
        let dir = tempfile::tempdir().unwrap();
        let admin = LimitingAdministrator::new(dir.path(), Arc::new(RecordingNotifier::default()));
        let config = config(enabled());

        assert!(admin.should_send_report(&config, &report("a", "panic")));
        assert!(admin.should_send_report(&config, &report("b", "panic")));
        assert!(admin.should_send_report(&config, &report("c", "panic")));
        assert!(!admin.should_send_report(&config, &report("d", "panic")));
        assert!(admin.should_send_report(&config, &report("e", "io")));
        assert!(!admin.should_send_report(&config, &report("f", "parse")));
    }

    #[test]
    fn old_entries_fall_out_of_the_period() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LIMITER_FILE);
        let stale = LimiterData {
            reports: vec![
                ReportMetadata {
                    stack_trace_hash: Some("h".into()),
                    exception_class: Some("panic".into()),
                    timestamp: Utc::now() - Duration::days(30),
                };
                4
            ],
        };
        stale.store(&path).unwrap();
        let admin = LimitingAdministrator::new(dir.path(), Arc::new(RecordingNotifier::default()));

        assert!(admin.should_send_report(&config(enabled()), &report("h", "panic")));
        assert_eq!(LimiterData::load(&path).reports.len(), 1);
    }

    #[test]
    fn dropped_report_shows_toast() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let admin = LimitingAdministrator::new(dir.path(), notifier.clone());
        let config = config(LimiterConfig {
            ignored_crash_toast: Some("Too many crashes, report skipped".into()),
            ..enabled()
        });

        admin.notify_report_dropped(&config);

        assert_eq!(notifier.0.lock().unwrap().as_slice(), ["Too many crashes, report skipped"]);
    }

    #[test]
    fn corrupt_file_counts_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(LIMITER_FILE), "{not json").unwrap();

        assert!(LimiterData::load(&dir.path().join(LIMITER_FILE)).reports.is_empty());
    }

    #[test]
    fn startup_resets_after_update() {
        let dir = tempfile::tempdir().unwrap();
        LimiterData {
            reports: vec![ReportMetadata {
                stack_trace_hash: None,
                exception_class: None,
                timestamp: Utc::now(),
            }],
        }
        .store(&dir.path().join(LIMITER_FILE))
        .unwrap();
        fs::write(dir.path().join(LIMITER_VERSION_FILE), "0.9.0").unwrap();

        LimiterStartupProcessor::new(dir.path()).process_reports(&config(enabled()), &mut []);

        assert!(!dir.path().join(LIMITER_FILE).exists());
        assert_eq!(
            fs::read_to_string(dir.path().join(LIMITER_VERSION_FILE)).unwrap(),
            "1.0.0"
        );
    }
}
