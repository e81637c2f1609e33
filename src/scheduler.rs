//! Background scheduling of sending runs.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::conductor::{SendSummary, SendingConductor};

/// Handle on a scheduled sending run.
pub struct SendTicket {
    done: Option<Receiver<SendSummary>>,
}

impl SendTicket {
    pub fn new(done: Receiver<SendSummary>) -> Self {
        Self { done: Some(done) }
    }

    /// A ticket for a run that was never started.
    pub fn detached() -> Self {
        Self { done: None }
    }

    /// Waits up to `timeout` for the run to finish.
    pub fn wait(self, timeout: Duration) -> Option<SendSummary> {
        self.done?.recv_timeout(timeout).ok()
    }
}

/// Starts sending runs.
pub trait SenderScheduler: Send + Sync {
    fn schedule_report_sending(&self, only_silent: bool) -> SendTicket;
}

/// Runs the background pass and then the foreground pass on a dedicated
/// thread that owns a single-threaded tokio runtime.
pub struct DefaultSenderScheduler {
    conductor: Arc<SendingConductor>,
}

impl DefaultSenderScheduler {
    pub fn new(conductor: Arc<SendingConductor>) -> Self {
        Self { conductor }
    }
}

impl SenderScheduler for DefaultSenderScheduler {
    fn schedule_report_sending(&self, only_silent: bool) -> SendTicket {
        let conductor = Arc::clone(&self.conductor);
        let (tx, rx) = mpsc::channel();

        let spawned = thread::Builder::new()
            .name("crashpost-sender".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        warn!(error = %e, "Could not start sender runtime");
                        return;
                    }
                };
                let summary = runtime.block_on(conductor.send_cycle(only_silent));
                // nobody may be waiting
                let _ = tx.send(summary);
            });

        match spawned {
            Ok(_) => {
                debug!(only_silent, "Scheduled sending run");
                SendTicket::new(rx)
            }
            Err(e) => {
                warn!(error = %e, "Could not start sender thread");
                SendTicket::detached()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReporterConfig;
    use crate::data::{CrashReportData, ReportField};
    use crate::file_name::ReportFileName;
    use crate::config::ConfigBuilder;
    use crate::notify::{Notifier, TracingNotifier};
    use crate::registry::PluginError;
    use crate::retry::DefaultRetryPolicy;
    use crate::sender::{ReportSender, ReportSenderFactory, SenderError};
    use crate::store::{Folder, ReportStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Fails in the background pass, succeeds in the foreground pass.
    struct ByPass {
        foreground: bool,
    }

    #[async_trait]
    impl ReportSender for ByPass {
        fn name(&self) -> &str {
            if self.foreground {
                "mail"
            } else {
                "http"
            }
        }

        async fn send(&self, _: &CrashReportData) -> Result<(), SenderError> {
            if self.foreground {
                Ok(())
            } else {
                Err(SenderError::Transport("offline".into()))
            }
        }

        fn requires_foreground(&self) -> bool {
            self.foreground
        }
    }

    struct ByPassFactory(bool);

    impl ReportSenderFactory for ByPassFactory {
        fn name(&self) -> &str {
            "by-pass"
        }

        fn create(&self, _: &ReporterConfig) -> Result<Arc<dyn ReportSender>, PluginError> {
            Ok(Arc::new(ByPass { foreground: self.0 }))
        }
    }

    #[derive(Default)]
    struct Toasts(Mutex<Vec<String>>);

    impl Notifier for Toasts {
        fn show_toast(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    #[test]
    fn scheduled_run_sends_approved_reports() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReportStore::open(dir.path()).unwrap());
        let mut report = CrashReportData::new();
        report.put(ReportField::ReportId, "r-1");
        let path = store
            .write(Folder::Approved, &ReportFileName::new(Utc::now(), true), &report)
            .unwrap();
        let conductor = Arc::new(SendingConductor::new(
            Arc::new(ReporterConfig::default()),
            store,
            vec![],
            Arc::new(DefaultRetryPolicy),
            Arc::new(TracingNotifier),
        ));

        let summary = DefaultSenderScheduler::new(conductor)
            .schedule_report_sending(false)
            .wait(Duration::from_secs(10))
            .unwrap();

        assert_eq!(summary.delivered, 1);
        assert!(!path.exists());
    }

    #[test]
    fn one_toast_when_foreground_pass_delivers_what_background_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReportStore::open(dir.path()).unwrap());
        let mut report = CrashReportData::new();
        report.put(ReportField::ReportId, "r-1");
        let path = store
            .write(Folder::Approved, &ReportFileName::new(Utc::now(), false), &report)
            .unwrap();
        let config = ConfigBuilder::new("editor", "1.0.0")
            .report_send_success_toast("sent")
            .report_send_failure_toast("not sent")
            .build()
            .unwrap();
        let toasts = Arc::new(Toasts::default());
        let conductor = Arc::new(SendingConductor::new(
            Arc::new(config),
            store,
            vec![Arc::new(ByPassFactory(false)), Arc::new(ByPassFactory(true))],
            Arc::new(DefaultRetryPolicy),
            toasts.clone(),
        ));

        let summary = DefaultSenderScheduler::new(conductor)
            .schedule_report_sending(false)
            .wait(Duration::from_secs(10))
            .unwrap();

        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.retained, 0);
        assert_eq!(toasts.0.lock().unwrap().as_slice(), ["sent"]);
        assert!(!path.exists());
    }

    #[test]
    fn detached_ticket_returns_nothing() {
        assert!(SendTicket::detached().wait(Duration::from_millis(1)).is_none());
    }
}
