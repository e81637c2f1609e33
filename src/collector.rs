//! Report collection.
//!
//! A [`Collector`] contributes fields to a report; the
//! [`CrashReportDataFactory`] runs every registered collector in order and
//! applies the configured `report_content` filter. A failing collector is
//! logged and skipped: a partial report beats no report.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::builder::ReportBuilder;
use crate::config::ReporterConfig;
use crate::data::{CrashReportData, ReportField};
use crate::store::{ReportStore, StoreError};

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collection failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Everything a collector may look at.
pub struct CollectContext<'a> {
    pub config: &'a ReporterConfig,
    pub builder: &'a ReportBuilder,
    pub store: &'a ReportStore,
    pub app_start: DateTime<Utc>,
    pub crash_time: DateTime<Utc>,
}

/// Contributes fields to a report.
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    fn collect(
        &self,
        ctx: &CollectContext<'_>,
        data: &mut CrashReportData,
    ) -> Result<(), CollectorError>;
}

/// Builds reports from builders.
pub struct CrashReportDataFactory {
    config: Arc<ReporterConfig>,
    store: Arc<ReportStore>,
    collectors: Vec<Arc<dyn Collector>>,
    app_start: DateTime<Utc>,
}

impl CrashReportDataFactory {
    pub fn new(
        config: Arc<ReporterConfig>,
        store: Arc<ReportStore>,
        collectors: Vec<Arc<dyn Collector>>,
    ) -> Self {
        Self {
            config,
            store,
            collectors,
            app_start: Utc::now(),
        }
    }

    /// Runs every collector and filters the result.
    pub fn create(&self, builder: &ReportBuilder) -> CrashReportData {
        let ctx = CollectContext {
            config: &self.config,
            builder,
            store: &self.store,
            app_start: self.app_start,
            crash_time: builder.get_crash_time().unwrap_or_else(Utc::now),
        };

        let mut data = CrashReportData::new();
        for collector in &self.collectors {
            match collector.collect(&ctx, &mut data) {
                Ok(()) => debug!(collector = collector.name(), "Collector finished"),
                Err(e) => warn!(collector = collector.name(), error = %e, "Collector failed"),
            }
        }
        data.retain_fields(&self.config.report_content);
        data
    }
}

/// The built-in collectors, in emission order.
pub fn default_collectors() -> Vec<Arc<dyn Collector>> {
    vec![
        Arc::new(BaseCollector),
        Arc::new(AppInfoCollector),
        Arc::new(SystemCollector),
        Arc::new(StacktraceCollector),
        Arc::new(CustomDataCollector),
    ]
}

/// Identity and timing: `REPORT_ID`, dates, `IS_SILENT`.
pub struct BaseCollector;

impl Collector for BaseCollector {
    fn name(&self) -> &str {
        "base"
    }

    fn collect(&self, ctx: &CollectContext<'_>, data: &mut CrashReportData) -> Result<(), CollectorError> {
        data.put(ReportField::ReportId, Uuid::new_v4().to_string());
        data.put(ReportField::UserAppStartDate, ctx.app_start.to_rfc3339());
        data.put(ReportField::UserCrashDate, ctx.crash_time.to_rfc3339());
        if ctx.builder.is_send_silently() {
            data.put(ReportField::IsSilent, true);
        }
        Ok(())
    }
}

/// `PACKAGE_NAME` and `APP_VERSION_NAME` from the configuration.
pub struct AppInfoCollector;

impl Collector for AppInfoCollector {
    fn name(&self) -> &str {
        "app-info"
    }

    fn collect(&self, ctx: &CollectContext<'_>, data: &mut CrashReportData) -> Result<(), CollectorError> {
        data.put(ReportField::PackageName, ctx.config.app_name.clone());
        data.put(ReportField::AppVersionName, ctx.config.app_version.clone());
        Ok(())
    }
}

/// Non-identifying operating system information.
/// Never includes hostname or username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    pub os: String,
    pub kernel: String,
    pub arch: String,
}

impl OsInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            kernel: read_kernel_version(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

fn read_kernel_version() -> String {
    std::fs::read_to_string("/proc/version")
        .ok()
        .and_then(|v| v.split_whitespace().nth(2).map(String::from))
        .unwrap_or_default()
}

/// `BUILD`, `BUILD_CONFIG` and `INSTALLATION_ID`.
pub struct SystemCollector;

impl Collector for SystemCollector {
    fn name(&self) -> &str {
        "system"
    }

    fn collect(&self, ctx: &CollectContext<'_>, data: &mut CrashReportData) -> Result<(), CollectorError> {
        let os = serde_json::to_value(OsInfo::collect())
            .map_err(|e| CollectorError::Failed(e.to_string()))?;
        data.put(ReportField::Build, os);
        data.put(
            ReportField::BuildConfig,
            if cfg!(debug_assertions) { "debug" } else { "release" },
        );
        data.put(ReportField::InstallationId, ctx.store.installation_id()?);
        Ok(())
    }
}

/// `STACK_TRACE`, `STACK_TRACE_HASH`, `EXCEPTION_CLASS`, `THREAD_DETAILS`.
pub struct StacktraceCollector;

impl Collector for StacktraceCollector {
    fn name(&self) -> &str {
        "stacktrace"
    }

    fn collect(&self, ctx: &CollectContext<'_>, data: &mut CrashReportData) -> Result<(), CollectorError> {
        let builder = ctx.builder;
        let thread = builder
            .get_thread_name()
            .map(String::from)
            .or_else(|| std::thread::current().name().map(String::from))
            .unwrap_or_else(|| "<unnamed>".to_string());
        data.put(ReportField::ThreadDetails, json!({ "name": thread }));

        let Some(exception) = builder.get_exception() else {
            let message = builder.get_message().unwrap_or_default();
            data.put(ReportField::StackTrace, message);
            data.put(ReportField::StackTraceHash, hash_parts(&[message]));
            return Ok(());
        };

        let mut trace = match &exception.location {
            Some(location) => format!("{}: {} at {}", exception.class, exception.message, location),
            None => format!("{}: {}", exception.class, exception.message),
        };
        if let Some(message) = builder.get_message() {
            trace = format!("{message}\n{trace}");
        }
        for cause in &exception.causes {
            trace.push_str("\nCaused by: ");
            trace.push_str(cause);
        }
        if let Some(backtrace) = &exception.backtrace {
            trace.push('\n');
            trace.push_str(backtrace);
        }

        data.put(ReportField::StackTrace, trace);
        data.put(ReportField::ExceptionClass, exception.class.clone());
        data.put(
            ReportField::StackTraceHash,
            stack_trace_hash(
                &exception.class,
                exception.location.as_deref(),
                &exception.message,
                exception.backtrace.as_deref(),
            ),
        );
        Ok(())
    }
}

/// Hash identifying "the same crash" across builds: line and column
/// numbers are left out so a recompile does not split a group. Covers the
/// class, the source file, the message and the backtrace frame symbols.
pub fn stack_trace_hash(
    class: &str,
    location: Option<&str>,
    message: &str,
    backtrace: Option<&str>,
) -> String {
    let file = location.map(|l| l.split(':').next().unwrap_or(l)).unwrap_or_default();
    let frames: Vec<&str> = backtrace
        .map(|bt| {
            bt.lines()
                .map(str::trim)
                .filter(|line| !line.starts_with("at "))
                .filter_map(|line| line.split_once(": ").map(|(_, symbol)| symbol))
                .collect()
        })
        .unwrap_or_default();

    let mut parts = vec![class, file, message];
    parts.retain(|p| !p.is_empty());
    parts.extend(frames);
    hash_parts(&parts)
}

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// `CUSTOM_DATA`: static config entries overlaid by per-report entries.
pub struct CustomDataCollector;

impl Collector for CustomDataCollector {
    fn name(&self) -> &str {
        "custom-data"
    }

    fn collect(&self, ctx: &CollectContext<'_>, data: &mut CrashReportData) -> Result<(), CollectorError> {
        let mut custom = Map::new();
        for (key, value) in ctx.config.custom_data.iter().chain(ctx.builder.get_custom_data()) {
            custom.insert(key.clone(), Value::String(value.clone()));
        }
        if !custom.is_empty() {
            data.put(ReportField::CustomData, Value::Object(custom));
        }
        Ok(())
    }
}
