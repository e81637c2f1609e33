//! Veto hooks consulted by the report executor.

use crate::builder::ReportBuilder;
use crate::config::ReporterConfig;
use crate::data::CrashReportData;

/// Lets plugins veto individual steps of crash handling.
///
/// Every method defaults to "go ahead". One `false` from any registered
/// administrator is enough to skip the step.
pub trait ReportingAdministrator: Send + Sync {
    fn name(&self) -> &str;

    /// Called before any data is collected.
    fn should_start_collecting(&self, _config: &ReporterConfig, _builder: &ReportBuilder) -> bool {
        true
    }

    /// Called with the collected report, before it is persisted.
    fn should_send_report(&self, _config: &ReporterConfig, _report: &CrashReportData) -> bool {
        true
    }

    /// Called when a report was vetoed.
    fn notify_report_dropped(&self, _config: &ReporterConfig) {}

    fn should_finish_activity(&self, _config: &ReporterConfig, _builder: &ReportBuilder) -> bool {
        true
    }

    fn should_kill_application(
        &self,
        _config: &ReporterConfig,
        _builder: &ReportBuilder,
        _report: Option<&CrashReportData>,
    ) -> bool {
        true
    }
}
