//! Report executor: turns one [`ReportBuilder`] into a persisted report and,
//! depending on interactions, a scheduled send.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::administrator::ReportingAdministrator;
use crate::builder::ReportBuilder;
use crate::collector::CrashReportDataFactory;
use crate::config::ReporterConfig;
use crate::data::CrashReportData;
use crate::file_name::ReportFileName;
use crate::interaction::ReportInteractionExecutor;
use crate::notify::Notifier;
use crate::process::{ProcessControl, CRASH_EXIT_CODE};
use crate::registry::ReportPrimer;
use crate::scheduler::{SendTicket, SenderScheduler};
use crate::store::{Folder, ReportStore};

const DEBUGGER_TOAST: &str =
    "Warning: a debugger is attached, the application was not terminated after the crash.";

/// What the caller should do once the executor returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Nothing left to do.
    Continue,
    /// Hand the failure to the previously installed panic hook.
    DeferToDefaultHandler,
}

/// Result of one execution.
#[derive(Debug)]
pub struct Execution {
    pub disposition: Disposition,
    /// Where the report was written, if it was.
    pub report: Option<PathBuf>,
    pub send_scheduled: bool,
}

pub struct ReportExecutor {
    config: Arc<ReporterConfig>,
    store: Arc<ReportStore>,
    factory: CrashReportDataFactory,
    administrators: Vec<Arc<dyn ReportingAdministrator>>,
    interactions: Arc<ReportInteractionExecutor>,
    scheduler: Arc<dyn SenderScheduler>,
    process: Arc<dyn ProcessControl>,
    notifier: Arc<dyn Notifier>,
    primer: Option<Arc<dyn ReportPrimer>>,
    enabled: AtomicBool,
}

impl ReportExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ReporterConfig>,
        store: Arc<ReportStore>,
        factory: CrashReportDataFactory,
        administrators: Vec<Arc<dyn ReportingAdministrator>>,
        interactions: Arc<ReportInteractionExecutor>,
        scheduler: Arc<dyn SenderScheduler>,
        process: Arc<dyn ProcessControl>,
        notifier: Arc<dyn Notifier>,
        primer: Option<Arc<dyn ReportPrimer>>,
    ) -> Self {
        let enabled = AtomicBool::new(config.enabled);
        Self {
            config,
            store,
            factory,
            administrators,
            interactions,
            scheduler,
            process,
            notifier,
            primer,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn execute(&self, builder: ReportBuilder) -> Disposition {
        self.run(builder).disposition
    }

    /// Handles one report from collection to (possibly) process exit.
    pub fn run(&self, mut builder: ReportBuilder) -> Execution {
        let mut execution = Execution {
            disposition: Disposition::Continue,
            report: None,
            send_scheduled: false,
        };

        if !self.is_enabled() {
            info!("Crash reporting is disabled; report not collected");
            if builder.is_end_application() {
                execution.disposition = Disposition::DeferToDefaultHandler;
            }
            return execution;
        }

        if builder.get_crash_time().is_none() {
            builder = builder.at(Utc::now());
        }
        if let Some(primer) = &self.primer {
            primer.prime_report(&mut builder);
        }

        let data = self.collect(&builder);

        if builder.is_end_application() && self.all_agree(|a| a.should_finish_activity(&self.config, &builder)) {
            self.process.finish_last_activity(builder.get_thread_name());
        }

        let mut ticket = None;
        match &data {
            Some(report) => {
                if let Some((path, scheduled)) = self.persist_and_schedule(&builder, report) {
                    execution.report = Some(path);
                    execution.send_scheduled = scheduled.is_some();
                    ticket = scheduled;
                }
            }
            None => {
                debug!("Report dropped by an administrator");
                for administrator in &self.administrators {
                    administrator.notify_report_dropped(&self.config);
                }
            }
        }

        if builder.is_end_application()
            && self.all_agree(|a| a.should_kill_application(&self.config, &builder, data.as_ref()))
        {
            execution.disposition = self.end_application(ticket);
        }
        execution
    }

    fn collect(&self, builder: &ReportBuilder) -> Option<CrashReportData> {
        if !self.all_agree(|a| a.should_start_collecting(&self.config, builder)) {
            return None;
        }
        let report = self.factory.create(builder);
        if !self.all_agree(|a| a.should_send_report(&self.config, &report)) {
            return None;
        }
        Some(report)
    }

    /// Asks every administrator; one objection is enough.
    fn all_agree(&self, ask: impl Fn(&dyn ReportingAdministrator) -> bool) -> bool {
        let mut agreed = true;
        for administrator in &self.administrators {
            if !ask(administrator.as_ref()) {
                debug!(administrator = administrator.name(), "Administrator objected");
                agreed = false;
            }
        }
        agreed
    }

    fn persist_and_schedule(
        &self,
        builder: &ReportBuilder,
        report: &CrashReportData,
    ) -> Option<(PathBuf, Option<SendTicket>)> {
        let silent = builder.is_send_silently();
        let interactive = self.interactions.has_interactions();
        let folder = if silent || !interactive {
            Folder::Approved
        } else {
            Folder::Unapproved
        };
        let name = ReportFileName::new(builder.get_crash_time().unwrap_or_else(Utc::now), silent);

        let path = match self.store.write(folder, &name, report) {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Could not store report; dropping it");
                return None;
            }
        };

        if silent {
            return Some((path, self.schedule(interactive)));
        }
        if !interactive {
            return Some((path, self.schedule(false)));
        }
        if !self.interactions.perform_interactions(&path) {
            debug!(path = %path.display(), "Report waits for user approval");
            return Some((path, None));
        }
        match self.store.approve(&path) {
            Some(approved) => Some((approved, self.schedule(false))),
            None => Some((path, None)),
        }
    }

    fn schedule(&self, only_silent: bool) -> Option<SendTicket> {
        if !self.is_enabled() {
            warn!("Would send reports, but reporting is disabled");
            return None;
        }
        Some(self.scheduler.schedule_report_sending(only_silent))
    }

    fn end_application(&self, ticket: Option<SendTicket>) -> Disposition {
        if self.process.is_debugger_attached() {
            warn!("Debugger attached; the process is kept alive after the crash");
            self.notifier.show_toast(DEBUGGER_TOAST);
            return Disposition::Continue;
        }

        if let Some(ticket) = ticket {
            if ticket.wait(self.config.crash_send_grace()).is_none() {
                debug!("Sending did not finish within the grace period");
            }
        }

        if self.config.also_report_to_default_handler {
            return Disposition::DeferToDefaultHandler;
        }

        self.process.stop_services();
        self.process.finish_activities();
        info!(code = CRASH_EXIT_CODE, "Terminating after crash");
        self.process.terminate(CRASH_EXIT_CODE);
        Disposition::Continue
    }
}
