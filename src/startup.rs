//! Startup processing of reports left over from earlier runs.
//!
//! Processors only set flags on [`StartupReport`]s; the executor applies
//! them afterwards, so processors cannot race each other on the files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use semver::Version;
use tracing::{debug, info, warn};

use crate::config::ReporterConfig;
use crate::file_name::{self, name_of};
use crate::interaction::ReportInteractionExecutor;
use crate::scheduler::SenderScheduler;
use crate::store::ReportStore;

const LAST_VERSION_FILE: &str = "last_version";

/// A report found at startup, with the decisions made about it.
#[derive(Debug, Clone)]
pub struct StartupReport {
    pub file: PathBuf,
    /// Whether it was found in the approved folder.
    pub approved: bool,
    delete: bool,
    approve: bool,
}

impl StartupReport {
    pub fn new(file: PathBuf, approved: bool) -> Self {
        Self {
            file,
            approved,
            delete: false,
            approve: false,
        }
    }

    pub fn delete(&mut self) {
        self.delete = true;
    }

    pub fn approve(&mut self) {
        self.approve = true;
    }

    pub fn marked_for_deletion(&self) -> bool {
        self.delete
    }

    pub fn marked_for_approval(&self) -> bool {
        self.approve
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        file_name::timestamp(name_of(&self.file))
    }
}

/// Inspects leftover reports at startup.
pub trait StartupProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Marks reports for deletion or approval. Must not touch the files.
    fn process_reports(&self, config: &ReporterConfig, reports: &mut [StartupReport]);
}

/// Keeps only the newest unapproved report and asks about it again.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnapprovedStartupProcessor;

impl StartupProcessor for UnapprovedStartupProcessor {
    fn name(&self) -> &str {
        "unapproved"
    }

    fn process_reports(&self, config: &ReporterConfig, reports: &mut [StartupReport]) {
        if !config.delete_unapproved_reports_on_application_start {
            return;
        }
        let mut unapproved: Vec<&mut StartupReport> =
            reports.iter_mut().filter(|r| !r.approved).collect();
        unapproved.sort_by_key(|r| r.timestamp());

        if let Some((newest, older)) = unapproved.split_last_mut() {
            newest.approve();
            for report in older {
                report.delete();
            }
        }
    }
}

/// Deletes every leftover report after the application was upgraded.
pub struct OldVersionStartupProcessor {
    version_file: PathBuf,
}

impl OldVersionStartupProcessor {
    pub fn new(root: &Path) -> Self {
        Self {
            version_file: root.join(LAST_VERSION_FILE),
        }
    }

    fn last_version(&self) -> Option<Version> {
        let raw = fs::read_to_string(&self.version_file).ok()?;
        match Version::parse(raw.trim()) {
            Ok(version) => Some(version),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable last version");
                None
            }
        }
    }
}

impl StartupProcessor for OldVersionStartupProcessor {
    fn name(&self) -> &str {
        "old-version"
    }

    fn process_reports(&self, config: &ReporterConfig, reports: &mut [StartupReport]) {
        if !config.delete_old_unsent_reports_on_application_start {
            return;
        }
        let Ok(current) = Version::parse(&config.app_version) else {
            return;
        };

        match self.last_version() {
            Some(last) if current <= last => return,
            Some(last) => {
                info!(%last, %current, count = reports.len(), "Application updated; dropping old reports");
                reports.iter_mut().for_each(StartupReport::delete);
            }
            None => debug!(%current, "Recording first seen version"),
        }

        if let Err(e) = fs::write(&self.version_file, current.to_string()) {
            warn!(error = %e, "Could not record application version");
        }
    }
}

/// What a startup run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupSummary {
    pub deleted: usize,
    pub approved: usize,
    /// Reports newer than the run itself, left for whoever is writing them.
    pub skipped: usize,
    pub send_scheduled: bool,
}

/// Applies startup processors and schedules sending of approved reports.
pub struct StartupProcessorExecutor {
    config: Arc<ReporterConfig>,
    store: Arc<ReportStore>,
    processors: Vec<Arc<dyn StartupProcessor>>,
    interactions: Arc<ReportInteractionExecutor>,
    scheduler: Arc<dyn SenderScheduler>,
}

impl StartupProcessorExecutor {
    pub fn new(
        config: Arc<ReporterConfig>,
        store: Arc<ReportStore>,
        processors: Vec<Arc<dyn StartupProcessor>>,
        interactions: Arc<ReportInteractionExecutor>,
        scheduler: Arc<dyn SenderScheduler>,
    ) -> Self {
        Self {
            config,
            store,
            processors,
            interactions,
            scheduler,
        }
    }

    /// Runs [`StartupProcessorExecutor::run`] on a background thread.
    pub fn process_reports(self: &Arc<Self>, enabled: bool) -> io::Result<JoinHandle<StartupSummary>> {
        let executor = Arc::clone(self);
        let now = Utc::now();
        thread::Builder::new()
            .name("crashpost-startup".to_string())
            .spawn(move || executor.run(enabled, now))
    }

    /// Processes leftovers. Reports stamped at or after `now` are skipped:
    /// they may belong to a crash being handled concurrently.
    pub fn run(&self, enabled: bool, now: DateTime<Utc>) -> StartupSummary {
        let mut reports: Vec<StartupReport> = self
            .store
            .list_unapproved()
            .into_iter()
            .map(|file| StartupReport::new(file, false))
            .chain(
                self.store
                    .list_approved()
                    .into_iter()
                    .map(|file| StartupReport::new(file, true)),
            )
            .collect();

        for processor in &self.processors {
            debug!(processor = processor.name(), "Running startup processor");
            processor.process_reports(&self.config, &mut reports);
        }

        let mut summary = StartupSummary::default();
        let mut send = false;
        for report in &reports {
            if report.timestamp().is_some_and(|ts| ts >= now) {
                summary.skipped += 1;
                continue;
            }

            if report.marked_for_deletion() {
                if self.store.delete(&report.file) {
                    summary.deleted += 1;
                }
            } else if report.approved {
                send = true;
            } else if report.marked_for_approval()
                && self.interactions.perform_interactions(&report.file)
                && self.store.approve(&report.file).is_some()
            {
                summary.approved += 1;
                send = true;
            }
        }

        if send && enabled {
            self.scheduler.schedule_report_sending(false);
            summary.send_scheduled = true;
        }
        info!(
            deleted = summary.deleted,
            approved = summary.approved,
            skipped = summary.skipped,
            send_scheduled = summary.send_scheduled,
            "Startup processing finished"
        );
        if send && !enabled {
            warn!("Approved reports are waiting but reporting is disabled");
        }
        summary
    }
}
