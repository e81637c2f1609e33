//! Sending conductor and report distributor.
//!
//! One sending run walks the approved folder oldest-first and hands each
//! report to the [`ReportDistributor`], which pushes it through every sender
//! and then deletes or keeps the file. At most `max_reports_per_send`
//! reports are attempted per run; the rest wait for the next one.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ReporterConfig;
use crate::data::{CrashReportData, ReportField};
use crate::file_name::{self, name_of};
use crate::notify::Notifier;
use crate::retry::{FailedSender, RetryPolicy};
use crate::sender::{NullSender, ReportSender, ReportSenderFactory};
use crate::store::ReportStore;

/// What happened to one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// At least one sender took it; the file is gone.
    Delivered,
    /// Every sender failed and the retry policy kept it.
    Retained,
    /// Unreadable, suppressed, or given up on; the file is gone.
    Dropped,
}

/// Counts for one sending run; each report is counted once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendSummary {
    pub attempted: usize,
    pub delivered: usize,
    pub retained: usize,
    pub dropped: usize,
    /// Non-silent reports passed over because the run was silent-only.
    pub skipped: usize,
    pub any_non_silent: bool,
}

/// Sends one report through a fixed set of senders.
pub struct ReportDistributor {
    config: Arc<ReporterConfig>,
    store: Arc<ReportStore>,
    senders: Vec<Arc<dyn ReportSender>>,
    retry_policy: Arc<dyn RetryPolicy>,
}

impl ReportDistributor {
    pub fn new(
        config: Arc<ReporterConfig>,
        store: Arc<ReportStore>,
        senders: Vec<Arc<dyn ReportSender>>,
        retry_policy: Arc<dyn RetryPolicy>,
    ) -> Self {
        Self {
            config,
            store,
            senders,
            retry_policy,
        }
    }

    pub async fn distribute(&self, path: &Path) -> Distribution {
        let report = match self.store.load(path) {
            Ok(report) => report,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read report; deleting it");
                self.store.delete(path);
                return Distribution::Dropped;
            }
        };

        if self.config.suppresses_sending_in_dev_mode() {
            info!(path = %path.display(), "Sending disabled in dev mode; deleting report");
            self.store.delete(path);
            return Distribution::Dropped;
        }

        let failed = self.send(&report).await;
        if failed.len() < self.senders.len() {
            self.store.delete(path);
            return Distribution::Delivered;
        }

        if self.retry_policy.should_retry_send(&self.senders, &failed) {
            info!(path = %path.display(), failures = failed.len(), "Every sender failed; keeping report for retry");
            Distribution::Retained
        } else {
            let senders: Vec<&str> = failed.iter().map(|f| f.sender.as_str()).collect();
            warn!(path = %path.display(), ?senders, "Every sender failed; giving up on report");
            self.store.delete(path);
            Distribution::Dropped
        }
    }

    async fn send(&self, report: &CrashReportData) -> Vec<FailedSender> {
        let report_id = report.get_str(ReportField::ReportId).unwrap_or("unknown");
        let mut failed = Vec::new();
        for sender in &self.senders {
            match sender.send(report).await {
                Ok(()) => debug!(sender = sender.name(), report_id, "Report sent"),
                Err(error) => {
                    warn!(sender = sender.name(), report_id, error = %error, "Sender failed");
                    failed.push(FailedSender {
                        sender: sender.name().to_string(),
                        error,
                    });
                }
            }
        }
        failed
    }
}

/// Runs sending passes over the approved folder.
pub struct SendingConductor {
    config: Arc<ReporterConfig>,
    store: Arc<ReportStore>,
    factories: Vec<Arc<dyn ReportSenderFactory>>,
    retry_policy: Arc<dyn RetryPolicy>,
    notifier: Arc<dyn Notifier>,
}

impl SendingConductor {
    pub fn new(
        config: Arc<ReporterConfig>,
        store: Arc<ReportStore>,
        factories: Vec<Arc<dyn ReportSenderFactory>>,
        retry_policy: Arc<dyn RetryPolicy>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            factories,
            retry_policy,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<ReportStore> {
        &self.store
    }

    /// Senders taking part in a pass. Falls back to [`NullSender`] when no
    /// factory is enabled at all.
    pub fn sender_instances(&self, foreground: bool) -> Vec<Arc<dyn ReportSender>> {
        let enabled: Vec<_> = self
            .factories
            .iter()
            .filter(|factory| factory.enabled(&self.config))
            .collect();

        let senders: Vec<Arc<dyn ReportSender>> = if enabled.is_empty() {
            debug!("No sender configured; using the null sender");
            vec![Arc::new(NullSender)]
        } else {
            enabled
                .into_iter()
                .filter_map(|factory| match factory.create(&self.config) {
                    Ok(sender) => Some(sender),
                    Err(e) => {
                        warn!(factory = factory.name(), error = %e, "Could not create sender");
                        None
                    }
                })
                .collect()
        };

        senders
            .into_iter()
            .filter(|sender| sender.requires_foreground() == foreground)
            .collect()
    }

    /// A full sending cycle: the background pass, then the foreground pass,
    /// then at most one toast. A report kept by the first pass and taken by
    /// the second counts once, with its final outcome, and at most
    /// `max_reports_per_send` distinct reports are attempted.
    pub async fn send_cycle(&self, only_silent: bool) -> SendSummary {
        let mut outcomes = Outcomes::default();
        self.pass(false, only_silent, &mut outcomes).await;
        self.pass(true, only_silent, &mut outcomes).await;
        let summary = outcomes.summary();
        self.notify(&summary);
        summary
    }

    /// One pass over the approved folder with the senders matching
    /// `foreground`, followed by its toast. With `only_silent`, reports
    /// without the silent marker are left for a later run.
    pub async fn send_reports(&self, foreground: bool, only_silent: bool) -> SendSummary {
        let mut outcomes = Outcomes::default();
        self.pass(foreground, only_silent, &mut outcomes).await;
        let summary = outcomes.summary();
        self.notify(&summary);
        summary
    }

    /// Shows the success or failure toast when a non-silent report was
    /// processed.
    pub fn notify(&self, summary: &SendSummary) {
        if !summary.any_non_silent {
            return;
        }
        let toast = if summary.delivered > 0 {
            &self.config.report_send_success_toast
        } else {
            &self.config.report_send_failure_toast
        };
        if let Some(text) = toast {
            self.notifier.show_toast(text);
        }
    }

    async fn pass(&self, foreground: bool, only_silent: bool, outcomes: &mut Outcomes) {
        let senders = self.sender_instances(foreground);
        if senders.is_empty() {
            debug!(foreground, "No senders for this pass");
            return;
        }

        let distributor = ReportDistributor::new(
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            senders,
            Arc::clone(&self.retry_policy),
        );
        let cap = self.config.max_reports_per_send;
        let mut attempted = 0;

        for path in self.store.list_approved() {
            // the cap covers distinct reports across the passes of a cycle
            if !outcomes.reports.contains_key(&path) && outcomes.reports.len() >= cap {
                debug!(cap, "Report cap reached; leaving the rest for the next run");
                continue;
            }
            let silent = file_name::is_silent(name_of(&path));
            if only_silent && !silent {
                outcomes.skipped.insert(path);
                continue;
            }

            attempted += 1;
            let distribution = distributor.distribute(&path).await;
            outcomes.reports.insert(path, (silent, distribution));
        }

        info!(foreground, attempted, "Sending pass finished");
    }
}

/// Final outcome per report across the passes of one cycle.
#[derive(Default)]
struct Outcomes {
    reports: BTreeMap<PathBuf, (bool, Distribution)>,
    skipped: BTreeSet<PathBuf>,
}

impl Outcomes {
    fn summary(&self) -> SendSummary {
        let mut summary = SendSummary {
            attempted: self.reports.len(),
            skipped: self.skipped.len(),
            ..SendSummary::default()
        };
        for (silent, distribution) in self.reports.values() {
            summary.any_non_silent |= !silent;
            match distribution {
                Distribution::Delivered => summary.delivered += 1,
                Distribution::Retained => summary.retained += 1,
                Distribution::Dropped => summary.dropped += 1,
            }
        }
        info!(
            attempted = summary.attempted,
            delivered = summary.delivered,
            retained = summary.retained,
            dropped = summary.dropped,
            "Sending run finished"
        );
        summary
    }
}
