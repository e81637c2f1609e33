//! crashpost - crash reporting with local persistence, user consent and
//! resumable delivery.
//!
//! On a panic (or a manual trigger) a report is collected, written to a
//! report folder, optionally shown to the user for approval, and sent by
//! pluggable senders. Reports that could not be sent survive restarts and
//! are picked up again by the startup processors.
//!
//! # Example
//!
//! ```rust,no_run
//! use crashpost::{ConfigBuilder, CrashPost, PluginRegistry};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigBuilder::new("editor", "2.3.1")
//!         .http_uri("https://crashes.example.com/reports")
//!         .build()?;
//!     let plugins = PluginRegistry::with_defaults(&config);
//!
//!     let reporter = CrashPost::init(config, plugins)?;
//!     reporter.install_panic_hook();
//!     reporter.on_startup()?;
//!
//!     // application code...
//!     Ok(())
//! }
//! ```

pub mod administrator;
pub mod builder;
pub mod collector;
pub mod compression;
pub mod conductor;
pub mod config;
pub mod data;
pub mod executor;
pub mod file_name;
pub mod inbox;
pub mod interaction;
pub mod limiter;
pub mod logging;
pub mod notify;
pub mod process;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod sender;
pub mod startup;
pub mod store;

pub use builder::{ExceptionInfo, ReportBuilder};
pub use conductor::{Distribution, ReportDistributor, SendSummary, SendingConductor};
pub use config::{ConfigBuilder, ConfigError, InteractionMode, ReporterConfig, RetryPolicyKind};
pub use data::{CrashReportData, ReportField};
pub use executor::{Disposition, Execution, ReportExecutor};
pub use notify::{ConsentPrompt, ConsentRequest, ConsentStyle, Notifier};
pub use process::{ProcessControl, StdProcess, CRASH_EXIT_CODE};
pub use registry::{PluginError, PluginRegistry, ReportPrimer};
pub use retry::{FailedSender, RetryPolicy};
pub use scheduler::{SendTicket, SenderScheduler};
pub use sender::{ReportSender, ReportSenderFactory, SenderError};
pub use startup::{StartupProcessor, StartupReport, StartupSummary};
pub use store::{Folder, ReportStore, StoreError};

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{info, warn};

use collector::CrashReportDataFactory;
use interaction::ReportInteractionExecutor;
use scheduler::DefaultSenderScheduler;
use startup::StartupProcessorExecutor;

/// Set while a panic is being handled; a second panic in the meantime goes
/// straight to the previous hook.
static HANDLING_PANIC: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not open report folder: {0}")]
    Store(#[from] StoreError),
}

/// What the user typed into the consent dialog.
#[derive(Debug, Clone, Default)]
pub struct UserInput {
    pub comment: Option<String>,
    pub email: Option<String>,
}

/// A report approved by the user.
pub struct Approval {
    pub report: PathBuf,
    pub ticket: SendTicket,
}

/// The process-wide reporter. Create one with [`CrashPost::init`] and share
/// the returned `Arc`.
pub struct CrashPost {
    config: Arc<ReporterConfig>,
    store: Arc<ReportStore>,
    executor: ReportExecutor,
    startup: Arc<StartupProcessorExecutor>,
    scheduler: Arc<dyn SenderScheduler>,
    custom_data: Mutex<BTreeMap<String, String>>,
}

impl CrashPost {
    /// Validates the configuration, opens the report folders and wires the
    /// plugins together.
    pub fn init(config: ReporterConfig, plugins: PluginRegistry) -> Result<Arc<Self>, InitError> {
        let config = Arc::new(config.validated()?);
        let store = Arc::new(ReportStore::open(config.report_root())?);

        let retry_policy = plugins.retry_policy_for(&config);
        let conductor = Arc::new(SendingConductor::new(
            Arc::clone(&config),
            Arc::clone(&store),
            plugins.sender_factories,
            retry_policy,
            Arc::clone(&plugins.notifier),
        ));
        let scheduler: Arc<dyn SenderScheduler> = Arc::new(DefaultSenderScheduler::new(conductor));
        let interactions = Arc::new(ReportInteractionExecutor::new(
            Arc::clone(&config),
            plugins.interactions,
        ));

        let executor = ReportExecutor::new(
            Arc::clone(&config),
            Arc::clone(&store),
            CrashReportDataFactory::new(Arc::clone(&config), Arc::clone(&store), plugins.collectors),
            plugins.administrators,
            Arc::clone(&interactions),
            Arc::clone(&scheduler),
            plugins.process,
            plugins.notifier,
            plugins.primer,
        );
        let startup = Arc::new(StartupProcessorExecutor::new(
            Arc::clone(&config),
            Arc::clone(&store),
            plugins.startup_processors,
            interactions,
            Arc::clone(&scheduler),
        ));

        info!(
            root = %store.root().display(),
            interaction = ?config.interaction,
            enabled = config.enabled,
            "Crash reporting initialized"
        );
        Ok(Arc::new(Self {
            config,
            store,
            executor,
            startup,
            scheduler,
            custom_data: Mutex::new(BTreeMap::new()),
        }))
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    pub fn store(&self) -> &ReportStore {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.executor.is_enabled()
    }

    pub fn set_enabled(&self, enabled: bool) {
        info!(enabled, "Crash reporting toggled");
        self.executor.set_enabled(enabled);
    }

    /// Adds a key/value to every following report.
    pub fn put_custom_data(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock_custom_data().insert(key.into(), value.into());
    }

    pub fn remove_custom_data(&self, key: &str) -> Option<String> {
        self.lock_custom_data().remove(key)
    }

    fn lock_custom_data(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        match self.custom_data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Per-report entries win over global ones.
    fn with_custom_data(&self, mut builder: ReportBuilder) -> ReportBuilder {
        for (key, value) in self.lock_custom_data().iter() {
            if !builder.get_custom_data().contains_key(key) {
                builder.put_custom_data(key.clone(), value.clone());
            }
        }
        builder
    }

    /// Replaces the panic hook. The previous hook runs for panics that the
    /// reporter hands back and for panics raised while one is being handled.
    pub fn install_panic_hook(self: &Arc<Self>) {
        let reporter = Arc::clone(self);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if HANDLING_PANIC.swap(true, Ordering::SeqCst) {
                previous(info);
                return;
            }

            let thread = thread::current().name().unwrap_or("<unnamed>").to_string();
            let builder = ReportBuilder::new().panic(info).thread(thread).end_application();
            let disposition = reporter.on_crash(builder);

            HANDLING_PANIC.store(false, Ordering::SeqCst);
            if disposition == Disposition::DeferToDefaultHandler {
                previous(info);
            }
        }));
        info!("Panic hook installed");
    }

    /// Handles a crash on a dedicated thread and waits for it. A panic in
    /// the handler itself cannot abort the crashing thread this way.
    pub fn on_crash(self: &Arc<Self>, builder: ReportBuilder) -> Disposition {
        let builder = self.with_custom_data(builder);
        let reporter = Arc::clone(self);
        let worker = thread::Builder::new()
            .name("crashpost-crash".to_string())
            .spawn(move || reporter.executor.execute(builder));

        match worker {
            Ok(handle) => handle.join().unwrap_or_else(|_| {
                warn!("Crash handler panicked");
                Disposition::DeferToDefaultHandler
            }),
            Err(e) => {
                warn!(error = %e, "Could not start crash handler thread");
                Disposition::DeferToDefaultHandler
            }
        }
    }

    /// Reports something that did not crash the process.
    pub fn handle_report(&self, builder: ReportBuilder) -> Execution {
        self.executor.run(self.with_custom_data(builder))
    }

    /// Reports a handled error without asking the user.
    pub fn handle_silent_error<E: StdError + 'static>(&self, error: &E) -> Execution {
        self.handle_report(ReportBuilder::new().error(error).send_silently())
    }

    /// Processes reports left over from earlier runs in the background.
    pub fn on_startup(&self) -> io::Result<JoinHandle<StartupSummary>> {
        self.startup.process_reports(self.is_enabled())
    }

    /// Adds the user's comment and email to a pending report, approves it
    /// and schedules sending.
    pub fn approve_report(&self, path: &Path, input: UserInput) -> Result<Approval, StoreError> {
        let mut report = self.store.load(path)?;
        if let Some(comment) = input.comment.filter(|c| !c.trim().is_empty()) {
            report.put(ReportField::UserComment, comment);
        }
        if let Some(email) = input.email.filter(|e| !e.trim().is_empty()) {
            report.put(ReportField::UserEmail, email);
        }
        self.store.rewrite(path, &report)?;

        let approved = self.store.approve(path).ok_or_else(|| {
            StoreError::Io(io::Error::new(io::ErrorKind::NotFound, "report could not be approved"))
        })?;
        let ticket = if self.is_enabled() {
            self.scheduler.schedule_report_sending(false)
        } else {
            warn!("Report approved but reporting is disabled");
            SendTicket::detached()
        };
        Ok(Approval {
            report: approved,
            ticket,
        })
    }

    /// Discards a pending report.
    pub fn decline_report(&self, path: &Path) -> bool {
        info!(path = %path.display(), "User declined report");
        self.store.delete(path)
    }

    /// Sends whatever is waiting in the approved folder.
    pub fn send_pending(&self, only_silent: bool) -> SendTicket {
        if !self.is_enabled() {
            warn!("Reporting is disabled; nothing sent");
            return SendTicket::detached();
        }
        self.scheduler.schedule_report_sending(only_silent)
    }
}
