//! crashpost CLI - inspect and deliver stored crash reports
//!
//! Works on the report folders of an application (from its config file or
//! a plain directory) and runs the inbox server that receives reports.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use crashpost::{
    conductor::SendingConductor,
    file_name,
    inbox::{create_router, AppState, InboxStorage},
    interaction::ReportInteractionExecutor,
    logging,
    scheduler::{SendTicket, SenderScheduler},
    startup::StartupProcessorExecutor,
    CrashReportData, Folder, PluginRegistry, ReportField, ReportStore, ReporterConfig,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const DEFAULT_DB_PATH: &str = "crashpost.db";

#[derive(Parser)]
#[command(name = "crashpost")]
#[command(about = "Inspect, approve and send stored crash reports")]
struct Cli {
    /// Application config file (TOML)
    #[arg(short, long, env = "CRASHPOST_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Report directory; overrides the config's report_dir
    #[arg(short, long, env = "CRASHPOST_DIR", global = true)]
    dir: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "warn", global = true)]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored reports, oldest first
    List,

    /// Print one report
    Show {
        /// Report file
        file: PathBuf,
    },

    /// Approve a pending report for sending
    Approve {
        /// Report file in the unapproved folder
        file: PathBuf,

        /// Comment added as USER_COMMENT
        #[arg(long)]
        comment: Option<String>,

        /// Contact added as USER_EMAIL
        #[arg(long)]
        email: Option<String>,
    },

    /// Delete a pending report
    Decline {
        /// Report file
        file: PathBuf,
    },

    /// Send approved reports through the configured senders
    Send {
        /// Only send reports marked silent
        #[arg(long)]
        only_silent: bool,
    },

    /// Run the startup processors, then send what they approved
    Startup,

    /// Delete stored reports
    Purge {
        /// Which folder to empty
        #[arg(long, value_enum, default_value = "all")]
        folder: PurgeTarget,
    },

    /// Run the inbox server that receives reports
    Serve {
        /// Web server port
        #[arg(long, default_value = "3000")]
        port: u16,

        /// Database file path
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum PurgeTarget {
    Unapproved,
    Approved,
    All,
}

/// Remembers that sending was requested so the CLI can run it in-process.
#[derive(Default)]
struct DeferredScheduler {
    requested: AtomicBool,
}

impl SenderScheduler for DeferredScheduler {
    fn schedule_report_sending(&self, _only_silent: bool) -> SendTicket {
        self.requested.store(true, Ordering::SeqCst);
        SendTicket::detached()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(&cli.log);

    let config = Arc::new(load_config(cli.config.as_deref(), cli.dir)?);
    let open_store = || ReportStore::open(config.report_root()).map(Arc::new);

    match cli.command {
        Commands::List => list(&*open_store()?),
        Commands::Show { file } => show(&*open_store()?, &file)?,
        Commands::Approve {
            file,
            comment,
            email,
        } => approve(&*open_store()?, &file, comment, email)?,
        Commands::Decline { file } => {
            if open_store()?.delete(&file) {
                println!("{} Deleted {}", "✓".green(), file.display());
            } else {
                eprintln!("{} Could not delete {}", "error".red(), file.display());
            }
        }
        Commands::Send { only_silent } => {
            let store = open_store()?;
            send(config, store, only_silent).await
        }
        Commands::Startup => {
            let store = open_store()?;
            startup(config, store).await?
        }
        Commands::Purge { folder } => {
            let store = open_store()?;
            let folders: &[Folder] = match folder {
                PurgeTarget::Unapproved => &[Folder::Unapproved],
                PurgeTarget::Approved => &[Folder::Approved],
                PurgeTarget::All => &[Folder::Unapproved, Folder::Approved],
            };
            let deleted: usize = folders.iter().map(|f| store.purge(*f)).sum();
            println!("{} Deleted {} reports", "✓".green(), deleted);
        }
        Commands::Serve { port, db } => serve(port, &db).await?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>, dir: Option<PathBuf>) -> Result<ReporterConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => ReporterConfig::load(path)?,
        None => ReporterConfig::default(),
    };
    if dir.is_some() {
        config.report_dir = dir;
    }
    Ok(config)
}

fn list(store: &ReportStore) {
    println!("{}", "━".repeat(60).dimmed());
    println!("{} {}", "▸".green().bold(), store.root().display());
    println!("{}", "━".repeat(60).dimmed());

    for (label, folder) in [("Unapproved", Folder::Unapproved), ("Approved", Folder::Approved)] {
        let reports = store.list(folder);
        println!("{} ({})", label.cyan().bold(), reports.len());
        for path in reports {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let when = file_name::timestamp(name)
                .map(|ts: DateTime<Utc>| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "?".to_string());
            let silent = if file_name::is_silent(name) {
                " silent".dimmed().to_string()
            } else {
                String::new()
            };
            println!("  {} {}{}", when.yellow(), summary_line(store, &path).dimmed(), silent);
            println!("    {}", path.display());
        }
        println!();
    }
}

fn summary_line(store: &ReportStore, path: &Path) -> String {
    match store.load(path) {
        Ok(report) => first_line(&report),
        Err(e) => format!("unreadable: {e}"),
    }
}

fn first_line(report: &CrashReportData) -> String {
    report
        .get_str(ReportField::StackTrace)
        .and_then(|s| s.lines().next())
        .unwrap_or("No stack trace")
        .chars()
        .take(70)
        .collect()
}

fn show(store: &ReportStore, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let report = store.load(file)?;
    println!("{}", report.to_json_pretty()?);
    Ok(())
}

fn approve(
    store: &ReportStore,
    file: &Path,
    comment: Option<String>,
    email: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut report = store.load(file)?;
    if let Some(comment) = comment {
        report.put(ReportField::UserComment, comment);
    }
    if let Some(email) = email {
        report.put(ReportField::UserEmail, email);
    }
    store.rewrite(file, &report)?;

    match store.approve(file) {
        Some(path) => println!("{} Approved {}", "✓".green(), path.display()),
        None => eprintln!("{} Could not approve {}", "error".red(), file.display()),
    }
    Ok(())
}

fn conductor(config: &Arc<ReporterConfig>, store: &Arc<ReportStore>, plugins: PluginRegistry) -> SendingConductor {
    let retry_policy = plugins.retry_policy_for(config);
    SendingConductor::new(
        Arc::clone(config),
        Arc::clone(store),
        plugins.sender_factories,
        retry_policy,
        plugins.notifier,
    )
}

async fn send(config: Arc<ReporterConfig>, store: Arc<ReportStore>, only_silent: bool) {
    let conductor = conductor(&config, &store, PluginRegistry::with_defaults(&config));
    let summary = conductor.send_cycle(only_silent).await;

    println!(
        "{} {} attempted, {} delivered, {} kept for retry, {} dropped",
        "✓".green(),
        summary.attempted,
        summary.delivered.to_string().green(),
        summary.retained.to_string().yellow(),
        summary.dropped.to_string().red(),
    );
    let left = store.list_approved().len();
    if left > 0 {
        println!("  {} {} approved reports still waiting", "info".blue(), left);
    }
}

async fn startup(config: Arc<ReporterConfig>, store: Arc<ReportStore>) -> Result<(), Box<dyn std::error::Error>> {
    let plugins = PluginRegistry::with_defaults(&config);
    let scheduler = Arc::new(DeferredScheduler::default());
    let interactions = Arc::new(ReportInteractionExecutor::new(
        Arc::clone(&config),
        plugins.interactions,
    ));
    let executor = Arc::new(StartupProcessorExecutor::new(
        Arc::clone(&config),
        Arc::clone(&store),
        plugins.startup_processors,
        interactions,
        scheduler.clone(),
    ));

    let enabled = config.enabled;
    let summary = tokio::task::spawn_blocking(move || executor.run(enabled, Utc::now())).await?;
    println!(
        "{} {} deleted, {} approved, {} skipped",
        "✓".green(),
        summary.deleted,
        summary.approved,
        summary.skipped
    );

    if scheduler.requested.load(Ordering::SeqCst) {
        send(config, store, false).await;
    }
    Ok(())
}

async fn serve(port: u16, db_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let storage = InboxStorage::open(db_path)?;
    let state = AppState::new(storage);

    println!("{}", "━".repeat(60).dimmed());
    println!("{} crashpost inbox", "▸".green().bold());
    println!("{}", "━".repeat(60).dimmed());
    println!("  {} {}", "Database:".cyan(), db_path.display());
    println!("  {} http://localhost:{}/reports", "Reports:".cyan(), port);
    println!("  {} http://localhost:{}/api/reports", "API:".cyan(), port);
    println!("{}", "━".repeat(60).dimmed());
    println!();

    let router = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("{} Listening on http://localhost:{}", "✓".green(), port);

    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crashpost::file_name::ReportFileName;

    #[test]
    fn deferred_scheduler_records_request() {
        let scheduler = DeferredScheduler::default();
        assert!(!scheduler.requested.load(Ordering::SeqCst));

        scheduler.schedule_report_sending(false);

        assert!(scheduler.requested.load(Ordering::SeqCst));
    }

    #[test]
    fn first_line_truncates_stack_trace() {
        let mut report = CrashReportData::new();
        report.put(ReportField::StackTrace, format!("panic: {}\n   0: main", "x".repeat(100)));

        assert_eq!(first_line(&report).chars().count(), 70);
        assert_eq!(first_line(&CrashReportData::new()), "No stack trace");
    }

    #[test]
    fn dir_overrides_config() {
        let config = load_config(None, Some(PathBuf::from("/tmp/reports"))).unwrap();
        assert_eq!(config.report_root(), PathBuf::from("/tmp/reports"));
    }

    #[test]
    fn file_names_are_listed_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::open(dir.path()).unwrap();
        let name = ReportFileName::new(Utc::now(), true);
        store.write(Folder::Approved, &name, &CrashReportData::new()).unwrap();

        assert_eq!(store.list_approved().len(), 1);
        list(&store);
    }

    #[test]
    fn commands_work_on_shared_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReportStore::open(dir.path()).unwrap());
        let name = ReportFileName::new(Utc::now(), false);
        let pending = store.write(Folder::Unapproved, &name, &CrashReportData::new()).unwrap();

        show(&*store, &pending).unwrap();
        approve(&*store, &pending, Some("crashed on save".into()), None).unwrap();
        list(&*store);

        let approved = store.list_approved();
        assert_eq!(approved.len(), 1);
        let report = store.load(&approved[0]).unwrap();
        assert_eq!(report.get_str(ReportField::UserComment), Some("crashed on save"));
    }
}
