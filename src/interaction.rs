//! User interactions run before a report is sent.
//!
//! Each [`ReportInteraction`] runs on its own thread. The executor joins
//! them through a channel with one deadline for all of them; a hook that
//! answers `false`, panics or misses the deadline keeps the report in the
//! unapproved folder.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::{InteractionMode, ReporterConfig};
use crate::notify::{ConsentPrompt, ConsentRequest, ConsentStyle, Notifier};

/// A hook run when a report is about to be sent.
pub trait ReportInteraction: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `true` if the report may be sent right away.
    fn perform_interaction(&self, config: &ReporterConfig, report_file: &Path) -> bool;
}

/// Tells the user a report is being sent, then lets it go.
pub struct ToastInteraction {
    notifier: Arc<dyn Notifier>,
}

impl ToastInteraction {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl ReportInteraction for ToastInteraction {
    fn name(&self) -> &str {
        "toast"
    }

    fn perform_interaction(&self, config: &ReporterConfig, _report_file: &Path) -> bool {
        if let Some(text) = &config.toast.text {
            self.notifier.show_toast(text);
            // keep the process alive while the toast is visible
            thread::sleep(Duration::from_millis(config.toast.duration_ms));
        }
        true
    }
}

/// Hands the report to the host's consent UI. Sending waits for
/// [`crate::CrashPost::approve_report`].
pub struct ConsentInteraction {
    prompt: Arc<dyn ConsentPrompt>,
}

impl ConsentInteraction {
    pub fn new(prompt: Arc<dyn ConsentPrompt>) -> Self {
        Self { prompt }
    }
}

impl ReportInteraction for ConsentInteraction {
    fn name(&self) -> &str {
        "consent"
    }

    fn perform_interaction(&self, config: &ReporterConfig, report_file: &Path) -> bool {
        let style = match config.interaction {
            InteractionMode::Notification => ConsentStyle::Notification(config.notification.clone()),
            _ => ConsentStyle::Dialog(config.dialog.clone()),
        };
        self.prompt.request_consent(ConsentRequest {
            report_file: report_file.to_path_buf(),
            style,
        });
        false
    }
}

/// The interactions implied by an interaction mode.
pub fn interactions_for(
    mode: InteractionMode,
    notifier: &Arc<dyn Notifier>,
    prompt: &Arc<dyn ConsentPrompt>,
) -> Vec<Arc<dyn ReportInteraction>> {
    match mode {
        InteractionMode::Silent => Vec::new(),
        InteractionMode::Toast => vec![Arc::new(ToastInteraction::new(Arc::clone(notifier)))],
        InteractionMode::Notification | InteractionMode::Dialog => {
            vec![Arc::new(ConsentInteraction::new(Arc::clone(prompt)))]
        }
    }
}

/// Runs all registered interactions for one report.
pub struct ReportInteractionExecutor {
    config: Arc<ReporterConfig>,
    interactions: Vec<Arc<dyn ReportInteraction>>,
}

impl ReportInteractionExecutor {
    pub fn new(config: Arc<ReporterConfig>, interactions: Vec<Arc<dyn ReportInteraction>>) -> Self {
        Self {
            config,
            interactions,
        }
    }

    pub fn has_interactions(&self) -> bool {
        !self.interactions.is_empty()
    }

    /// Runs every interaction concurrently and waits for all of them, up to
    /// `interaction_timeout`. Returns `true` only if each one agreed to send
    /// now. With no interactions registered the answer is `true`.
    pub fn perform_interactions(&self, report_file: &Path) -> bool {
        if self.interactions.is_empty() {
            return true;
        }

        let (tx, rx) = mpsc::channel::<(String, bool)>();
        let mut send_now = true;
        let mut pending = 0usize;

        for interaction in &self.interactions {
            let interaction = Arc::clone(interaction);
            let name = interaction.name().to_string();
            let config = Arc::clone(&self.config);
            let file: PathBuf = report_file.to_path_buf();
            let tx = tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("crashpost-interaction-{name}"))
                .spawn({
                    let name = name.clone();
                    move || {
                        let result = interaction.perform_interaction(&config, &file);
                        // the receiver may have given up already
                        let _ = tx.send((name, result));
                    }
                });
            match spawned {
                Ok(_) => pending += 1,
                Err(e) => {
                    warn!(interaction = %name, error = %e, "Could not start interaction");
                    send_now = false;
                }
            }
        }
        drop(tx);

        let deadline = Instant::now() + self.config.interaction_timeout();
        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((name, result)) => {
                    pending -= 1;
                    debug!(interaction = %name, send_now = result, "Interaction finished");
                    send_now &= result;
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(pending, "Interactions did not finish in time; keeping report unapproved");
                    return false;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(pending, "Interaction ended without an answer; keeping report unapproved");
                    return false;
                }
            }
        }
        send_now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use std::sync::Mutex;

    struct Fixed(bool);

    impl ReportInteraction for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn perform_interaction(&self, _: &ReporterConfig, _: &Path) -> bool {
            self.0
        }
    }

    struct Slow;

    impl ReportInteraction for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn perform_interaction(&self, _: &ReporterConfig, _: &Path) -> bool {
            thread::sleep(Duration::from_secs(2));
            true
        }
    }

    struct Panicking;

    impl ReportInteraction for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn perform_interaction(&self, _: &ReporterConfig, _: &Path) -> bool {
            panic!("interaction failed");
        }
    }

    #[derive(Default)]
    struct RecordingPrompt(Mutex<Vec<ConsentRequest>>);

    impl ConsentPrompt for RecordingPrompt {
        fn request_consent(&self, request: ConsentRequest) {
            self.0.lock().unwrap().push(request);
        }
    }

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<String>>);

    impl Notifier for RecordingNotifier {
        fn show_toast(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    fn executor(timeout_ms: u64, interactions: Vec<Arc<dyn ReportInteraction>>) -> ReportInteractionExecutor {
        let config = ConfigBuilder::new("editor", "1.0.0")
            .interaction_timeout_ms(timeout_ms)
            .build()
            .unwrap();
        ReportInteractionExecutor::new(Arc::new(config), interactions)
    }

    #[test]
    fn no_interactions_means_send() {
        let executor = executor(1_000, vec![]);
        assert!(!executor.has_interactions());
        assert!(executor.perform_interactions(Path::new("r.stacktrace")));
    }

    #[test]
    fn all_true_means_send() {
        let executor = executor(1_000, vec![Arc::new(Fixed(true)), Arc::new(Fixed(true))]);
        assert!(executor.perform_interactions(Path::new("r.stacktrace")));
    }

    #[test]
    fn one_false_vetoes() {
        let executor = executor(1_000, vec![Arc::new(Fixed(true)), Arc::new(Fixed(false))]);
        assert!(!executor.perform_interactions(Path::new("r.stacktrace")));
    }

    #[test]
    fn timeout_vetoes() {
        let executor = executor(50, vec![Arc::new(Slow)]);
        let started = Instant::now();

        assert!(!executor.perform_interactions(Path::new("r.stacktrace")));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn panic_vetoes() {
        let executor = executor(1_000, vec![Arc::new(Panicking), Arc::new(Fixed(true))]);
        assert!(!executor.perform_interactions(Path::new("r.stacktrace")));
    }

    #[test]
    fn consent_posts_request_and_waits_for_user() {
        let prompt = Arc::new(RecordingPrompt::default());
        let config = ConfigBuilder::new("editor", "1.0.0")
            .interaction(InteractionMode::Dialog)
            .dialog_text("Send crash report?")
            .build()
            .unwrap();

        let answer = ConsentInteraction::new(prompt.clone())
            .perform_interaction(&config, Path::new("/reports/unapproved/a.stacktrace"));

        assert!(!answer);
        let requests = prompt.0.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(matches!(&requests[0].style, ConsentStyle::Dialog(d) if d.text.as_deref() == Some("Send crash report?")));
    }

    #[test]
    fn toast_shows_text_and_sends() {
        let notifier = Arc::new(RecordingNotifier::default());
        let config = ConfigBuilder::new("editor", "1.0.0")
            .interaction(InteractionMode::Toast)
            .toast_text("Sending crash report")
            .toast_duration_ms(0)
            .build()
            .unwrap();

        assert!(ToastInteraction::new(notifier.clone()).perform_interaction(&config, Path::new("a")));
        assert_eq!(notifier.0.lock().unwrap().as_slice(), ["Sending crash report"]);
    }

    #[test]
    fn silent_mode_registers_nothing() {
        let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());
        let prompt: Arc<dyn ConsentPrompt> = Arc::new(RecordingPrompt::default());

        assert!(interactions_for(InteractionMode::Silent, &notifier, &prompt).is_empty());
        assert_eq!(interactions_for(InteractionMode::Dialog, &notifier, &prompt).len(), 1);
    }
}
