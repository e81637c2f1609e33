//! User-facing surfaces.
//!
//! Rendering belongs to the host application. The library only says *what*
//! to show: a short toast, or a request for consent to send a report.
//! Implementations are responsible for marshalling onto their UI thread and
//! must return quickly.

use std::path::PathBuf;

use tracing::info;

use crate::config::{DialogConfig, NotificationConfig};

/// Shows short transient messages.
pub trait Notifier: Send + Sync {
    fn show_toast(&self, text: &str);
}

/// How the host should ask for consent.
#[derive(Debug, Clone)]
pub enum ConsentStyle {
    Dialog(DialogConfig),
    Notification(NotificationConfig),
}

/// A pending report that needs the user's approval.
///
/// The host answers with [`crate::CrashPost::approve_report`] or
/// [`crate::CrashPost::decline_report`], passing `report_file` back.
#[derive(Debug, Clone)]
pub struct ConsentRequest {
    pub report_file: PathBuf,
    pub style: ConsentStyle,
}

/// Asks the user whether a report may be sent.
pub trait ConsentPrompt: Send + Sync {
    fn request_consent(&self, request: ConsentRequest);
}

/// Notifier that writes toasts to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show_toast(&self, text: &str) {
        info!(text, "Toast");
    }
}

/// Consent prompt that only records the pending report in the log. The
/// report stays unapproved until the host approves it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPrompt;

impl ConsentPrompt for LoggingPrompt {
    fn request_consent(&self, request: ConsentRequest) {
        info!(
            report = %request.report_file.display(),
            "Report is waiting for user approval"
        );
    }
}
