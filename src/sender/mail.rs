//! Mail sender: opens the user's mail client with the report prefilled.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ReportSender, ReportSenderFactory, SenderError};
use crate::config::{MailSenderConfig, ReporterConfig};
use crate::data::{CrashReportData, ReportField};
use crate::registry::PluginError;

/// Opens URLs on the user's desktop.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), String>;
}

/// [`UrlOpener`] backed by the system's default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl UrlOpener for SystemOpener {
    fn open(&self, url: &str) -> Result<(), String> {
        webbrowser::open(url).map_err(|e| e.to_string())
    }
}

pub struct MailSender {
    config: MailSenderConfig,
    opener: Arc<dyn UrlOpener>,
}

impl MailSender {
    pub fn new(config: MailSenderConfig, opener: Arc<dyn UrlOpener>) -> Self {
        Self { config, opener }
    }

    /// Builds the `mailto:` URI for a report.
    pub fn mailto(&self, report: &CrashReportData) -> Result<String, SenderError> {
        let subject = match &self.config.subject {
            Some(subject) => subject.clone(),
            None => format!(
                "{} Crash Report",
                report.get_str(ReportField::PackageName).unwrap_or("Application")
            ),
        };
        let body = report
            .to_json_pretty()
            .map_err(|e| SenderError::Rejected(e.to_string()))?;
        Ok(format!(
            "mailto:{}?subject={}&body={}",
            self.config.mail_to,
            urlencoding::encode(&subject),
            urlencoding::encode(&body)
        ))
    }
}

#[async_trait]
impl ReportSender for MailSender {
    fn name(&self) -> &str {
        "mail"
    }

    async fn send(&self, report: &CrashReportData) -> Result<(), SenderError> {
        let uri = self.mailto(report)?;
        debug!(to = %self.config.mail_to, "Opening mail client");
        self.opener.open(&uri).map_err(SenderError::Transport)
    }

    fn requires_foreground(&self) -> bool {
        true
    }
}

/// Creates a [`MailSender`] when `[mail]` is configured.
pub struct MailSenderFactory {
    opener: Arc<dyn UrlOpener>,
}

impl MailSenderFactory {
    pub fn new(opener: Arc<dyn UrlOpener>) -> Self {
        Self { opener }
    }
}

impl Default for MailSenderFactory {
    fn default() -> Self {
        Self::new(Arc::new(SystemOpener))
    }
}

impl ReportSenderFactory for MailSenderFactory {
    fn name(&self) -> &str {
        "mail"
    }

    fn enabled(&self, config: &ReporterConfig) -> bool {
        config.mail.is_some()
    }

    fn create(&self, config: &ReporterConfig) -> Result<Arc<dyn ReportSender>, PluginError> {
        let mail = config
            .mail
            .clone()
            .ok_or_else(|| PluginError::Config("mail sender has no [mail] section".into()))?;
        Ok(Arc::new(MailSender::new(mail, Arc::clone(&self.opener))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingOpener(Mutex<Vec<String>>);

    impl UrlOpener for RecordingOpener {
        fn open(&self, url: &str) -> Result<(), String> {
            self.0.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    struct BrokenOpener;

    impl UrlOpener for BrokenOpener {
        fn open(&self, _url: &str) -> Result<(), String> {
            Err("no mail client".into())
        }
    }

    fn report() -> CrashReportData {
        let mut data = CrashReportData::new();
        data.put(ReportField::ReportId, "r-1");
        data.put(ReportField::PackageName, "editor");
        data
    }

    fn mail() -> MailSenderConfig {
        MailSenderConfig {
            mail_to: "crashes@example.com".into(),
            subject: None,
        }
    }

    #[tokio::test]
    async fn opens_mailto_with_encoded_report() {
        let opener = Arc::new(RecordingOpener::default());
        let sender = MailSender::new(mail(), opener.clone());

        sender.send(&report()).await.unwrap();

        let opened = opener.0.lock().unwrap();
        assert!(opened[0].starts_with("mailto:crashes@example.com?subject=editor%20Crash%20Report&body="));
        assert!(opened[0].contains("REPORT_ID"));
        assert!(!opened[0].contains(' '));
        assert!(sender.requires_foreground());
    }

    #[test]
    fn custom_subject_wins() {
        let sender = MailSender::new(
            MailSenderConfig {
                subject: Some("Bug".into()),
                ..mail()
            },
            Arc::new(RecordingOpener::default()),
        );
        assert!(sender.mailto(&report()).unwrap().contains("subject=Bug&"));
    }

    #[tokio::test]
    async fn opener_failure_is_transport_error() {
        let sender = MailSender::new(mail(), Arc::new(BrokenOpener));
        let err = sender.send(&report()).await.unwrap_err();
        assert!(matches!(err, SenderError::Transport(ref m) if m == "no mail client"));
    }
}
