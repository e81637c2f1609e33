//! Report senders.
//!
//! A [`ReportSender`] delivers one report to one destination. Senders are
//! built per sending run by their [`ReportSenderFactory`], so a factory can
//! decide from the configuration whether its sender takes part at all.

pub mod http;
pub mod mail;

pub use http::{HttpSender, HttpSenderFactory};
pub use mail::{MailSender, MailSenderFactory, SystemOpener, UrlOpener};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::compression::CompressionError;
use crate::config::ReporterConfig;
use crate::data::{CrashReportData, ReportField};
use crate::registry::PluginError;

/// Why a sender could not deliver a report.
#[derive(Debug, Error)]
pub enum SenderError {
    /// The destination could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The destination answered with a status that may succeed later.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The destination refused the report for good.
    #[error("report rejected: {0}")]
    Rejected(String),

    #[error("sender misconfigured: {0}")]
    Config(String),

    #[error(transparent)]
    Compression(#[from] CompressionError),
}

impl SenderError {
    /// True for failures worth another attempt in a later run.
    pub fn is_retryable(&self) -> bool {
        match self {
            SenderError::Transport(_) => true,
            SenderError::Status { status, .. } => is_retryable_status(*status),
            SenderError::Rejected(_) | SenderError::Config(_) | SenderError::Compression(_) => false,
        }
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

/// Delivers reports to one destination.
#[async_trait]
pub trait ReportSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, report: &CrashReportData) -> Result<(), SenderError>;

    /// Senders that need a user-visible surface (opening a mail client)
    /// only run in the foreground pass.
    fn requires_foreground(&self) -> bool {
        false
    }
}

/// Builds a sender from the configuration.
pub trait ReportSenderFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this factory's sender takes part for `config`.
    fn enabled(&self, _config: &ReporterConfig) -> bool {
        true
    }

    fn create(&self, config: &ReporterConfig) -> Result<Arc<dyn ReportSender>, PluginError>;
}

/// Used when no sender is configured: logs and succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSender;

#[async_trait]
impl ReportSender for NullSender {
    fn name(&self) -> &str {
        "null"
    }

    async fn send(&self, report: &CrashReportData) -> Result<(), SenderError> {
        info!(
            report_id = report.get_str(ReportField::ReportId).unwrap_or("unknown"),
            "No sender configured; report discarded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SenderError::Transport("reset".into()).is_retryable());
        for status in [408, 429, 500, 502, 503, 599] {
            assert!(
                SenderError::Status { status, message: String::new() }.is_retryable(),
                "{status} should be retryable"
            );
        }
        assert!(!SenderError::Status { status: 404, message: String::new() }.is_retryable());
        assert!(!SenderError::Rejected("400".into()).is_retryable());
        assert!(!SenderError::Config("no uri".into()).is_retryable());
    }

    #[tokio::test]
    async fn null_sender_succeeds() {
        let mut report = CrashReportData::new();
        report.put(ReportField::ReportId, "r-1");

        assert!(NullSender.send(&report).await.is_ok());
        assert!(!NullSender.requires_foreground());
    }
}
