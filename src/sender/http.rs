//! HTTP sender.
//!
//! POSTs the report JSON to the configured URI, or PUTs it to
//! `<uri>/<REPORT_ID>` so a retried upload overwrites instead of
//! duplicating. The `X-Report-Id` header carries the id either way.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::{is_retryable_status, ReportSender, ReportSenderFactory, SenderError};
use crate::compression::{maybe_gzip, GZIP_ENCODING};
use crate::config::{HttpMethod, HttpSenderConfig, ReporterConfig};
use crate::data::{CrashReportData, ReportField};
use crate::registry::PluginError;

pub const REPORT_ID_HEADER: &str = "X-Report-Id";

pub struct HttpSender {
    client: Client,
    config: HttpSenderConfig,
}

impl HttpSender {
    pub fn new(config: HttpSenderConfig) -> Result<Self, SenderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connection_timeout_ms))
            .timeout(Duration::from_millis(config.socket_timeout_ms))
            .build()
            .map_err(|e| SenderError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn target(&self, report_id: &str) -> String {
        match self.config.method {
            HttpMethod::Post => self.config.uri.clone(),
            HttpMethod::Put => format!(
                "{}/{}",
                self.config.uri.trim_end_matches('/'),
                urlencoding::encode(report_id)
            ),
        }
    }
}

#[async_trait]
impl ReportSender for HttpSender {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(&self, report: &CrashReportData) -> Result<(), SenderError> {
        let report_id = report
            .get_str(ReportField::ReportId)
            .ok_or_else(|| SenderError::Rejected("report has no REPORT_ID".into()))?;
        let url = self.target(report_id);

        let json = report
            .to_json()
            .map_err(|e| SenderError::Rejected(e.to_string()))?
            .into_bytes();
        let (body, compressed) = if self.config.compress {
            maybe_gzip(json, self.config.compress_threshold)?
        } else {
            (json, false)
        };

        let mut request = match self.config.method {
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
        }
        .header(CONTENT_TYPE, "application/json")
        .header(REPORT_ID_HEADER, report_id);
        if compressed {
            request = request.header(CONTENT_ENCODING, GZIP_ENCODING);
        }
        if let Some(login) = &self.config.basic_auth_login {
            request = request.basic_auth(login, self.config.basic_auth_password.as_ref());
        }
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!(url = %url, report_id, bytes = body.len(), compressed, "Sending report");
        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| SenderError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::CONFLICT {
            debug!(report_id, "Server already has this report");
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        warn!(report_id, status = status.as_u16(), "Server refused report");
        if is_retryable_status(status.as_u16()) {
            Err(SenderError::Status {
                status: status.as_u16(),
                message,
            })
        } else {
            Err(SenderError::Rejected(format!("{status}: {message}")))
        }
    }
}

/// Creates an [`HttpSender`] when `[http]` is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpSenderFactory;

impl ReportSenderFactory for HttpSenderFactory {
    fn name(&self) -> &str {
        "http"
    }

    fn enabled(&self, config: &ReporterConfig) -> bool {
        config.http.is_some()
    }

    fn create(&self, config: &ReporterConfig) -> Result<Arc<dyn ReportSender>, PluginError> {
        let http = config
            .http
            .clone()
            .ok_or_else(|| PluginError::Config("http sender has no [http] section".into()))?;
        let sender = HttpSender::new(http).map_err(|e| PluginError::Config(e.to_string()))?;
        Ok(Arc::new(sender))
    }
}
