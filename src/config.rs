//! Reporter configuration.
//!
//! One immutable [`ReporterConfig`] is built at process start, validated, and
//! shared read-only (`Arc`) by every component. It is plain data: plugins
//! (senders, processors, interactions) are registered separately in
//! [`crate::registry::PluginRegistry`].
//!
//! The struct maps 1:1 to a TOML file:
//!
//! ```toml
//! app_name = "editor"
//! app_version = "2.3.1"
//! interaction = "dialog"
//!
//! [dialog]
//! text = "The editor crashed. Send a report?"
//!
//! [http]
//! uri = "https://crashes.example.com/reports"
//! compress = true
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::ReportField;

/// How the user is involved before a report is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Send without telling the user.
    #[default]
    Silent,
    /// Send, and tell the user with a toast.
    Toast,
    /// Ask through a notification; send after approval.
    Notification,
    /// Ask through a blocking dialog; send after approval.
    Dialog,
}

/// Built-in retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicyKind {
    #[default]
    Default,
    Transient,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReporterConfig {
    /// Master switch. A disabled reporter collects nothing.
    pub enabled: bool,
    pub app_name: String,
    /// Semver version of the running application.
    pub app_version: String,
    /// Report root; defaults to `<data_local_dir>/<app_name>/crash-reports`.
    pub report_dir: Option<PathBuf>,
    pub interaction: InteractionMode,
    pub toast: ToastConfig,
    pub notification: NotificationConfig,
    pub dialog: DialogConfig,
    pub report_send_success_toast: Option<String>,
    pub report_send_failure_toast: Option<String>,
    /// Upper bound on reports attempted per sending run.
    pub max_reports_per_send: usize,
    pub retry_policy: RetryPolicyKind,
    pub delete_unapproved_reports_on_application_start: bool,
    pub delete_old_unsent_reports_on_application_start: bool,
    /// Hand the panic to the previously installed hook instead of
    /// terminating the process.
    pub also_report_to_default_handler: bool,
    /// When false, debug builds delete reports instead of sending them.
    pub send_reports_in_dev_mode: bool,
    /// Upper bound on the wait for interaction hooks.
    pub interaction_timeout_ms: u64,
    /// How long a crashing process waits for the send it scheduled.
    pub crash_send_grace_ms: u64,
    /// Well-known fields to collect.
    pub report_content: Vec<ReportField>,
    /// Static key/values added to every report's `CUSTOM_DATA`.
    pub custom_data: BTreeMap<String, String>,
    pub http: Option<HttpSenderConfig>,
    pub mail: Option<MailSenderConfig>,
    pub limiter: LimiterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToastConfig {
    pub text: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: Option<String>,
    pub text: Option<String>,
    pub channel_name: Option<String>,
    pub send_button: Option<String>,
    pub discard_button: Option<String>,
    pub comment_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogConfig {
    pub title: Option<String>,
    pub text: Option<String>,
    pub comment_prompt: Option<String>,
    pub email_prompt: Option<String>,
    pub positive_button: Option<String>,
    pub negative_button: Option<String>,
}

/// Settings of the HTTP sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSenderConfig {
    pub uri: String,
    pub method: HttpMethod,
    pub basic_auth_login: Option<String>,
    pub basic_auth_password: Option<String>,
    pub connection_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub compress: bool,
    /// Bodies at least this large are gzipped when `compress` is set.
    pub compress_threshold: usize,
    pub headers: BTreeMap<String, String>,
}

/// Settings of the mail sender.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSenderConfig {
    pub mail_to: String,
    pub subject: Option<String>,
}

/// Crash-rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    pub enabled: bool,
    pub period_secs: u64,
    pub overall_limit: u32,
    pub stacktrace_limit: u32,
    pub exception_class_limit: u32,
    pub reset_on_app_update: bool,
    pub ignored_crash_toast: Option<String>,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: "app".to_string(),
            app_version: "0.0.0".to_string(),
            report_dir: None,
            interaction: InteractionMode::Silent,
            toast: ToastConfig::default(),
            notification: NotificationConfig::default(),
            dialog: DialogConfig::default(),
            report_send_success_toast: None,
            report_send_failure_toast: None,
            max_reports_per_send: 5,
            retry_policy: RetryPolicyKind::Default,
            delete_unapproved_reports_on_application_start: true,
            delete_old_unsent_reports_on_application_start: true,
            also_report_to_default_handler: false,
            send_reports_in_dev_mode: true,
            interaction_timeout_ms: 30_000,
            crash_send_grace_ms: 3_000,
            report_content: ReportField::ALL.to_vec(),
            custom_data: BTreeMap::new(),
            http: None,
            mail: None,
            limiter: LimiterConfig::default(),
        }
    }
}

impl Default for ToastConfig {
    fn default() -> Self {
        Self {
            text: None,
            duration_ms: 3_500,
        }
    }
}

impl Default for HttpSenderConfig {
    fn default() -> Self {
        Self {
            uri: String::new(),
            method: HttpMethod::Post,
            basic_auth_login: None,
            basic_auth_password: None,
            connection_timeout_ms: 5_000,
            socket_timeout_ms: 20_000,
            compress: false,
            compress_threshold: crate::compression::DEFAULT_THRESHOLD,
            headers: BTreeMap::new(),
        }
    }
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period_secs: 7 * 24 * 60 * 60,
            overall_limit: 25,
            stacktrace_limit: 3,
            exception_class_limit: 10,
            reset_on_app_update: true,
            ignored_crash_toast: None,
        }
    }
}

impl ReporterConfig {
    /// Loads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ReporterConfig = toml::from_str(&content)?;
        config.validated()
    }

    /// Returns `self` if it passes [`ReporterConfig::validate`].
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Directory holding the report folders.
    pub fn report_root(&self) -> PathBuf {
        match &self.report_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from(".local/share"))
                .join(&self.app_name)
                .join("crash-reports"),
        }
    }

    pub fn interaction_timeout(&self) -> Duration {
        Duration::from_millis(self.interaction_timeout_ms)
    }

    pub fn crash_send_grace(&self) -> Duration {
        Duration::from_millis(self.crash_send_grace_ms)
    }

    /// True when this is a debug build that must not send.
    pub fn suppresses_sending_in_dev_mode(&self) -> bool {
        cfg!(debug_assertions) && !self.send_reports_in_dev_mode
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"dialog.text"`.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Configuration errors. Raised at initialization, never on the crash path.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {}", join_errors(.0))]
    Invalid(Vec<ValidationError>),

    #[error("could not read configuration: {0}")]
    Io(#[from] io::Error),

    #[error("could not parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

impl ReporterConfig {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.app_name.trim().is_empty() {
            errors.push(ValidationError::new("app_name", "must not be empty"));
        }
        if let Err(e) = semver::Version::parse(&self.app_version) {
            errors.push(ValidationError::new(
                "app_version",
                format!("'{}' is not a semantic version: {e}", self.app_version),
            ));
        }
        if self.max_reports_per_send == 0 {
            errors.push(ValidationError::new(
                "max_reports_per_send",
                "must be greater than 0",
            ));
        }

        // --- interaction mode requirements ---
        match self.interaction {
            InteractionMode::Silent => {}
            InteractionMode::Toast => {
                if is_blank(&self.toast.text) {
                    errors.push(ValidationError::new(
                        "toast.text",
                        "required when interaction = \"toast\"",
                    ));
                }
            }
            InteractionMode::Notification => {
                for (field, value) in [
                    ("notification.title", &self.notification.title),
                    ("notification.text", &self.notification.text),
                    ("notification.channel_name", &self.notification.channel_name),
                ] {
                    if is_blank(value) {
                        errors.push(ValidationError::new(
                            field,
                            "required when interaction = \"notification\"",
                        ));
                    }
                }
            }
            InteractionMode::Dialog => {
                if is_blank(&self.dialog.text) {
                    errors.push(ValidationError::new(
                        "dialog.text",
                        "required when interaction = \"dialog\"",
                    ));
                }
            }
        }

        // --- senders ---
        if let Some(http) = &self.http {
            match reqwest::Url::parse(&http.uri) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => errors.push(ValidationError::new(
                    "http.uri",
                    format!("unsupported scheme '{}'", url.scheme()),
                )),
                Err(e) => errors.push(ValidationError::new(
                    "http.uri",
                    format!("'{}' is not a valid URL: {e}", http.uri),
                )),
            }
            if http.basic_auth_login.is_some() != http.basic_auth_password.is_some() {
                errors.push(ValidationError::new(
                    "http.basic_auth_password",
                    "login and password must be set together",
                ));
            }
        }
        if let Some(mail) = &self.mail {
            if !mail.mail_to.contains('@') {
                errors.push(ValidationError::new(
                    "mail.mail_to",
                    format!("'{}' is not an email address", mail.mail_to),
                ));
            }
        }

        // --- limiter ---
        if self.limiter.enabled && self.limiter.period_secs == 0 {
            errors.push(ValidationError::new(
                "limiter.period_secs",
                "must be greater than 0",
            ));
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`ReporterConfig`] programmatically.
///
/// ```rust,no_run
/// use crashpost::config::{ConfigBuilder, InteractionMode};
///
/// let config = ConfigBuilder::new("editor", "2.3.1")
///     .interaction(InteractionMode::Toast)
///     .toast_text("Sorry, the editor crashed. A report is on its way.")
///     .http_uri("https://crashes.example.com/reports")
///     .build()
///     .expect("valid configuration");
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: ReporterConfig,
}

impl ConfigBuilder {
    pub fn new(app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            config: ReporterConfig {
                app_name: app_name.into(),
                app_version: app_version.into(),
                ..ReporterConfig::default()
            },
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.report_dir = Some(dir.into());
        self
    }

    pub fn interaction(mut self, mode: InteractionMode) -> Self {
        self.config.interaction = mode;
        self
    }

    pub fn toast_text(mut self, text: impl Into<String>) -> Self {
        self.config.toast.text = Some(text.into());
        self
    }

    pub fn toast_duration_ms(mut self, ms: u64) -> Self {
        self.config.toast.duration_ms = ms;
        self
    }

    pub fn notification(mut self, notification: NotificationConfig) -> Self {
        self.config.notification = notification;
        self
    }

    pub fn dialog_text(mut self, text: impl Into<String>) -> Self {
        self.config.dialog.text = Some(text.into());
        self
    }

    pub fn dialog(mut self, dialog: DialogConfig) -> Self {
        self.config.dialog = dialog;
        self
    }

    pub fn report_send_success_toast(mut self, text: impl Into<String>) -> Self {
        self.config.report_send_success_toast = Some(text.into());
        self
    }

    pub fn report_send_failure_toast(mut self, text: impl Into<String>) -> Self {
        self.config.report_send_failure_toast = Some(text.into());
        self
    }

    pub fn max_reports_per_send(mut self, n: usize) -> Self {
        self.config.max_reports_per_send = n;
        self
    }

    pub fn retry_policy(mut self, kind: RetryPolicyKind) -> Self {
        self.config.retry_policy = kind;
        self
    }

    pub fn delete_unapproved_reports_on_application_start(mut self, on: bool) -> Self {
        self.config.delete_unapproved_reports_on_application_start = on;
        self
    }

    pub fn delete_old_unsent_reports_on_application_start(mut self, on: bool) -> Self {
        self.config.delete_old_unsent_reports_on_application_start = on;
        self
    }

    pub fn also_report_to_default_handler(mut self, on: bool) -> Self {
        self.config.also_report_to_default_handler = on;
        self
    }

    pub fn send_reports_in_dev_mode(mut self, on: bool) -> Self {
        self.config.send_reports_in_dev_mode = on;
        self
    }

    pub fn interaction_timeout_ms(mut self, ms: u64) -> Self {
        self.config.interaction_timeout_ms = ms;
        self
    }

    pub fn crash_send_grace_ms(mut self, ms: u64) -> Self {
        self.config.crash_send_grace_ms = ms;
        self
    }

    pub fn report_content(mut self, fields: Vec<ReportField>) -> Self {
        self.config.report_content = fields;
        self
    }

    pub fn custom_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.custom_data.insert(key.into(), value.into());
        self
    }

    pub fn http(mut self, http: HttpSenderConfig) -> Self {
        self.config.http = Some(http);
        self
    }

    pub fn http_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.http = Some(HttpSenderConfig {
            uri: uri.into(),
            ..HttpSenderConfig::default()
        });
        self
    }

    pub fn mail_to(mut self, address: impl Into<String>) -> Self {
        self.config.mail = Some(MailSenderConfig {
            mail_to: address.into(),
            subject: None,
        });
        self
    }

    pub fn limiter(mut self, limiter: LimiterConfig) -> Self {
        self.config.limiter = limiter;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<ReporterConfig, ConfigError> {
        self.config.validated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(ReporterConfig::default().validate().is_empty());
    }

    #[test]
    fn dialog_mode_requires_text() {
        let err = ConfigBuilder::new("app", "1.0.0")
            .interaction(InteractionMode::Dialog)
            .build()
            .unwrap_err();

        match err {
            ConfigError::Invalid(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].field, "dialog.text");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn notification_mode_reports_every_missing_field() {
        let errors = ConfigBuilder::new("app", "1.0.0")
            .interaction(InteractionMode::Notification)
            .notification(NotificationConfig {
                title: Some("Crash".into()),
                ..NotificationConfig::default()
            })
            .config
            .validate();

        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["notification.text", "notification.channel_name"]);
    }

    #[test]
    fn toast_mode_with_text_is_valid() {
        let config = ConfigBuilder::new("app", "1.0.0")
            .interaction(InteractionMode::Toast)
            .toast_text("Crash report sent")
            .build()
            .unwrap();
        assert_eq!(config.interaction, InteractionMode::Toast);
    }

    #[test]
    fn rejects_bad_version_and_zero_cap() {
        let errors = ConfigBuilder::new("app", "one.two")
            .max_reports_per_send(0)
            .config
            .validate();

        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"app_version"));
        assert!(fields.contains(&"max_reports_per_send"));
    }

    #[test]
    fn rejects_non_http_uri() {
        let err = ConfigBuilder::new("app", "1.0.0")
            .http_uri("ftp://example.com/upload")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("http.uri"));
    }

    #[test]
    fn rejects_half_configured_basic_auth() {
        let errors = ConfigBuilder::new("app", "1.0.0")
            .http(HttpSenderConfig {
                uri: "https://example.com".into(),
                basic_auth_login: Some("user".into()),
                ..HttpSenderConfig::default()
            })
            .config
            .validate();
        assert_eq!(errors[0].field, "http.basic_auth_password");
    }

    #[test]
    fn rejects_bad_mail_address() {
        let err = ConfigBuilder::new("app", "1.0.0")
            .mail_to("nobody")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("mail.mail_to"));
    }

    #[test]
    fn loads_toml_with_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crashpost.toml");
        std::fs::write(
            &path,
            r#"
app_name = "editor"
app_version = "2.3.1"
interaction = "dialog"
retry_policy = "transient"
report_content = ["REPORT_ID", "STACK_TRACE"]

[dialog]
text = "Send a report?"

[http]
uri = "https://crashes.example.com/reports"
method = "PUT"
compress = true

[custom_data]
channel = "beta"
"#,
        )
        .unwrap();

        let config = ReporterConfig::load(&path).unwrap();

        assert_eq!(config.app_name, "editor");
        assert_eq!(config.interaction, InteractionMode::Dialog);
        assert_eq!(config.retry_policy, RetryPolicyKind::Transient);
        assert_eq!(config.max_reports_per_send, 5);
        assert_eq!(
            config.report_content,
            vec![ReportField::ReportId, ReportField::StackTrace]
        );
        let http = config.http.unwrap();
        assert_eq!(http.method, HttpMethod::Put);
        assert!(http.compress);
        assert_eq!(http.socket_timeout_ms, 20_000);
        assert_eq!(config.custom_data["channel"], "beta");
    }

    #[test]
    fn load_fails_fast_on_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crashpost.toml");
        std::fs::write(&path, "interaction = \"toast\"\n").unwrap();

        assert!(matches!(
            ReporterConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn explicit_report_dir_wins() {
        let config = ConfigBuilder::new("app", "1.0.0")
            .report_dir("/var/tmp/reports")
            .build()
            .unwrap();
        assert_eq!(config.report_root(), PathBuf::from("/var/tmp/reports"));
    }

    #[test]
    fn default_report_dir_is_namespaced_by_app() {
        let config = ConfigBuilder::new("editor", "1.0.0").build().unwrap();
        assert!(config.report_root().ends_with("editor/crash-reports"));
    }
}
