//! Description of one crash or manual report request.

use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::panic::PanicHookInfo;

use chrono::{DateTime, Utc};

/// Failure captured for a report: a panic or an error value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    /// Panic marker or the Rust type name of the error.
    pub class: String,
    pub message: String,
    /// `file:line:column` of a panic.
    pub location: Option<String>,
    pub backtrace: Option<String>,
    /// `source()` chain, outermost first.
    pub causes: Vec<String>,
}

/// Class recorded for panics.
pub const PANIC_CLASS: &str = "panic";

/// Builder for a single report.
///
/// The executor consumes it; the primer and collectors read it. Crashes come
/// in through [`ReportBuilder::panic`] with `end_application` set, manual
/// reports through [`ReportBuilder::message`] or [`ReportBuilder::error`].
#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    message: Option<String>,
    exception: Option<ExceptionInfo>,
    thread_name: Option<String>,
    custom_data: BTreeMap<String, String>,
    send_silently: bool,
    end_application: bool,
    crash_time: Option<DateTime<Utc>>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Free-form message for reports without an error value.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Captures an error, its `source()` chain and a backtrace when enabled
    /// through `RUST_BACKTRACE`.
    pub fn error<E: StdError + 'static>(mut self, error: &E) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }

        let backtrace = Backtrace::capture();
        self.exception = Some(ExceptionInfo {
            class: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
            location: None,
            backtrace: render_backtrace(&backtrace),
            causes,
        });
        self
    }

    /// Captures a panic. Always records a backtrace.
    pub fn panic(mut self, info: &PanicHookInfo<'_>) -> Self {
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));

        self.exception = Some(ExceptionInfo {
            class: PANIC_CLASS.to_string(),
            message: panic_message(info.payload()),
            location,
            backtrace: Some(Backtrace::force_capture().to_string()),
            causes: Vec::new(),
        });
        self
    }

    /// Sets the failure directly; used by tests and foreign integrations.
    pub fn exception(mut self, exception: ExceptionInfo) -> Self {
        self.exception = Some(exception);
        self
    }

    /// Name of the thread the failure happened on. Defaults to the thread
    /// that builds the report.
    pub fn thread(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    pub fn custom_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_data.insert(key.into(), value.into());
        self
    }

    /// Bypass interactive approval regardless of the interaction mode.
    pub fn send_silently(mut self) -> Self {
        self.send_silently = true;
        self
    }

    /// The process must end after the report is handled (crash path).
    pub fn end_application(mut self) -> Self {
        self.end_application = true;
        self
    }

    /// Overrides the crash time; defaults to the moment of collection.
    pub fn at(mut self, time: DateTime<Utc>) -> Self {
        self.crash_time = Some(time);
        self
    }

    pub fn put_custom_data(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.custom_data.insert(key.into(), value.into());
    }

    pub fn get_message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn get_exception(&self) -> Option<&ExceptionInfo> {
        self.exception.as_ref()
    }

    pub fn get_thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    pub fn get_custom_data(&self) -> &BTreeMap<String, String> {
        &self.custom_data
    }

    pub fn is_send_silently(&self) -> bool {
        self.send_silently
    }

    pub fn is_end_application(&self) -> bool {
        self.end_application
    }

    pub fn get_crash_time(&self) -> Option<DateTime<Utc>> {
        self.crash_time
    }
}

/// Extracts the message of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

fn render_backtrace(backtrace: &Backtrace) -> Option<String> {
    match backtrace.status() {
        std::backtrace::BacktraceStatus::Captured => Some(backtrace.to_string()),
        _ => None,
    }
}
