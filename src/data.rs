//! Report data model.
//!
//! A report is an ordered map from field identifier to JSON value. Key order
//! is insertion order, so a report written to disk and read back compares
//! equal field-for-field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known report fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportField {
    ReportId,
    AppVersionName,
    PackageName,
    Build,
    BuildConfig,
    InstallationId,
    StackTrace,
    StackTraceHash,
    ExceptionClass,
    ThreadDetails,
    CustomData,
    UserAppStartDate,
    UserCrashDate,
    IsSilent,
    UserComment,
    UserEmail,
}

impl ReportField {
    /// Every field, in the order collectors emit them.
    pub const ALL: &'static [ReportField] = &[
        ReportField::ReportId,
        ReportField::AppVersionName,
        ReportField::PackageName,
        ReportField::Build,
        ReportField::BuildConfig,
        ReportField::InstallationId,
        ReportField::StackTrace,
        ReportField::StackTraceHash,
        ReportField::ExceptionClass,
        ReportField::ThreadDetails,
        ReportField::CustomData,
        ReportField::UserAppStartDate,
        ReportField::UserCrashDate,
        ReportField::IsSilent,
        ReportField::UserComment,
        ReportField::UserEmail,
    ];

    /// Fields that survive any `report_content` filter; the lifecycle
    /// depends on them.
    pub const MANDATORY: &'static [ReportField] = &[
        ReportField::ReportId,
        ReportField::UserCrashDate,
        ReportField::IsSilent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReportId => "REPORT_ID",
            Self::AppVersionName => "APP_VERSION_NAME",
            Self::PackageName => "PACKAGE_NAME",
            Self::Build => "BUILD",
            Self::BuildConfig => "BUILD_CONFIG",
            Self::InstallationId => "INSTALLATION_ID",
            Self::StackTrace => "STACK_TRACE",
            Self::StackTraceHash => "STACK_TRACE_HASH",
            Self::ExceptionClass => "EXCEPTION_CLASS",
            Self::ThreadDetails => "THREAD_DETAILS",
            Self::CustomData => "CUSTOM_DATA",
            Self::UserAppStartDate => "USER_APP_START_DATE",
            Self::UserCrashDate => "USER_CRASH_DATE",
            Self::IsSilent => "IS_SILENT",
            Self::UserComment => "USER_COMMENT",
            Self::UserEmail => "USER_EMAIL",
        }
    }
}

impl fmt::Display for ReportField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| format!("unknown report field '{s}'"))
    }
}

/// The collected data of one crash or manual report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrashReportData {
    fields: Map<String, Value>,
}

impl CrashReportData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a well-known field, replacing any previous value in place.
    pub fn put(&mut self, field: ReportField, value: impl Into<Value>) {
        self.fields.insert(field.as_str().to_string(), value.into());
    }

    /// Sets an arbitrary key. Used for fields contributed by custom collectors.
    pub fn put_key(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, field: ReportField) -> Option<&Value> {
        self.fields.get(field.as_str())
    }

    pub fn get_key(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns the field as a string slice when it holds a JSON string.
    pub fn get_str(&self, field: ReportField) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn contains(&self, field: ReportField) -> bool {
        self.fields.contains_key(field.as_str())
    }

    /// True when the report was marked to bypass interactive approval.
    pub fn is_silent(&self) -> bool {
        self.get(ReportField::IsSilent)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Drops well-known fields not listed in `keep`. Mandatory fields and
    /// custom keys are always kept.
    pub fn retain_fields(&mut self, keep: &[ReportField]) {
        self.fields.retain(|key, _| match key.parse::<ReportField>() {
            Ok(field) => keep.contains(&field) || ReportField::MANDATORY.contains(&field),
            Err(_) => true,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Serializes to compact JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parses a report. Anything but a JSON object is rejected.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
