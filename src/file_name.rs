//! Report file naming.
//!
//! The file name is the only index a report has: it carries the creation
//! timestamp (sort order, staleness checks) and the silent flag. Nothing in
//! this module touches the filesystem.
//!
//! ```text
//! 2024-03-01T12-30-05.123Z.stacktrace
//! 2024-03-01T12-30-05.123Z-IS_SILENT.stacktrace
//! ```

use std::path::Path;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};

/// Extension of every persisted report.
pub const REPORT_FILE_EXTENSION: &str = ".stacktrace";

/// Marker appended to the timestamp of silent reports.
pub const SILENT_SUFFIX: &str = "-IS_SILENT";

/// Filesystem-safe UTC timestamp; lexical order equals chronological order.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3fZ";

/// Decoded report file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportFileName {
    pub timestamp: DateTime<Utc>,
    pub silent: bool,
}

impl ReportFileName {
    /// Builds a name, truncating the timestamp to the millisecond precision
    /// the encoding keeps.
    pub fn new(timestamp: DateTime<Utc>, silent: bool) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(3),
            silent,
        }
    }

    /// Encodes the file name.
    pub fn file_name(&self) -> String {
        format!(
            "{}{}{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            if self.silent { SILENT_SUFFIX } else { "" },
            REPORT_FILE_EXTENSION
        )
    }

    /// Decodes a file name. Returns `None` for anything that is not a
    /// well-formed report name.
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(REPORT_FILE_EXTENSION)?;
        let (stamp, silent) = match stem.strip_suffix(SILENT_SUFFIX) {
            Some(stamp) => (stamp, true),
            None => (stem, false),
        };
        let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        Some(Self {
            timestamp: naive.and_utc(),
            silent,
        })
    }
}

/// True when the name carries the silent marker.
pub fn is_silent(file_name: &str) -> bool {
    file_name.contains(SILENT_SUFFIX)
}

/// Creation timestamp encoded in the name, if it parses.
pub fn timestamp(file_name: &str) -> Option<DateTime<Utc>> {
    ReportFileName::parse(file_name).map(|name| name.timestamp)
}

/// True when the path names a report file.
pub fn is_report_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(REPORT_FILE_EXTENSION))
}

/// File name component of `path` as UTF-8, empty when absent.
pub(crate) fn name_of(path: &Path) -> &str {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn encodes_timestamp_and_extension() {
        let name = ReportFileName::new(at(1_709_296_205_123), false);
        assert_eq!(name.file_name(), "2024-03-01T12-30-05.123Z.stacktrace");
    }

    #[test]
    fn encodes_silent_suffix() {
        let name = ReportFileName::new(at(1_709_296_205_123), true);
        assert_eq!(
            name.file_name(),
            "2024-03-01T12-30-05.123Z-IS_SILENT.stacktrace"
        );
        assert!(is_silent(&name.file_name()));
    }

    #[test]
    fn parse_inverts_encoding() {
        for silent in [false, true] {
            let name = ReportFileName::new(at(1_600_000_000_007), silent);
            assert_eq!(ReportFileName::parse(&name.file_name()), Some(name));
        }
    }

    #[test]
    fn truncates_sub_millisecond_precision() {
        let precise = at(1_600_000_000_007) + chrono::Duration::microseconds(999);
        let name = ReportFileName::new(precise, false);
        assert_eq!(name.timestamp, at(1_600_000_000_007));
    }

    #[test]
    fn rejects_foreign_names() {
        assert_eq!(ReportFileName::parse("notes.txt"), None);
        assert_eq!(ReportFileName::parse("garbage.stacktrace"), None);
        assert_eq!(timestamp("2024-13-45T99-99-99.000Z.stacktrace"), None);
        assert!(!is_silent("2024-03-01T12-30-05.123Z.stacktrace"));
    }

    #[test]
    fn lexical_order_matches_time_order() {
        let older = ReportFileName::new(at(999_999_999_999), false).file_name();
        let newer = ReportFileName::new(at(1_000_000_000_000), false).file_name();
        assert!(older < newer);
    }

    #[test]
    fn same_millisecond_yields_same_name() {
        let a = ReportFileName::new(at(1_700_000_000_000), false);
        let b = ReportFileName::new(at(1_700_000_000_000) + chrono::Duration::microseconds(400), false);
        assert_eq!(a.file_name(), b.file_name());
    }

    #[test]
    fn recognises_report_paths() {
        assert!(is_report_file(Path::new("/tmp/x/2024-03-01T12-30-05.123Z.stacktrace")));
        assert!(!is_report_file(Path::new("/tmp/x/limiter.json")));
    }
}
