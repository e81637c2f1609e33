//! SQLite storage for received reports.
//!
//! Keeps the raw report JSON plus the fields needed for listing and for
//! grouping reports by stack-trace hash.

use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use serde::Serialize;
use std::path::Path;

use crate::data::{CrashReportData, ReportField};

/// A stored report.
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedReport {
    pub id: i64,
    pub report_id: String,
    pub received_at: i64,
    pub app_name: Option<String>,
    pub app_version: Option<String>,
    pub exception_class: Option<String>,
    pub stack_trace_hash: Option<String>,
    pub stack_trace: Option<String>,
    pub installation_id: Option<String>,
    pub is_silent: bool,
    pub user_comment: Option<String>,
    pub raw_content: String,
}

impl ReceivedReport {
    /// Extracts the indexed fields from a report body.
    pub fn from_report(report_id: &str, report: &CrashReportData, raw_content: String, received_at: i64) -> Self {
        let field = |f: ReportField| report.get_str(f).map(String::from);
        Self {
            id: 0,
            report_id: report_id.to_string(),
            received_at,
            app_name: field(ReportField::PackageName),
            app_version: field(ReportField::AppVersionName),
            exception_class: field(ReportField::ExceptionClass),
            stack_trace_hash: field(ReportField::StackTraceHash),
            stack_trace: field(ReportField::StackTrace),
            installation_id: field(ReportField::InstallationId),
            is_silent: report.is_silent(),
            user_comment: field(ReportField::UserComment),
            raw_content,
        }
    }
}

/// Reports sharing a stack-trace hash.
#[derive(Debug, Clone, Serialize)]
pub struct ReportGroup {
    pub stack_trace_hash: String,
    pub exception_class: Option<String>,
    pub count: i64,
    pub first_seen: i64,
    pub last_seen: i64,
    pub app_versions: Vec<String>,
}

/// SQLite-backed report storage.
pub struct InboxStorage {
    conn: Connection,
}

const REPORT_COLUMNS: &str = "id, report_id, received_at, app_name, app_version, exception_class,
     stack_trace_hash, stack_trace, installation_id, is_silent, user_comment, raw_content";

impl InboxStorage {
    /// Opens or creates a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let storage = Self {
            conn: Connection::open(path)?,
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Opens an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let storage = Self {
            conn: Connection::open_in_memory()?,
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                report_id TEXT UNIQUE NOT NULL,
                received_at INTEGER NOT NULL,
                app_name TEXT,
                app_version TEXT,
                exception_class TEXT,
                stack_trace_hash TEXT,
                stack_trace TEXT,
                installation_id TEXT,
                is_silent INTEGER NOT NULL DEFAULT 0,
                user_comment TEXT,
                raw_content TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reports_received_at ON reports(received_at DESC);
            CREATE INDEX IF NOT EXISTS idx_reports_hash ON reports(stack_trace_hash);
            CREATE INDEX IF NOT EXISTS idx_reports_app_version ON reports(app_version);
            ",
        )
    }

    /// Inserts a report. Returns the row id, or `None` if a report with the
    /// same `report_id` is already stored.
    pub fn insert(&self, report: &ReceivedReport) -> Result<Option<i64>> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO reports (
                report_id, received_at, app_name, app_version, exception_class,
                stack_trace_hash, stack_trace, installation_id, is_silent,
                user_comment, raw_content
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                report.report_id,
                report.received_at,
                report.app_name,
                report.app_version,
                report.exception_class,
                report.stack_trace_hash,
                report.stack_trace,
                report.installation_id,
                report.is_silent,
                report.user_comment,
                report.raw_content,
            ],
        )?;

        if inserted == 0 {
            Ok(None)
        } else {
            Ok(Some(self.conn.last_insert_rowid()))
        }
    }

    /// Recent reports, newest first.
    pub fn get_recent(&self, limit: usize) -> Result<Vec<ReceivedReport>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REPORT_COLUMNS} FROM reports ORDER BY received_at DESC, id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit], report_from_row)?;
        rows.collect()
    }

    /// Report groups by stack-trace hash, largest first.
    pub fn get_groups(&self, limit: usize) -> Result<Vec<ReportGroup>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                COALESCE(stack_trace_hash, 'unknown') as hash,
                MAX(exception_class),
                COUNT(*) as count,
                MIN(received_at),
                MAX(received_at),
                GROUP_CONCAT(DISTINCT app_version)
             FROM reports
             GROUP BY hash
             ORDER BY count DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let versions: Option<String> = row.get(5)?;
            Ok(ReportGroup {
                stack_trace_hash: row.get(0)?,
                exception_class: row.get(1)?,
                count: row.get(2)?,
                first_seen: row.get(3)?,
                last_seen: row.get(4)?,
                app_versions: versions
                    .map(|s| s.split(',').map(String::from).collect())
                    .unwrap_or_default(),
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))
    }

    /// Deletes reports received before the given timestamp.
    pub fn delete_older_than(&self, timestamp: i64) -> Result<usize> {
        self.conn
            .execute("DELETE FROM reports WHERE received_at < ?1", [timestamp])
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<ReceivedReport>> {
        self.conn
            .query_row(
                &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE id = ?1"),
                [id],
                report_from_row,
            )
            .optional()
    }

    pub fn get_by_report_id(&self, report_id: &str) -> Result<Option<ReceivedReport>> {
        self.conn
            .query_row(
                &format!("SELECT {REPORT_COLUMNS} FROM reports WHERE report_id = ?1"),
                [report_id],
                report_from_row,
            )
            .optional()
    }
}

fn report_from_row(row: &Row<'_>) -> Result<ReceivedReport> {
    Ok(ReceivedReport {
        id: row.get(0)?,
        report_id: row.get(1)?,
        received_at: row.get(2)?,
        app_name: row.get(3)?,
        app_version: row.get(4)?,
        exception_class: row.get(5)?,
        stack_trace_hash: row.get(6)?,
        stack_trace: row.get(7)?,
        installation_id: row.get(8)?,
        is_silent: row.get(9)?,
        user_comment: row.get(10)?,
        raw_content: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn received(report_id: &str, hash: &str, version: &str, received_at: i64) -> ReceivedReport {
        let mut data = CrashReportData::new();
        data.put(ReportField::ReportId, report_id);
        data.put(ReportField::PackageName, "editor");
        data.put(ReportField::AppVersionName, version);
        data.put(ReportField::ExceptionClass, "panic");
        data.put(ReportField::StackTraceHash, hash);
        let raw = data.to_json().unwrap();
        ReceivedReport::from_report(report_id, &data, raw, received_at)
    }

    #[test]
    fn insert_and_query() {
        let storage = InboxStorage::open_in_memory().unwrap();

        let id = storage.insert(&received("r-1", "h1", "1.0.0", 1000)).unwrap();
        assert!(id.is_some());

        let recent = storage.get_recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].report_id, "r-1");
        assert_eq!(recent[0].app_name.as_deref(), Some("editor"));

        let by_id = storage.get_by_id(id.unwrap()).unwrap().unwrap();
        assert_eq!(by_id.report_id, "r-1");
        assert!(storage.get_by_id(999).unwrap().is_none());
        assert!(storage.get_by_report_id("r-1").unwrap().is_some());
    }

    #[test]
    fn duplicate_report_id_is_ignored() {
        let storage = InboxStorage::open_in_memory().unwrap();
        let report = received("same", "h", "1.0.0", 1000);

        assert!(storage.insert(&report).unwrap().is_some());
        assert!(storage.insert(&report).unwrap().is_none());
        assert_eq!(storage.count().unwrap(), 1);
    }

    #[test]
    fn groups_by_stack_trace_hash() {
        let storage = InboxStorage::open_in_memory().unwrap();
        for i in 0..5 {
            storage.insert(&received(&format!("a{i}"), "h1", "1.0.0", 1000 + i)).unwrap();
        }
        storage.insert(&received("b", "h2", "1.1.0", 2000)).unwrap();

        let groups = storage.get_groups(10).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].stack_trace_hash, "h1");
        assert_eq!(groups[0].count, 5);
        assert_eq!(groups[0].first_seen, 1000);
        assert_eq!(groups[0].last_seen, 1004);
        assert_eq!(groups[0].app_versions, ["1.0.0"]);
    }

    #[test]
    fn delete_older_than_prunes() {
        let storage = InboxStorage::open_in_memory().unwrap();
        storage.insert(&received("old", "h", "1.0.0", 100)).unwrap();
        storage.insert(&received("new", "h", "1.0.0", 200)).unwrap();

        assert_eq!(storage.delete_older_than(150).unwrap(), 1);
        assert_eq!(storage.count().unwrap(), 1);
    }
}
