//! File-backed report store.
//!
//! Reports live under a root directory in two folders:
//!
//! ```text
//! <root>/unapproved/   awaiting user consent
//! <root>/approved/     cleared for sending
//! ```
//!
//! A report is in exactly one folder at a time. Every mutation is a single
//! OS-level operation (persist-by-rename, rename, unlink), which is what keeps
//! concurrent crash handlers, startup runs and senders from corrupting each
//! other without an explicit lock.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::data::CrashReportData;
use crate::file_name::{self, ReportFileName};

pub const UNAPPROVED_DIR: &str = "unapproved";
pub const APPROVED_DIR: &str = "approved";
const INSTALLATION_FILE: &str = "installation";

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("report I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("report is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("could not move report into place: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("path is not a report file: {0}")]
    NotAReport(PathBuf),
}

/// One of the two report folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folder {
    Unapproved,
    Approved,
}

/// File-backed report store rooted at a directory.
#[derive(Debug, Clone)]
pub struct ReportStore {
    root: PathBuf,
}

impl ReportStore {
    /// Opens the store, creating both folders if needed.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let store = Self {
            root: root.as_ref().to_path_buf(),
        };
        fs::create_dir_all(store.unapproved_dir())?;
        fs::create_dir_all(store.approved_dir())?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn unapproved_dir(&self) -> PathBuf {
        self.root.join(UNAPPROVED_DIR)
    }

    pub fn approved_dir(&self) -> PathBuf {
        self.root.join(APPROVED_DIR)
    }

    pub fn dir(&self, folder: Folder) -> PathBuf {
        match folder {
            Folder::Unapproved => self.unapproved_dir(),
            Folder::Approved => self.approved_dir(),
        }
    }

    /// Unapproved reports, oldest first.
    pub fn list_unapproved(&self) -> Vec<PathBuf> {
        self.list(Folder::Unapproved)
    }

    /// Approved reports, oldest first.
    pub fn list_approved(&self) -> Vec<PathBuf> {
        self.list(Folder::Approved)
    }

    /// Report files in `folder` sorted by embedded timestamp. Names that do
    /// not parse sort last. Never cached: every call reads the directory.
    pub fn list(&self, folder: Folder) -> Vec<PathBuf> {
        let dir = self.dir(folder);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Could not list report folder");
                return Vec::new();
            }
        };

        let mut reports: Vec<(Option<DateTime<Utc>>, PathBuf)> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && file_name::is_report_file(path))
            .map(|path| (file_name::timestamp(file_name::name_of(&path)), path))
            .collect();

        reports.sort_by(|(a_ts, a_path), (b_ts, b_path)| {
            (a_ts.is_none(), a_ts, a_path).cmp(&(b_ts.is_none(), b_ts, b_path))
        });
        reports.into_iter().map(|(_, path)| path).collect()
    }

    /// Which folder `path` belongs to, judged by its parent directory.
    pub fn folder_of(&self, path: &Path) -> Option<Folder> {
        let parent = path.parent()?;
        if parent == self.approved_dir() {
            Some(Folder::Approved)
        } else if parent == self.unapproved_dir() {
            Some(Folder::Unapproved)
        } else {
            None
        }
    }

    /// Atomically writes `report` as `name` into `folder`.
    ///
    /// The body goes to a temp file in the target folder and is renamed over
    /// the final name, so readers never see a half-written report. A report
    /// with the same name (two crashes in the same millisecond) is replaced.
    pub fn write(
        &self,
        folder: Folder,
        name: &ReportFileName,
        report: &CrashReportData,
    ) -> Result<PathBuf, StoreError> {
        let target = self.dir(folder).join(name.file_name());
        write_atomically(&target, report)?;
        debug!(path = %target.display(), "Stored report");
        Ok(target)
    }

    /// Replaces the body of an existing report in place.
    pub fn rewrite(&self, path: &Path, report: &CrashReportData) -> Result<(), StoreError> {
        if !file_name::is_report_file(path) {
            return Err(StoreError::NotAReport(path.to_path_buf()));
        }
        write_atomically(path, report)
    }

    /// Reads and parses a report.
    pub fn load(&self, path: &Path) -> Result<CrashReportData, StoreError> {
        let content = fs::read_to_string(path)?;
        Ok(CrashReportData::from_json(&content)?)
    }

    /// Moves a report into the approved folder.
    ///
    /// Returns the new path, or `None` if the rename failed (typically a
    /// concurrent run already moved or deleted it); the caller treats the
    /// report as not yet approved. A report that is already approved is left
    /// alone.
    pub fn approve(&self, path: &Path) -> Option<PathBuf> {
        if self.folder_of(path) == Some(Folder::Approved) {
            debug!(path = %path.display(), "Report already approved");
            return Some(path.to_path_buf());
        }

        let target = self.approved_dir().join(file_name::name_of(path));
        match fs::rename(path, &target) {
            Ok(()) => {
                debug!(path = %target.display(), "Approved report");
                Some(target)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not approve report");
                None
            }
        }
    }

    /// Deletes a report. A report that is already gone is only logged.
    pub fn delete(&self, path: &Path) -> bool {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted report");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not delete report");
                false
            }
        }
    }

    /// Deletes every report in `folder`, returning how many went away.
    pub fn purge(&self, folder: Folder) -> usize {
        self.list(folder)
            .iter()
            .filter(|path| self.delete(path))
            .count()
    }

    /// Identifier of this installation, created on first use.
    pub fn installation_id(&self) -> Result<String, StoreError> {
        let path = self.root.join(INSTALLATION_FILE);
        match fs::read_to_string(&path) {
            Ok(id) if !id.trim().is_empty() => Ok(id.trim().to_string()),
            Ok(_) => create_installation_id(&path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => create_installation_id(&path),
            Err(e) => Err(e.into()),
        }
    }
}

fn create_installation_id(path: &Path) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    fs::write(path, &id)?;
    Ok(id)
}

fn write_atomically(target: &Path, report: &CrashReportData) -> Result<(), StoreError> {
    let dir = target
        .parent()
        .ok_or_else(|| StoreError::NotAReport(target.to_path_buf()))?;
    let json = report.to_json()?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(target)?;
    Ok(())
}
