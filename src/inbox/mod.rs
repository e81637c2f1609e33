//! A small collection server for reports sent by the HTTP sender.

pub mod storage;
pub mod web;

pub use storage::{InboxStorage, ReceivedReport, ReportGroup};
pub use web::{create_router, AppState};
