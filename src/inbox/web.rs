//! HTTP endpoint receiving reports from [`crate::sender::HttpSender`] and a
//! small read API over what was received.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::CONTENT_ENCODING, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use super::storage::{InboxStorage, ReceivedReport};
use crate::compression::{gunzip_to_string, GZIP_ENCODING};
use crate::data::{CrashReportData, ReportField};
use crate::sender::http::REPORT_ID_HEADER;

/// Shared application state.
pub struct AppState {
    pub storage: Mutex<InboxStorage>,
}

impl AppState {
    pub fn new(storage: InboxStorage) -> Arc<Self> {
        Arc::new(Self {
            storage: Mutex::new(storage),
        })
    }
}

/// Creates the inbox router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/reports", post(post_report))
        .route("/reports/{id}", put(put_report))
        .route("/api/reports", get(get_reports))
        .route("/api/reports/{id}", get(get_report))
        .route("/api/groups", get(get_groups))
        .route("/api/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new())
        .with_state(state)
}

#[derive(Serialize)]
struct Created {
    id: i64,
    report_id: String,
}

#[derive(Serialize)]
struct StatsJson {
    total_reports: i64,
}

/// POST /reports - id taken from `X-Report-Id`, else from the body
async fn post_report(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> Response {
    let header_id = headers
        .get(REPORT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    receive(&state, header_id, &headers, &body).await
}

/// PUT /reports/{id}
async fn put_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    receive(&state, Some(id), &headers, &body).await
}

async fn receive(state: &AppState, report_id: Option<String>, headers: &HeaderMap, body: &[u8]) -> Response {
    let raw = match decode_body(headers, body) {
        Ok(raw) => raw,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };
    let report = match CrashReportData::from_json(&raw) {
        Ok(report) => report,
        Err(e) => {
            warn!(error = %e, "Rejected report with invalid JSON");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    let Some(report_id) = report_id.or_else(|| report.get_str(ReportField::ReportId).map(String::from)) else {
        return (StatusCode::BAD_REQUEST, "report has no id").into_response();
    };

    let received = ReceivedReport::from_report(&report_id, &report, raw, Utc::now().timestamp());
    let storage = state.storage.lock().await;
    match storage.insert(&received) {
        Ok(Some(id)) => {
            info!(id, report_id = %report_id, "Received report");
            (StatusCode::CREATED, Json(Created { id, report_id })).into_response()
        }
        Ok(None) => {
            debug!(report_id = %report_id, "Duplicate report");
            StatusCode::CONFLICT.into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn decode_body(headers: &HeaderMap, body: &[u8]) -> Result<String, String> {
    let gzipped = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case(GZIP_ENCODING));
    if gzipped {
        gunzip_to_string(body).map_err(|e| e.to_string())
    } else {
        String::from_utf8(body.to_vec()).map_err(|e| e.to_string())
    }
}

/// GET /api/reports - recent reports
async fn get_reports(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let storage = state.storage.lock().await;
    match storage.get_recent(100) {
        Ok(reports) => Json(reports).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// GET /api/reports/{id}
async fn get_report(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> impl IntoResponse {
    let storage = state.storage.lock().await;
    match storage.get_by_id(id) {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// GET /api/groups - reports grouped by stack-trace hash
async fn get_groups(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let storage = state.storage.lock().await;
    match storage.get_groups(50) {
        Ok(groups) => Json(groups).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// GET /api/stats
async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let storage = state.storage.lock().await;
    match storage.count() {
        Ok(total) => Json(StatsJson { total_reports: total }).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HttpMethod, HttpSenderConfig};
    use crate::sender::{HttpSender, ReportSender};

    async fn serve() -> String {
        let state = AppState::new(InboxStorage::open_in_memory().unwrap());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn report(id: &str) -> CrashReportData {
        let mut data = CrashReportData::new();
        data.put(ReportField::ReportId, id);
        data.put(ReportField::PackageName, "editor");
        data.put(ReportField::StackTraceHash, "h1");
        data.put(ReportField::StackTrace, "   0: editor::save\n".repeat(100));
        data
    }

    #[tokio::test]
    async fn receives_reports_from_http_sender() {
        let base = serve().await;
        let sender = HttpSender::new(HttpSenderConfig {
            uri: format!("{base}/reports"),
            compress: true,
            ..HttpSenderConfig::default()
        })
        .unwrap();

        sender.send(&report("r-1")).await.unwrap();

        let reports: Vec<serde_json::Value> = reqwest::get(format!("{base}/api/reports"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0]["report_id"], "r-1");
        assert_eq!(reports[0]["app_name"], "editor");
    }

    #[tokio::test]
    async fn duplicate_put_is_conflict_and_sender_accepts_it() {
        let base = serve().await;
        let client = reqwest::Client::new();
        let body = report("r-2").to_json().unwrap();

        let first = client.put(format!("{base}/reports/r-2")).body(body.clone()).send().await.unwrap();
        let second = client.put(format!("{base}/reports/r-2")).body(body).send().await.unwrap();
        assert_eq!(first.status(), reqwest::StatusCode::CREATED);
        assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);

        let sender = HttpSender::new(HttpSenderConfig {
            uri: format!("{base}/reports"),
            method: HttpMethod::Put,
            ..HttpSenderConfig::default()
        })
        .unwrap();
        assert!(sender.send(&report("r-2")).await.is_ok());

        let stats: serde_json::Value = reqwest::get(format!("{base}/api/stats"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stats["total_reports"], 1);
    }

    #[tokio::test]
    async fn rejects_invalid_json() {
        let base = serve().await;
        let response = reqwest::Client::new()
            .post(format!("{base}/reports"))
            .body("{broken")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn groups_and_lookup() {
        let base = serve().await;
        let client = reqwest::Client::new();
        for id in ["a", "b"] {
            client
                .post(format!("{base}/reports"))
                .body(report(id).to_json().unwrap())
                .send()
                .await
                .unwrap();
        }

        let groups: Vec<serde_json::Value> = reqwest::get(format!("{base}/api/groups"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(groups[0]["stack_trace_hash"], "h1");
        assert_eq!(groups[0]["count"], 2);

        let missing = reqwest::get(format!("{base}/api/reports/999")).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        let found = reqwest::get(format!("{base}/api/reports/1")).await.unwrap();
        assert_eq!(found.status(), reqwest::StatusCode::OK);
    }
}
