//! Tests for the REST remote store client against a local mock server

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use remote_table_backup::fetcher::fetch_all_rows;
use remote_table_backup::models::TableEntry;
use remote_table_backup::remote::{HttpRemoteStore, RemoteError};
use remote_table_backup::{
    BackupOrchestrator, BackupRequest, Config, Context, RemoteStore, WriteOutcome,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const TEST_KEY: &str = "service-role-key";

// =============================================================================
// Mock Server
// =============================================================================

#[derive(Clone, Default)]
struct MockState {
    tables: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    api_keys: Arc<Mutex<Vec<String>>>,
    page_orders: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockState {
    fn with_table(self, table: &str, rows: Vec<Value>) -> Self {
        self.tables.lock().unwrap().insert(table.to_string(), rows);
        self
    }

    fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn record_key(&self, headers: &HeaderMap) {
        let key = headers
            .get("apikey")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.api_keys.lock().unwrap().push(key);
    }
}

fn error_body(status: StatusCode, code: &str, message: &str, details: Option<&str>) -> Response {
    let mut body = json!({"code": code, "message": message});
    if let Some(details) = details {
        body["details"] = json!(details);
    }
    (status, Json(body)).into_response()
}

async fn select_rows(
    State(state): State<MockState>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    state.record_key(&headers);
    if table == "broken" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream unavailable").into_response();
    }

    let rows = state.rows(&table);
    let counting = headers
        .get("Prefer")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("count=exact"))
        .unwrap_or(false);
    if counting {
        let range = format!("0-0/{}", rows.len());
        let first: Vec<Value> = rows.into_iter().take(1).collect();
        return (StatusCode::OK, [(header::CONTENT_RANGE, range)], Json(first)).into_response();
    }

    state.page_orders.lock().unwrap().push(params.get("order").cloned());
    let offset: usize = params.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit: usize = params.get("limit").and_then(|v| v.parse().ok()).unwrap_or(usize::MAX);
    let page: Vec<Value> = rows.into_iter().skip(offset).take(limit).collect();
    Json(page).into_response()
}

async fn upsert_rows(
    State(state): State<MockState>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Json(rows): Json<Vec<Value>>,
) -> Response {
    state.record_key(&headers);
    match table.as_str() {
        "strict" => {
            return error_body(
                StatusCode::CONFLICT,
                "23505",
                "duplicate key value violates unique constraint \"strict_pkey\"",
                Some("Key (id)=(1) already exists."),
            )
        }
        "invoices" => {
            return error_body(
                StatusCode::BAD_REQUEST,
                "428C9",
                "cannot insert a non-DEFAULT value into column \"total\"",
                None,
            )
        }
        _ => {}
    }

    let mut tables = state.tables.lock().unwrap();
    let existing = tables.entry(table).or_default();
    for row in rows {
        match existing.iter_mut().find(|r| r.get("id") == row.get("id")) {
            Some(current) => *current = row,
            None => existing.push(row),
        }
    }
    StatusCode::CREATED.into_response()
}

async fn update_rows(
    State(state): State<MockState>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(patch): Json<Value>,
) -> Response {
    let Some(id) = params.get("id").and_then(|f| f.strip_prefix("eq.")) else {
        return error_body(StatusCode::BAD_REQUEST, "PGRST100", "missing filter", None);
    };

    let mut tables = state.tables.lock().unwrap();
    let rows = tables.entry(table).or_default();
    for row in rows.iter_mut() {
        let matches = match row.get("id") {
            Some(Value::String(s)) => s == id,
            Some(other) => other.to_string() == id,
            None => false,
        };
        if matches {
            if let (Some(target), Some(fields)) = (row.as_object_mut(), patch.as_object()) {
                for (column, value) in fields {
                    target.insert(column.clone(), value.clone());
                }
            }
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

/// Start the mock server on a random port; returns its base URL
async fn spawn_mock(state: MockState) -> String {
    let app = Router::new()
        .route(
            "/rest/v1/:table",
            get(select_rows).post(upsert_rows).patch(update_rows),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn client(base_url: &str) -> HttpRemoteStore {
    HttpRemoteStore::new(base_url, TEST_KEY, "id", Duration::from_secs(5)).unwrap()
}

fn row(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn users(count: usize) -> Vec<Value> {
    (1..=count)
        .map(|i| json!({"id": i, "email": format!("user{}@example.com", i)}))
        .collect()
}

// =============================================================================
// Read Tests
// =============================================================================

#[tokio::test]
async fn test_fetch_all_rows_pages_through_table() {
    let state = MockState::default().with_table("users", users(5));
    let base_url = spawn_mock(state.clone()).await;

    let rows = fetch_all_rows(&client(&base_url), "users", 2).await.unwrap();

    assert_eq!(rows.len(), 5);
    assert_eq!(rows[4].get("id"), Some(&json!(5)));
    let keys = state.api_keys.lock().unwrap();
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|k| k == TEST_KEY));
}

#[tokio::test]
async fn test_pages_are_ordered_by_identifier() {
    let state = MockState::default().with_table("users", users(5));
    let base_url = spawn_mock(state.clone()).await;

    fetch_all_rows(&client(&base_url), "users", 2).await.unwrap();

    let orders = state.page_orders.lock().unwrap();
    assert_eq!(orders.len(), 3);
    assert!(orders.iter().all(|o| o.as_deref() == Some("id.asc")));
}

#[tokio::test]
async fn test_count_rows_reads_content_range() {
    let state = MockState::default().with_table("users", users(42));
    let base_url = spawn_mock(state).await;

    assert_eq!(client(&base_url).count_rows("users").await.unwrap(), 42);
    assert_eq!(client(&base_url).count_rows("empty").await.unwrap(), 0);
}

#[tokio::test]
async fn test_server_error_is_reported_with_status() {
    let base_url = spawn_mock(MockState::default()).await;

    let err = client(&base_url).fetch_page("broken", 0, 10).await.unwrap_err();

    match err {
        RemoteError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream unavailable");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

// =============================================================================
// Write Tests
// =============================================================================

#[tokio::test]
async fn test_upsert_merges_rows() {
    let state = MockState::default().with_table("users", users(2));
    let base_url = spawn_mock(state.clone()).await;

    let outcome = client(&base_url)
        .upsert_batch(
            "users",
            &[
                row(json!({"id": 2, "email": "changed@example.com"})),
                row(json!({"id": 3, "email": "new@example.com"})),
            ],
        )
        .await;

    assert_eq!(outcome, WriteOutcome::Ok);
    let rows = state.rows("users");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1]["email"], json!("changed@example.com"));
}

#[tokio::test]
async fn test_duplicate_key_is_classified() {
    let base_url = spawn_mock(MockState::default()).await;

    let outcome = client(&base_url)
        .upsert_batch("strict", &[row(json!({"id": 1}))])
        .await;

    match outcome {
        WriteOutcome::DuplicateKey(message) => {
            assert!(message.contains("Key (id)=(1) already exists."));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_generated_column_conflict_is_classified() {
    let base_url = spawn_mock(MockState::default()).await;

    let outcome = client(&base_url)
        .upsert_batch("invoices", &[row(json!({"id": 1, "total": 10}))])
        .await;

    assert!(matches!(outcome, WriteOutcome::GeneratedColumnConflict(_)));
}

#[tokio::test]
async fn test_update_row_patches_by_identifier() {
    let state = MockState::default().with_table("users", users(3));
    let base_url = spawn_mock(state.clone()).await;

    let outcome = client(&base_url)
        .update_row(
            "users",
            "id",
            &json!(2),
            &row(json!({"id": 2, "email": "patched@example.com"})),
        )
        .await;

    assert_eq!(outcome, WriteOutcome::Ok);
    assert_eq!(state.rows("users")[1]["email"], json!("patched@example.com"));
    assert_eq!(state.rows("users")[0]["email"], json!("user1@example.com"));
}

#[tokio::test]
async fn test_unreachable_store_is_a_write_error() {
    let outcome = client("http://127.0.0.1:9")
        .upsert_batch("users", &[row(json!({"id": 1}))])
        .await;

    assert!(matches!(outcome, WriteOutcome::Other(_)));
}

// =============================================================================
// Engine Over HTTP
// =============================================================================

#[tokio::test]
async fn test_backup_over_http() {
    let state = MockState::default()
        .with_table("users", users(3))
        .with_table("orders", Vec::new());
    let base_url = spawn_mock(state).await;
    let temp_dir = TempDir::new().unwrap();

    let mut config = Config::new(
        temp_dir.path(),
        vec!["users".to_string(), "orders".to_string(), "broken".to_string()],
    );
    config.remote_url = base_url.clone();
    config.remote_key = TEST_KEY.to_string();
    let ctx = Context::new(config, Arc::new(client(&base_url))).unwrap();

    let report = BackupOrchestrator::new(&ctx)
        .run(&BackupRequest::regular(&ctx.config))
        .await
        .unwrap();

    assert_eq!(report.snapshot.entry("users").and_then(|e| e.rows()).map(|r| r.len()), Some(3));
    assert_eq!(
        report.snapshot.entry("orders"),
        Some(&TableEntry::Materialized(Vec::new()))
    );
    assert_eq!(report.failed_tables(), ["broken".to_string()]);
}
