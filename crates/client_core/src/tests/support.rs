//! In-process expense API used by the client_core tests.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use shared::{
    domain::{Amount, Expense, ExpenseId},
    protocol::{
        AttachFileRequest, CreateExpenseRequest, ExpenseListResponse, ExpenseResponse,
        HealthResponse, SignUploadRequest, SignUploadResponse,
    },
};
use tokio::{
    net::TcpListener,
    sync::{Mutex, Notify},
};

use crate::config::ClientSettings;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub route: &'static str,
    pub cookie: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

#[derive(Default)]
pub struct MockApi {
    pub origin: String,
    pub expenses: Vec<Expense>,
    pub next_id: i64,
    pub failures: HashMap<&'static str, (StatusCode, String)>,
    pub gates: HashMap<&'static str, Arc<Notify>>,
    pub hits: Vec<RecordedRequest>,
    pub objects: HashMap<String, (String, Vec<u8>)>,
    next_object: u64,
}

#[derive(Clone)]
pub struct MockServer {
    pub api_url: String,
    pub state: Arc<Mutex<MockApi>>,
}

impl MockServer {
    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            api_base_url: self.api_url.clone(),
            ..ClientSettings::default()
        }
    }

    pub async fn fail(&self, route: &'static str, status: StatusCode, body: &str) {
        self.state
            .lock()
            .await
            .failures
            .insert(route, (status, body.to_string()));
    }

    pub async fn clear_failure(&self, route: &'static str) {
        self.state.lock().await.failures.remove(route);
    }

    /// Holds requests to `route` until the returned handle is notified.
    pub async fn gate(&self, route: &'static str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.state
            .lock()
            .await
            .gates
            .insert(route, Arc::clone(&notify));
        notify
    }

    pub async fn hits(&self, route: &str) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .await
            .hits
            .iter()
            .filter(|hit| hit.route == route)
            .cloned()
            .collect()
    }

    pub async fn hit_count(&self, route: &str) -> usize {
        self.hits(route).await.len()
    }

    pub async fn wait_for_hits(&self, route: &str, count: usize) {
        for _ in 0..200 {
            if self.hit_count(route).await >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {count} hit(s) on {route}");
    }

    pub async fn expenses(&self) -> Vec<Expense> {
        self.state.lock().await.expenses.clone()
    }
}

pub fn expense(id: i64, title: &str, amount: u64) -> Expense {
    Expense {
        id: ExpenseId(id),
        title: title.to_string(),
        amount: Amount::new(amount).expect("positive amount"),
        file_url: None,
    }
}

/// Records the hit and applies any configured gate or failure for `route`.
async fn intake(
    state: &Arc<Mutex<MockApi>>,
    route: &'static str,
    headers: &HeaderMap,
    body: Bytes,
) -> Option<Response> {
    let header_text = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let gate = {
        let mut guard = state.lock().await;
        guard.hits.push(RecordedRequest {
            route,
            cookie: header_text(header::COOKIE),
            content_type: header_text(header::CONTENT_TYPE),
            body,
        });
        guard.gates.get(route).cloned()
    };
    if let Some(gate) = gate {
        gate.notified().await;
    }
    let guard = state.lock().await;
    guard
        .failures
        .get(route)
        .map(|(status, body)| (*status, body.clone()).into_response())
}

async fn list_expenses(State(state): State<Arc<Mutex<MockApi>>>, headers: HeaderMap) -> Response {
    if let Some(failure) = intake(&state, "list", &headers, Bytes::new()).await {
        return failure;
    }
    let expenses = state.lock().await.expenses.clone();
    Json(ExpenseListResponse { expenses }).into_response()
}

async fn create_expense(
    State(state): State<Arc<Mutex<MockApi>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(failure) = intake(&state, "create", &headers, body.clone()).await {
        return failure;
    }
    let Ok(request) = serde_json::from_slice::<CreateExpenseRequest>(&body) else {
        return (StatusCode::BAD_REQUEST, "malformed expense").into_response();
    };
    let mut guard = state.lock().await;
    guard.next_id += 1;
    let created = Expense {
        id: ExpenseId(guard.next_id),
        title: request.title,
        amount: request.amount,
        file_url: None,
    };
    guard.expenses.push(created.clone());
    Json(ExpenseResponse { expense: created }).into_response()
}

async fn get_expense(
    State(state): State<Arc<Mutex<MockApi>>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if let Some(failure) = intake(&state, "get", &headers, Bytes::new()).await {
        return failure;
    }
    let guard = state.lock().await;
    match guard.expenses.iter().find(|e| e.id == ExpenseId(id)) {
        Some(expense) => Json(ExpenseResponse {
            expense: expense.clone(),
        })
        .into_response(),
        None => (StatusCode::NOT_FOUND, "Expense not found").into_response(),
    }
}

async fn delete_expense(
    State(state): State<Arc<Mutex<MockApi>>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if let Some(failure) = intake(&state, "delete", &headers, Bytes::new()).await {
        return failure;
    }
    let mut guard = state.lock().await;
    let before = guard.expenses.len();
    guard.expenses.retain(|e| e.id != ExpenseId(id));
    if guard.expenses.len() == before {
        return (StatusCode::NOT_FOUND, "Expense not found").into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn attach_file(
    State(state): State<Arc<Mutex<MockApi>>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(failure) = intake(&state, "attach", &headers, body.clone()).await {
        return failure;
    }
    let Ok(request) = serde_json::from_slice::<AttachFileRequest>(&body) else {
        return (StatusCode::BAD_REQUEST, "malformed attach request").into_response();
    };
    let mut guard = state.lock().await;
    let file_url = format!("{}/storage/{}", guard.origin, request.file_key);
    match guard.expenses.iter_mut().find(|e| e.id == ExpenseId(id)) {
        Some(expense) => {
            expense.file_url = Some(file_url);
            StatusCode::OK.into_response()
        }
        None => (StatusCode::NOT_FOUND, "Expense not found").into_response(),
    }
}

async fn sign_upload(
    State(state): State<Arc<Mutex<MockApi>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(failure) = intake(&state, "sign", &headers, body.clone()).await {
        return failure;
    }
    let Ok(request) = serde_json::from_slice::<SignUploadRequest>(&body) else {
        return (StatusCode::BAD_REQUEST, "malformed sign request").into_response();
    };
    let mut guard = state.lock().await;
    guard.next_object += 1;
    let key = format!("receipt-{}-{}", guard.next_object, request.filename);
    Json(SignUploadResponse {
        upload_url: format!("{}/storage/{key}?signature=test", guard.origin),
        key,
    })
    .into_response()
}

async fn store_object(
    State(state): State<Arc<Mutex<MockApi>>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(failure) = intake(&state, "storage", &headers, body.clone()).await {
        return failure;
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state
        .lock()
        .await
        .objects
        .insert(key, (content_type, body.to_vec()));
    StatusCode::OK.into_response()
}

async fn health(State(state): State<Arc<Mutex<MockApi>>>, headers: HeaderMap) -> Response {
    if let Some(failure) = intake(&state, "health", &headers, Bytes::new()).await {
        return failure;
    }
    Json(HealthResponse {
        status: "healthy".into(),
    })
    .into_response()
}

pub async fn spawn_mock_server(seed: Vec<Expense>) -> MockServer {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let origin = format!("http://{addr}");
    let next_id = seed.iter().map(|e| e.id.0).max().unwrap_or(0);
    let state = Arc::new(Mutex::new(MockApi {
        origin: origin.clone(),
        expenses: seed,
        next_id,
        ..MockApi::default()
    }));

    let app = Router::new()
        .route("/api/expenses", get(list_expenses).post(create_expense))
        .route(
            "/api/expenses/:id",
            get(get_expense).put(attach_file).delete(delete_expense),
        )
        .route("/api/upload/sign", post(sign_upload))
        .route("/storage/:key", put(store_object))
        .route("/health", get(health))
        .with_state(Arc::clone(&state));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockServer {
        api_url: format!("{origin}/api"),
        state,
    }
}
