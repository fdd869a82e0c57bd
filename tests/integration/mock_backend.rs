//! In-process tutor backend for integration tests.
//!
//! Serves the HTTP API under `/api` and the streaming endpoint at `/ws`.
//! Every handler bumps a counter so tests can assert exactly which calls the
//! client made.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use zth_client::Config;

/// Access token issued by a successful login.
pub const LOGIN_TOKEN: &str = "access-login";
/// Access token issued by a successful refresh.
pub const REFRESHED_TOKEN: &str = "access-refreshed";
/// Refresh token issued by a successful login.
pub const REFRESH_TOKEN: &str = "refresh-1";
/// Fragments streamed for every socket message.
pub const FRAGMENTS: [&str; 3] = ["Hel", "lo ", "there"];

/// Call counters.
#[derive(Debug, Default)]
pub struct Counters {
    pub chat: AtomicUsize,
    pub status: AtomicUsize,
    pub refresh: AtomicUsize,
    pub code_load: AtomicUsize,
    pub reset: AtomicUsize,
    pub ws_connections: AtomicUsize,
    pub ws_messages: AtomicUsize,
    pub unauthorized: AtomicUsize,
}

fn count(counter: &AtomicUsize) -> usize {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

/// Reads a counter.
pub fn hits(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// Shared state of the mock backend.
#[derive(Debug)]
pub struct MockState {
    pub counters: Counters,
    /// Code stored per problem by `/code/save`.
    pub saved_code: Mutex<HashMap<u64, String>>,
    /// Every `/code/save` body, in order.
    pub saves: Mutex<Vec<(u64, String)>>,
    /// When set, protected routes require `Bearer <valid_token>`.
    pub auth_required: AtomicBool,
    pub valid_token: Mutex<String>,
    /// When false, `/auth/refresh` answers 401.
    pub refresh_succeeds: AtomicBool,
    /// When set, protected routes answer 401 no matter the token.
    pub reject_all: AtomicBool,
    /// Log sent with the socket `final` event, if any.
    pub final_history: Mutex<Option<Value>>,
    /// When set, the socket closes after the first fragment.
    pub drop_mid_stream: AtomicBool,
    /// When set, the `final` event carries a log the client cannot parse.
    pub garbled_final: AtomicBool,
    /// Authorization header of the latest socket handshake.
    pub ws_authorization: Mutex<Option<String>>,
    /// Latest chat body received over either path.
    pub last_chat: Mutex<Option<Value>>,
    /// Settings stored by `/settings/:key`.
    pub settings: Mutex<serde_json::Map<String, Value>>,
    kick: broadcast::Sender<()>,
}

impl Default for MockState {
    fn default() -> Self {
        let (kick, _) = broadcast::channel(4);
        Self {
            counters: Counters::default(),
            saved_code: Mutex::new(HashMap::new()),
            saves: Mutex::new(Vec::new()),
            auth_required: AtomicBool::new(false),
            valid_token: Mutex::new(LOGIN_TOKEN.to_string()),
            refresh_succeeds: AtomicBool::new(true),
            reject_all: AtomicBool::new(false),
            final_history: Mutex::new(None),
            drop_mid_stream: AtomicBool::new(false),
            garbled_final: AtomicBool::new(false),
            ws_authorization: Mutex::new(None),
            last_chat: Mutex::new(None),
            settings: Mutex::new(serde_json::Map::new()),
            kick,
        }
    }
}

impl MockState {
    /// Closes every open socket from the server side.
    pub fn kick_sockets(&self) {
        let _ = self.kick.send(());
    }

    pub fn saves(&self) -> Vec<(u64, String)> {
        self.saves.lock().unwrap().clone()
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), Response> {
        if !self.auth_required.load(Ordering::SeqCst) {
            return Ok(());
        }
        let expected = format!("Bearer {}", self.valid_token.lock().unwrap());
        let presented = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        if self.reject_all.load(Ordering::SeqCst) || presented != Some(expected.as_str()) {
            count(&self.counters.unauthorized);
            return Err(error(StatusCode::UNAUTHORIZED, "Invalid or expired token"));
        }
        Ok(())
    }
}

/// A running mock backend.
pub struct MockBackend {
    pub state: Arc<MockState>,
    pub api_url: String,
    pub ws_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl MockBackend {
    /// Client configuration pointing at this backend.
    pub fn config(&self) -> Config {
        Config {
            api_base_url: self.api_url.clone(),
            ws_url: self.ws_url.clone(),
            reconnect_delay_ms: 100,
            request_timeout_secs: 5,
            ..Config::default()
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Starts a backend on an ephemeral port.
pub async fn spawn() -> MockBackend {
    let state = Arc::new(MockState::default());
    let router = router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(20)).await;

    MockBackend {
        state,
        api_url: format!("http://{addr}/api"),
        ws_url: format!("ws://{addr}/ws"),
        handle,
    }
}

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/chat", post(chat))
        .route("/api/evaluate-code", post(evaluate_code))
        .route("/api/clear-session", post(clear_session))
        .route("/api/code/load/:id", get(load_code))
        .route("/api/code/save", post(save_code))
        .route("/api/problems", get(list_problems))
        .route("/api/filters", get(filters))
        .route("/api/problems/:id", post(select_problem))
        .route("/api/problems/:id/completion", post(set_completion))
        .route("/api/problem/reset", post(reset_problem))
        .route("/api/settings", get(get_settings))
        .route("/api/settings/:key", post(set_setting))
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/auth/profile", get(profile).put(update_profile))
        .route("/api/auth/change-password", post(change_password))
        .route("/api/auth/delete-account", delete(delete_account))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Template served for problem `id`.
pub fn template_for(id: u64) -> String {
    format!("def p{id}(): pass")
}

/// Problem served for `id`.
pub fn problem(id: u64) -> Value {
    json!({
        "id": id,
        "title": format!("Problem {id}"),
        "difficulty": "Easy",
        "description": format!("Solve problem {id}"),
        "template_code": template_for(id),
        "completed": false,
        "problem_types": ["arrays"],
    })
}

fn entry(role: &str, content: &str) -> Value {
    json!({ "role": role, "content": content, "timestamp": "2024-01-01T00:00:00.000Z" })
}

fn user() -> Value {
    json!({ "id": 1, "username": "ada", "email": "ada@example.com" })
}

// ============================================================================
// Conversation
// ============================================================================

async fn status(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    count(&state.counters.status);
    Json(json!({
        "conversation_history": [entry("assistant", "Welcome back")],
        "current_problem": problem(1),
    }))
    .into_response()
}

async fn chat(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    count(&state.counters.chat);
    let message = body["message"].as_str().unwrap_or_default().to_string();
    *state.last_chat.lock().unwrap() = Some(body);

    if message.contains("next problem") {
        return Json(json!({
            "conversation_history": [entry("user", &message), entry("assistant", "Here is problem 3")],
            "current_problem": problem(3),
            "problem_changed": true,
        }))
        .into_response();
    }

    Json(json!({
        "conversation_history": [entry("user", &message), entry("assistant", &format!("Echo: {message}"))],
        "current_problem": problem(1),
    }))
    .into_response()
}

async fn evaluate_code(Json(body): Json<Value>) -> Response {
    let code = body["code"].as_str().unwrap_or_default();
    Json(json!({
        "conversation_history": [entry("assistant", &format!("Reviewed {} lines", code.lines().count()))],
    }))
    .into_response()
}

async fn clear_session() -> Response {
    Json(json!({ "message": "Session cleared successfully" })).into_response()
}

// ============================================================================
// Code
// ============================================================================

async fn load_code(State(state): State<Arc<MockState>>, Path(id): Path<u64>) -> Response {
    count(&state.counters.code_load);
    let code = state.saved_code.lock().unwrap().get(&id).cloned();
    Json(json!({ "code": code })).into_response()
}

async fn save_code(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    let id = body["problem_id"].as_u64().unwrap_or_default();
    let code = body["code"].as_str().unwrap_or_default().to_string();
    state.saved_code.lock().unwrap().insert(id, code.clone());
    state.saves.lock().unwrap().push((id, code));
    Json(json!({ "message": "Code saved" })).into_response()
}

// ============================================================================
// Problems
// ============================================================================

async fn list_problems(Query(params): Query<Vec<(String, String)>>) -> Response {
    let search = params
        .iter()
        .find(|(k, _)| k == "search")
        .map(|(_, v)| v.clone());
    let problems: Vec<Value> = (1..=3)
        .map(|id| {
            json!({
                "id": id,
                "title": format!("Problem {id}"),
                "difficulty": "Easy",
                "problem_types": ["arrays"],
            })
        })
        .filter(|p| {
            search
                .as_deref()
                .map_or(true, |s| p["title"].as_str().unwrap_or_default().contains(s))
        })
        .collect();
    Json(json!({
        "problems": problems,
        "total": problems.len(),
        "page": 1,
        "per_page": 20,
        "has_more": false,
    }))
    .into_response()
}

async fn filters() -> Response {
    Json(json!({
        "difficulties": ["Easy", "Medium", "Hard"],
        "problem_types": ["arrays", "graphs"],
    }))
    .into_response()
}

async fn select_problem(Path(id): Path<u64>) -> Response {
    Json(json!({
        "conversation_history": [entry("system", &format!("Loaded problem {id}"))],
        "problem": problem(id),
    }))
    .into_response()
}

async fn set_completion(Path(_id): Path<u64>, Json(_body): Json<Value>) -> Response {
    Json(json!({ "message": "ok" })).into_response()
}

async fn reset_problem(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    count(&state.counters.reset);
    if let Some(id) = body["problem_id"].as_u64() {
        state.saved_code.lock().unwrap().remove(&id);
    }
    Json(json!({ "message": "Problem reset" })).into_response()
}

// ============================================================================
// Settings
// ============================================================================

async fn get_settings(State(state): State<Arc<MockState>>) -> Response {
    let settings = state.settings.lock().unwrap().clone();
    Json(json!({ "settings": settings })).into_response()
}

async fn set_setting(
    State(state): State<Arc<MockState>>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    state
        .settings
        .lock()
        .unwrap()
        .insert(key, body["value"].clone());
    Json(json!({ "message": "ok" })).into_response()
}

// ============================================================================
// Authentication
// ============================================================================

fn issue_session(state: &MockState) -> Response {
    *state.valid_token.lock().unwrap() = LOGIN_TOKEN.to_string();
    Json(json!({
        "user": user(),
        "access_token": LOGIN_TOKEN,
        "refresh_token": REFRESH_TOKEN,
    }))
    .into_response()
}

async fn login(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    if body["password"] != "secret" {
        return error(StatusCode::UNAUTHORIZED, "Invalid username or password");
    }
    issue_session(&state)
}

async fn register(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    if body["email"].as_str().map_or(true, |e| !e.contains('@')) {
        return error(StatusCode::BAD_REQUEST, "Invalid email address");
    }
    issue_session(&state)
}

async fn refresh(State(state): State<Arc<MockState>>, Json(body): Json<Value>) -> Response {
    count(&state.counters.refresh);
    if !state.refresh_succeeds.load(Ordering::SeqCst) || body["refresh_token"].is_null() {
        return error(StatusCode::UNAUTHORIZED, "Invalid refresh token");
    }
    *state.valid_token.lock().unwrap() = REFRESHED_TOKEN.to_string();
    Json(json!({ "access_token": REFRESHED_TOKEN })).into_response()
}

async fn profile(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    Json(json!({ "user": user() })).into_response()
}

async fn update_profile(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    let mut updated = user();
    if let Some(name) = body["username"].as_str() {
        updated["username"] = json!(name);
    }
    if let Some(email) = body["email"].as_str() {
        updated["email"] = json!(email);
    }
    Json(json!({ "user": updated })).into_response()
}

async fn change_password(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    if body["current_password"] != "secret" {
        return error(StatusCode::BAD_REQUEST, "Current password is incorrect");
    }
    Json(json!({ "message": "Password changed" })).into_response()
}

async fn delete_account(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(_body): Json<Value>,
) -> Response {
    if let Err(rejection) = state.authorize(&headers) {
        return rejection;
    }
    Json(json!({ "message": "Account deleted" })).into_response()
}

// ============================================================================
// Streaming
// ============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<MockState>>,
) -> Response {
    count(&state.counters.ws_connections);
    *state.ws_authorization.lock().unwrap() = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    // Subscribe before the handshake completes so an immediate kick is seen.
    let kick = state.kick.subscribe();
    ws.on_upgrade(move |socket| ws_session(socket, state, kick))
}

async fn ws_session(
    mut socket: WebSocket,
    state: Arc<MockState>,
    mut kick: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = kick.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { return };
                let Message::Text(text) = msg else { continue };
                count(&state.counters.ws_messages);
                let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                *state.last_chat.lock().unwrap() = Some(body);

                for fragment in FRAGMENTS {
                    let frame = json!({ "type": "token", "token": fragment }).to_string();
                    if socket.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                    if state.drop_mid_stream.load(Ordering::SeqCst) {
                        let _ = socket.send(Message::Close(None)).await;
                        return;
                    }
                }

                let history = state.final_history.lock().unwrap().clone();
                let frame = if state.garbled_final.load(Ordering::SeqCst) {
                    json!({ "type": "final", "conversation_history": [{ "role": "bot" }] })
                } else {
                    match history {
                        Some(history) => json!({ "type": "final", "conversation_history": history }),
                        None => json!({ "type": "final" }),
                    }
                };
                if socket.send(Message::Text(frame.to_string())).await.is_err() {
                    return;
                }
            }
        }
    }
}
