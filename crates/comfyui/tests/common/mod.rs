//! In-process stand-in for a ComfyUI server.
//!
//! Serves the subset of the ComfyUI HTTP and WebSocket API the bridge
//! uses, with scripted responses and a record of what was received.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Scripted behaviour and recorded traffic.
#[derive(Default)]
pub struct Script {
    /// When false, `/system_stats` answers 404 (older ComfyUI builds).
    pub has_system_stats: bool,
    /// When false, `/prompt` answers without a `prompt_id`.
    pub accept_prompts: bool,
    pub prompt_id: String,
    /// Number of `/history` calls answered with `{}` before the record.
    pub history_misses: u32,
    pub history_record: Value,
    /// Files served by `/view`, keyed by filename.
    pub files: HashMap<String, Vec<u8>>,
    /// Text frames pushed to every WebSocket client after connecting.
    pub ws_frames: Vec<String>,
    /// Close the socket after the scripted frames instead of idling.
    pub ws_close_after_frames: bool,

    pub submitted: Vec<Value>,
    pub history_calls: u32,
    pub view_queries: Vec<HashMap<String, String>>,
    pub uploads: Vec<(String, Vec<u8>)>,
    pub ws_client_ids: Vec<String>,
}

pub type Shared = Arc<Mutex<Script>>;

pub fn script() -> Script {
    Script {
        has_system_stats: true,
        accept_prompts: true,
        prompt_id: "p-1".into(),
        history_record: json!({"outputs": {}}),
        ..Default::default()
    }
}

/// Start the fake server on an ephemeral port.
pub async fn spawn(script: Script) -> (SocketAddr, Shared) {
    let shared: Shared = Arc::new(Mutex::new(script));

    let app = Router::new()
        .route("/system_stats", get(system_stats))
        .route("/object_info", get(object_info))
        .route("/prompt", post(prompt))
        .route("/history/{prompt_id}", get(history))
        .route("/view", get(view))
        .route("/upload/image", post(upload))
        .route("/ws", get(ws))
        .with_state(shared.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, shared)
}

/// Name the fake assigns to an upload: `a.png` -> `a_001.png`.
pub fn stored_name(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_001.{ext}"),
        None => format!("{name}_001"),
    }
}

async fn system_stats(State(shared): State<Shared>) -> impl IntoResponse {
    if shared.lock().unwrap().has_system_stats {
        (StatusCode::OK, Json(json!({"system": {"os": "posix"}})))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({})))
    }
}

async fn object_info() -> Json<Value> {
    Json(json!({"KSampler": {}}))
}

async fn prompt(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut script = shared.lock().unwrap();
    script.submitted.push(body);
    if script.accept_prompts {
        Json(json!({"prompt_id": script.prompt_id, "number": 0, "node_errors": {}}))
    } else {
        Json(json!({"error": "queue full", "node_errors": {}}))
    }
}

async fn history(State(shared): State<Shared>, Path(prompt_id): Path<String>) -> Json<Value> {
    let mut script = shared.lock().unwrap();
    script.history_calls += 1;
    if script.history_misses > 0 {
        script.history_misses -= 1;
        return Json(json!({}));
    }
    let mut body = serde_json::Map::new();
    body.insert(prompt_id, script.history_record.clone());
    Json(Value::Object(body))
}

async fn view(
    State(shared): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Vec<u8>, StatusCode> {
    let mut script = shared.lock().unwrap();
    let bytes = query
        .get("filename")
        .and_then(|name| script.files.get(name))
        .cloned();
    script.view_queries.push(query);
    bytes.ok_or(StatusCode::NOT_FOUND)
}

async fn upload(State(shared): State<Shared>, mut multipart: Multipart) -> Json<Value> {
    let mut stored = Vec::new();
    while let Some(field) = multipart.next_field().await.unwrap() {
        if field.name() != Some("image") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("unnamed").to_string();
        let bytes = field.bytes().await.unwrap().to_vec();
        stored.push(stored_name(&file_name));
        shared.lock().unwrap().uploads.push((file_name, bytes));
    }
    Json(json!({"name": stored.first().cloned().unwrap_or_default(), "subfolder": "", "type": "input"}))
}

async fn ws(
    State(shared): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    let (frames, close_after) = {
        let mut script = shared.lock().unwrap();
        script
            .ws_client_ids
            .push(query.get("clientId").cloned().unwrap_or_default());
        (script.ws_frames.clone(), script.ws_close_after_frames)
    };

    upgrade.on_upgrade(move |mut socket| async move {
        for frame in frames {
            if socket.send(Message::Text(frame.into())).await.is_err() {
                return;
            }
        }
        if close_after {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
        // Idle until the client goes away.
        while let Some(Ok(_)) = socket.recv().await {}
    })
}
