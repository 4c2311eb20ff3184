//! Scripted stand-ins for the ComfyUI gateway and event stream.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::{self, Message};

use comfybridge_comfyui::api::ComfyUIApiError;
use comfybridge_comfyui::client::{ComfyUIClientError, EventSource, EventStream};
use comfybridge_comfyui::gateway::BackendGateway;
use comfybridge_comfyui::history::HistoryRecord;
use comfybridge_core::config::BridgeConfig;
use comfybridge_core::job::WorkflowGraph;
use comfybridge_pipeline::orchestrator::JobOrchestrator;

pub const PROMPT_ID: &str = "p-1";

pub const DONE_FRAME: &str = r#"{"type":"executing","data":{"node":null,"prompt_id":"p-1"}}"#;

/// Configuration with every wait shortened for tests.
pub fn fast_config() -> BridgeConfig {
    BridgeConfig {
        connect_retries: 3,
        connect_sleep: Duration::from_millis(1),
        ws_recv_timeout: Duration::from_millis(50),
        ws_silent_max: 2,
        history_retries: 5,
        history_retry_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Scripted behaviour and recorded calls of [`FakeGateway`].
pub struct GatewayScript {
    /// Probes that fail before the backend answers.
    pub probe_failures: u32,
    /// `None` answers `/prompt` without a prompt id.
    pub prompt_id: Option<String>,
    /// History lookups that come back empty before `history`.
    pub history_misses: u32,
    /// Raw history record; `None` never appears.
    pub history: Option<Value>,
    pub files: HashMap<String, Vec<u8>>,
    pub panic_on_submit: bool,

    pub probes: u32,
    pub submitted: Vec<(WorkflowGraph, String)>,
    pub uploads: Vec<(String, Vec<u8>)>,
    pub history_calls: u32,
    pub fetched: Vec<(String, String, String)>,
}

impl Default for GatewayScript {
    fn default() -> Self {
        Self {
            probe_failures: 0,
            prompt_id: Some(PROMPT_ID.into()),
            history_misses: 0,
            history: Some(json!({"outputs": {}})),
            files: HashMap::new(),
            panic_on_submit: false,
            probes: 0,
            submitted: Vec::new(),
            uploads: Vec::new(),
            history_calls: 0,
            fetched: Vec::new(),
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeGateway {
    pub script: Arc<Mutex<GatewayScript>>,
}

impl FakeGateway {
    pub fn new(script: GatewayScript) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
        }
    }
}

/// `a.png` -> `a_001.png`, the way ComfyUI renames colliding uploads.
pub fn stored_name(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_001.{ext}"),
        None => format!("{name}_001"),
    }
}

#[async_trait]
impl BackendGateway for FakeGateway {
    async fn probe_ready(&self) -> Result<(), ComfyUIApiError> {
        let mut script = self.script.lock().unwrap();
        script.probes += 1;
        if script.probes <= script.probe_failures {
            return Err(ComfyUIApiError::ApiError {
                status: 503,
                body: "starting".into(),
            });
        }
        Ok(())
    }

    async fn submit(&self, workflow: &WorkflowGraph, client_id: &str) -> Result<String, ComfyUIApiError> {
        let mut script = self.script.lock().unwrap();
        if script.panic_on_submit {
            panic!("submit exploded");
        }
        script
            .submitted
            .push((workflow.clone(), client_id.to_string()));
        script
            .prompt_id
            .clone()
            .ok_or_else(|| ComfyUIApiError::SubmissionRejected(r#"{"error":"invalid prompt"}"#.into()))
    }

    async fn fetch_history(&self, _prompt_id: &str) -> Result<Option<HistoryRecord>, ComfyUIApiError> {
        let mut script = self.script.lock().unwrap();
        script.history_calls += 1;
        if script.history_misses > 0 {
            script.history_misses -= 1;
            return Ok(None);
        }
        Ok(script
            .history
            .clone()
            .map(|raw| serde_json::from_value(raw).unwrap()))
    }

    async fn fetch_artifact(
        &self,
        filename: &str,
        storage: &str,
        subfolder: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        let mut script = self.script.lock().unwrap();
        script
            .fetched
            .push((filename.into(), storage.into(), subfolder.into()));
        script
            .files
            .get(filename)
            .cloned()
            .ok_or_else(|| ComfyUIApiError::ApiError {
                status: 404,
                body: "404: Not Found".into(),
            })
    }

    async fn upload_asset(&self, name: &str, bytes: Vec<u8>) -> Result<String, ComfyUIApiError> {
        let mut script = self.script.lock().unwrap();
        script.uploads.push((name.to_string(), bytes));
        Ok(stored_name(name))
    }
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

/// Event source that replays the same frames to every subscriber.
#[derive(Clone, Default)]
pub struct FakeEvents {
    pub frames: Vec<String>,
    /// End the stream after the frames instead of going quiet.
    pub close_after: bool,
    pub refuse: bool,
    pub opened: Arc<Mutex<Vec<String>>>,
}

impl FakeEvents {
    pub fn with_frames(frames: &[&str]) -> Self {
        Self {
            frames: frames.iter().map(|f| f.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl EventSource for FakeEvents {
    async fn open(&self, client_id: &str) -> Result<EventStream, ComfyUIClientError> {
        if self.refuse {
            return Err(ComfyUIClientError::Connection(
                "Failed to connect to ComfyUI at ws://127.0.0.1:8188: refused".into(),
            ));
        }
        self.opened.lock().unwrap().push(client_id.to_string());

        let frames = stream::iter(
            self.frames
                .clone()
                .into_iter()
                .map(|f| Ok::<_, tungstenite::Error>(Message::text(f))),
        );
        if self.close_after {
            Ok(frames.boxed())
        } else {
            Ok(frames.chain(stream::pending()).boxed())
        }
    }
}

pub fn orchestrator(
    gateway: &FakeGateway,
    events: &FakeEvents,
    config: &BridgeConfig,
) -> JobOrchestrator<FakeGateway, FakeEvents> {
    JobOrchestrator::new(gateway.clone(), events.clone(), config)
}
