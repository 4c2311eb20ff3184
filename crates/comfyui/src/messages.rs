//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ComfyUIMessage`] enum.
//!
//! Payload shapes drift between ComfyUI builds, so most fields are
//! optional and unknown message types parse to [`ComfyUIMessage::Other`]
//! instead of failing.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// All ComfyUI WebSocket message types the bridge distinguishes.
#[derive(Debug, Clone)]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    Status(StatusData),

    /// A prompt has started executing.
    ExecutionStart(ExecutionStartData),

    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// A node has finished and produced output.
    Executed(ExecutedData),

    /// Execution failed with an error.
    ExecutionError(ErrorData),

    /// Any other message type (`execution_success`, `crystools.monitor`, ...).
    Other { kind: String },
}

/// Raw `{"type", "data"}` envelope with the payload left untyped.
///
/// Terminal decisions are made on this form so that a payload which
/// does not fit its typed struct cannot hide an error or a completion.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl RawEvent {
    /// `data.prompt_id`, when present as a string.
    pub fn prompt_id(&self) -> Option<&str> {
        self.data.get("prompt_id").and_then(Value::as_str)
    }

    /// `data.node`; `None` when absent or null.
    pub fn node(&self) -> Option<&Value> {
        self.data.get("node").filter(|node| !node.is_null())
    }

    /// Decode the payload into its typed variant.
    pub fn into_message(self) -> Result<ComfyUIMessage, serde_json::Error> {
        let RawEvent { kind, data } = self;
        let msg = match kind.as_str() {
            "status" => ComfyUIMessage::Status(serde_json::from_value(data)?),
            "execution_start" => ComfyUIMessage::ExecutionStart(serde_json::from_value(data)?),
            "execution_cached" => ComfyUIMessage::ExecutionCached(serde_json::from_value(data)?),
            "executing" => ComfyUIMessage::Executing(serde_json::from_value(data)?),
            "progress" => ComfyUIMessage::Progress(serde_json::from_value(data)?),
            "executed" => ComfyUIMessage::Executed(serde_json::from_value(data)?),
            "execution_error" => ComfyUIMessage::ExecutionError(serde_json::from_value(data)?),
            _ => ComfyUIMessage::Other { kind },
        };
        Ok(msg)
    }
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload for `execution_start` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    #[serde(default, deserialize_with = "lenient_id")]
    pub node: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i32,
    /// Total number of steps.
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ErrorData {
    #[serde(deserialize_with = "lenient_id")]
    pub prompt_id: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub node_id: Option<String>,
    #[serde(deserialize_with = "lenient_id")]
    pub node_type: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub exception_message: String,
    #[serde(deserialize_with = "lenient_text")]
    pub exception_type: String,
}

impl ComfyUIMessage {
    /// Wire name of the message type.
    pub fn kind(&self) -> &str {
        match self {
            ComfyUIMessage::Status(_) => "status",
            ComfyUIMessage::ExecutionStart(_) => "execution_start",
            ComfyUIMessage::ExecutionCached(_) => "execution_cached",
            ComfyUIMessage::Executing(_) => "executing",
            ComfyUIMessage::Progress(_) => "progress",
            ComfyUIMessage::Executed(_) => "executed",
            ComfyUIMessage::ExecutionError(_) => "execution_error",
            ComfyUIMessage::Other { kind } => kind,
        }
    }
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON, a missing `type`, or a known type
/// whose payload does not match. Unknown types are not an error.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    parse_event(text)?.into_message()
}

/// Parse only the `{"type", "data"}` envelope of a message.
///
/// Fails for malformed JSON or a missing `type`; `data` may be absent
/// or null.
pub fn parse_event(text: &str) -> Result<RawEvent, serde_json::Error> {
    serde_json::from_str(text)
}

/// Node and prompt ids arrive as strings, but some nodes report
/// numbers. Null and other shapes read as absent.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Free text that may be null or structured; non-strings are rendered
/// as JSON.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}
