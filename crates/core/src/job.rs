//! Job input contract.
//!
//! The worker runtime hands the bridge a loosely-typed JSON job:
//!
//! ```json
//! {"input": {"workflow": {...}, "images": [{"name": "a.png", "image": "data:..."}],
//!            "client_id": "...", "timeout": 120000},
//!  "timeout": 120000}
//! ```
//!
//! [`JobRequest::from_job`] validates the parts the bridge depends on and
//! normalises the rest.

use std::time::Duration;

use serde_json::Value;

use crate::error::CoreError;

/// A workflow in ComfyUI API format: node id -> node descriptor.
pub type WorkflowGraph = serde_json::Map<String, Value>;

/// Caller-supplied timeouts at or below this many milliseconds are ignored.
pub const TIMEOUT_FLOOR_MS: f64 = 1000.0;

/// One inline asset to upload before submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInput {
    /// Name the workflow uses to refer to the asset.
    pub name: String,
    /// Data URL or raw base64 payload.
    pub data: String,
}

/// A validated job ready for the pipeline.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub workflow: WorkflowGraph,
    pub assets: Vec<AssetInput>,
    /// Correlation id that scopes the event stream to this job.
    pub client_id: String,
    /// Overall deadline for tracking the job.
    pub timeout: Duration,
}

/// Identifies a submitted job on both channels: `prompt_id` on the
/// HTTP API, `client_id` on the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub prompt_id: String,
    pub client_id: String,
}

impl JobRequest {
    /// Validate a raw job and extract its parts.
    ///
    /// Fails with [`CoreError::InvalidInput`] when `input.workflow` is
    /// missing or not an object. Malformed optional fields fall back to
    /// defaults instead of failing the job.
    pub fn from_job(mut job: Value, default_timeout: Duration) -> Result<Self, CoreError> {
        let top_level_timeout = job.get("timeout").cloned();

        let mut input = match job.get_mut("input").map(Value::take) {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };

        let workflow = match input.remove("workflow") {
            Some(Value::Object(graph)) => graph,
            _ => {
                return Err(CoreError::InvalidInput(
                    "input.workflow (object) is required".into(),
                ))
            }
        };

        let timeout = [top_level_timeout.as_ref(), input.get("timeout")]
            .into_iter()
            .flatten()
            .find(|v| is_truthy(v))
            .and_then(effective_timeout)
            .unwrap_or(default_timeout);

        let client_id = match input.get("client_id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => generate_client_id(),
        };

        let assets = match input.remove("images") {
            Some(Value::Array(entries)) => entries.iter().filter_map(asset_from_entry).collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            workflow,
            assets,
            client_id,
            timeout,
        })
    }
}

/// Generate a fresh correlation id (UUID v4, simple hex form).
pub fn generate_client_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Convert a caller timeout in milliseconds into a deadline, if it is
/// numeric and above [`TIMEOUT_FLOOR_MS`].
fn effective_timeout(value: &Value) -> Option<Duration> {
    let ms = value.as_f64()?;
    if ms > TIMEOUT_FLOOR_MS {
        Duration::try_from_secs_f64(ms / 1000.0).ok()
    } else {
        None
    }
}

/// `0`, `""`, `false` and `null` count as "not supplied", so a falsy
/// top-level timeout defers to `input.timeout`.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Entries that are not objects or carry no image data are skipped.
fn asset_from_entry(entry: &Value) -> Option<AssetInput> {
    let entry = entry.as_object()?;

    let data = match entry.get("image") {
        Some(Value::String(data)) if !data.is_empty() => data.clone(),
        _ => return None,
    };

    let name = match entry.get("name") {
        Some(Value::String(name)) if !name.is_empty() => name.clone(),
        _ => format!("input_{}.png", generate_client_id()),
    };

    Some(AssetInput { name, data })
}
