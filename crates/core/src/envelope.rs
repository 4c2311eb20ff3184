//! Job output contract: the success and error envelopes returned to the
//! worker runtime.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::media::ArtifactKind;

/// Caller-given asset name -> name assigned by ComfyUI on upload.
pub type NameMapping = IndexMap<String, String>;

/// One produced artifact, inlined as a data URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPayload {
    pub kind: ArtifactKind,
    pub filename: String,
    pub subfolder: String,
    /// ComfyUI storage class (`output`, `temp`, ...).
    #[serde(rename = "type")]
    pub storage: String,
    pub data_url: String,
}

/// Envelope for a job that ran to the end of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    pub prompt_id: String,
    /// `false` when the job timed out or reported an execution error.
    pub done: bool,
    /// Raw error events and timeout notes collected while tracking.
    pub ws_errors: Vec<String>,
    pub uploaded_images: NameMapping,
    pub outputs: Vec<ArtifactPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_worker: Option<bool>,
}

/// Envelope for a job that failed before producing a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub traceback: String,
    pub refresh_worker: bool,
}

/// What the worker runtime receives for one job: either envelope,
/// serialized without a wrapper.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobResponse {
    Success(JobOutput),
    Failure(ErrorEnvelope),
}

impl JobResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResponse::Success(_))
    }
}
