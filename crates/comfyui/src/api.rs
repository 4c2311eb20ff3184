//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (readiness probe, workflow submission,
//! history retrieval, file download and input upload) using [`reqwest`].

use std::time::Duration;

use comfybridge_core::config::BridgeConfig;
use comfybridge_core::job::WorkflowGraph;
use serde::Deserialize;

use crate::history::HistoryRecord;

/// Endpoints probed for readiness, in order. Older ComfyUI builds lack
/// `/system_stats`.
const READINESS_ENDPOINTS: [&str; 2] = ["/system_stats", "/object_info"];

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    /// Timeout for uploads and downloads, which carry file bodies.
    transfer_timeout: Duration,
}

/// Response returned by the ComfyUI `/prompt` endpoint.
///
/// `prompt_id` is optional here so that a response without one can be
/// reported as a rejection rather than a decode failure.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: Option<String>,
    /// Position in the execution queue.
    pub number: Option<i64>,
}

/// Response returned by `/upload/image`.
#[derive(Debug, Deserialize)]
struct UploadResponse {
    name: Option<String>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// `/prompt` answered without a `prompt_id`.
    #[error("ComfyUI /prompt did not return prompt_id: {0}")]
    SubmissionRejected(String),

    /// A 2xx response whose body did not have the expected shape.
    #[error("Unexpected ComfyUI response: {0}")]
    InvalidResponse(String),
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url`          - Base HTTP URL, e.g. `http://host:8188`.
    /// * `request_timeout`  - Bound on every JSON control call.
    /// * `transfer_timeout` - Bound on uploads and file downloads.
    pub fn new(
        api_url: String,
        request_timeout: Duration,
        transfer_timeout: Duration,
    ) -> Result<Self, ComfyUIApiError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            transfer_timeout,
        })
    }

    /// Build a client from the bridge configuration.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ComfyUIApiError> {
        Self::new(
            config.http_url(),
            config.request_timeout,
            config.transfer_timeout,
        )
    }

    /// HTTP API base URL (e.g. `http://host:8188`).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Check whether ComfyUI is answering HTTP requests.
    ///
    /// Any 2xx from one of the readiness endpoints counts as ready. The
    /// error from the last endpoint tried is returned otherwise.
    pub async fn probe_ready(&self) -> Result<(), ComfyUIApiError> {
        let mut last_err = None;
        for endpoint in READINESS_ENDPOINTS {
            let result = self
                .client
                .get(format!("{}{endpoint}", self.api_url))
                .send()
                .await;
            match result {
                Ok(response) => match Self::check_status(response).await {
                    Ok(()) => return Ok(()),
                    Err(e) => last_err = Some(e),
                },
                Err(e) => last_err = Some(e.into()),
            }
        }
        Err(last_err.unwrap_or_else(|| ComfyUIApiError::InvalidResponse("no readiness endpoint".into())))
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. Returns the server-assigned `prompt_id`.
    pub async fn submit_workflow(
        &self,
        workflow: &WorkflowGraph,
        client_id: &str,
    ) -> Result<String, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        let raw: serde_json::Value = Self::parse_response(response).await?;
        let submitted: SubmitResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ComfyUIApiError::InvalidResponse(format!("/prompt: {e}")))?;

        match submitted.prompt_id {
            Some(prompt_id) if !prompt_id.is_empty() => {
                tracing::debug!(prompt_id = %prompt_id, number = ?submitted.number, "Prompt queued");
                Ok(prompt_id)
            }
            _ => Err(ComfyUIApiError::SubmissionRejected(raw.to_string())),
        }
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. Returns `None` while
    /// ComfyUI has no (or an empty) entry for the prompt.
    pub async fn get_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryRecord>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        let mut raw: serde_json::Value = Self::parse_response(response).await?;
        let entry = match raw.get_mut(prompt_id).map(serde_json::Value::take) {
            None | Some(serde_json::Value::Null) => return Ok(None),
            Some(serde_json::Value::Object(map)) if map.is_empty() => return Ok(None),
            Some(entry) => entry,
        };

        serde_json::from_value(entry)
            .map(Some)
            .map_err(|e| ComfyUIApiError::InvalidResponse(format!("/history/{prompt_id}: {e}")))
    }

    /// Download a stored file via `GET /view`.
    ///
    /// `subfolder` is only sent when non-empty.
    pub async fn view(
        &self,
        filename: &str,
        storage: &str,
        subfolder: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        let mut params = vec![("filename", filename), ("type", storage)];
        if !subfolder.is_empty() {
            params.push(("subfolder", subfolder));
        }

        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&params)
            .timeout(self.transfer_timeout)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Upload an input image via multipart `POST /upload/image`.
    ///
    /// Returns the filename ComfyUI stored it under, which may differ
    /// from `name` when a file with that name already exists.
    pub async fn upload_image(&self, name: &str, bytes: Vec<u8>) -> Result<String, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(name.to_string());
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .timeout(self.transfer_timeout)
            .send()
            .await?;

        let uploaded: UploadResponse = Self::parse_response(response).await?;
        uploaded
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ComfyUIApiError::InvalidResponse("/upload/image returned no name".into()))
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}
