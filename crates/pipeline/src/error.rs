//! Job-level error taxonomy.
//!
//! Every failure that aborts a job ends up as a [`JobError`]; the
//! boundary handler turns it into the error envelope. Stream errors and
//! tracking timeouts are not errors here: they travel in `ws_errors`.

use comfybridge_comfyui::api::ComfyUIApiError;
use comfybridge_comfyui::client::ComfyUIClientError;
use comfybridge_comfyui::readiness::NotReady;
use comfybridge_core::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The backend could not be reached at all (never ready, connection
    /// refused, request timed out).
    #[error("ComfyUI unreachable: {0}")]
    BackendUnreachable(String),

    /// A gateway call answered with a non-2xx status.
    #[error("ComfyUI returned {status}: {body}")]
    Backend { status: u16, body: String },

    /// A 2xx answer whose body was not what the gateway expected.
    #[error("Unexpected ComfyUI response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid asset encoding: {0}")]
    InvalidAssetEncoding(String),

    #[error("ComfyUI rejected the workflow: {0}")]
    SubmissionRejected(String),

    #[error("History for prompt {prompt_id} not available after {attempts} attempts")]
    HistoryUnavailable { prompt_id: String, attempts: u32 },

    #[error("Failed to fetch artifact {filename}")]
    ArtifactFetchFailed {
        filename: String,
        #[source]
        source: ComfyUIApiError,
    },
}

impl From<CoreError> for JobError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidInput(msg) => JobError::InvalidInput(msg),
            CoreError::InvalidAssetEncoding(msg) => JobError::InvalidAssetEncoding(msg),
            // Configuration is validated before any job runs.
            e @ CoreError::Config { .. } => JobError::InvalidInput(e.to_string()),
        }
    }
}

impl From<ComfyUIApiError> for JobError {
    fn from(err: ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::Request(e) if e.is_decode() => JobError::InvalidResponse(e.to_string()),
            ComfyUIApiError::Request(e) => JobError::BackendUnreachable(e.to_string()),
            ComfyUIApiError::ApiError { status, body } => JobError::Backend { status, body },
            ComfyUIApiError::SubmissionRejected(body) => JobError::SubmissionRejected(body),
            ComfyUIApiError::InvalidResponse(msg) => JobError::InvalidResponse(msg),
        }
    }
}

impl From<ComfyUIClientError> for JobError {
    fn from(err: ComfyUIClientError) -> Self {
        JobError::BackendUnreachable(err.to_string())
    }
}

impl From<NotReady> for JobError {
    fn from(err: NotReady) -> Self {
        JobError::BackendUnreachable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn api_status_maps_to_backend() {
        let err: JobError = ComfyUIApiError::ApiError {
            status: 500,
            body: "boom".into(),
        }
        .into();
        assert_matches!(err, JobError::Backend { status: 500, .. });
    }

    #[test]
    fn missing_prompt_id_maps_to_submission_rejected() {
        let err: JobError = ComfyUIApiError::SubmissionRejected("{}".into()).into();
        assert_matches!(err, JobError::SubmissionRejected(_));
    }

    #[test]
    fn not_ready_maps_to_unreachable() {
        let err: JobError = NotReady {
            attempts: 3,
            last_error: "connection refused".into(),
        }
        .into();
        assert_matches!(err, JobError::BackendUnreachable(msg) if msg.contains("3 attempts"));
    }

    #[test]
    fn ws_connect_failure_maps_to_unreachable() {
        let err: JobError = ComfyUIClientError::Connection("refused".into()).into();
        assert_matches!(err, JobError::BackendUnreachable(_));
    }

    #[test]
    fn core_errors_keep_their_class() {
        let err: JobError = CoreError::InvalidAssetEncoding("bad".into()).into();
        assert_matches!(err, JobError::InvalidAssetEncoding(_));
        let err: JobError = CoreError::InvalidInput("bad".into()).into();
        assert_matches!(err, JobError::InvalidInput(_));
    }

    #[test]
    fn artifact_failure_keeps_source() {
        let err = JobError::ArtifactFetchFailed {
            filename: "out.png".into(),
            source: ComfyUIApiError::ApiError {
                status: 404,
                body: "not found".into(),
            },
        };
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("404"));
    }
}
