//! The backend seam used by the job pipeline.
//!
//! [`BackendGateway`] lists the control-plane calls the pipeline makes.
//! [`ComfyUIApi`] is the production implementation; tests substitute
//! in-memory fakes.

use async_trait::async_trait;
use comfybridge_core::job::WorkflowGraph;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::history::HistoryRecord;

/// Request/response operations against the rendering backend.
///
/// Implementations bound every call with their own timeout and never
/// retry; retry policy belongs to the caller.
#[async_trait]
pub trait BackendGateway: Send + Sync {
    /// Succeeds when the backend answers its status endpoint.
    async fn probe_ready(&self) -> Result<(), ComfyUIApiError>;

    /// Queue a workflow and return the backend's job id.
    async fn submit(
        &self,
        workflow: &WorkflowGraph,
        client_id: &str,
    ) -> Result<String, ComfyUIApiError>;

    /// Fetch the history record for a job, `None` while it is not yet
    /// visible.
    async fn fetch_history(&self, prompt_id: &str)
        -> Result<Option<HistoryRecord>, ComfyUIApiError>;

    /// Download the bytes of a stored artifact.
    async fn fetch_artifact(
        &self,
        filename: &str,
        storage: &str,
        subfolder: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError>;

    /// Upload an input asset and return the name the backend stored it as.
    async fn upload_asset(&self, name: &str, bytes: Vec<u8>) -> Result<String, ComfyUIApiError>;
}

#[async_trait]
impl BackendGateway for ComfyUIApi {
    async fn probe_ready(&self) -> Result<(), ComfyUIApiError> {
        ComfyUIApi::probe_ready(self).await
    }

    async fn submit(
        &self,
        workflow: &WorkflowGraph,
        client_id: &str,
    ) -> Result<String, ComfyUIApiError> {
        self.submit_workflow(workflow, client_id).await
    }

    async fn fetch_history(
        &self,
        prompt_id: &str,
    ) -> Result<Option<HistoryRecord>, ComfyUIApiError> {
        self.get_history(prompt_id).await
    }

    async fn fetch_artifact(
        &self,
        filename: &str,
        storage: &str,
        subfolder: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        self.view(filename, storage, subfolder).await
    }

    async fn upload_asset(&self, name: &str, bytes: Vec<u8>) -> Result<String, ComfyUIApiError> {
        self.upload_image(name, bytes).await
    }
}
