//! Result collection: read the prompt's history and inline every file
//! it produced.

use std::time::Duration;

use comfybridge_comfyui::gateway::BackendGateway;
use comfybridge_comfyui::history::HistoryRecord;
use comfybridge_core::config::BridgeConfig;
use comfybridge_core::data_url::encode_data_url;
use comfybridge_core::envelope::ArtifactPayload;
use comfybridge_core::media::infer_mime;

use crate::error::JobError;

/// Retry policy for the history lookup.
#[derive(Debug, Clone, Copy)]
pub struct CollectorSettings {
    /// Extra fetches after the first empty one.
    pub retries: u32,
    /// Fixed delay between fetches.
    pub retry_delay: Duration,
}

impl CollectorSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            retries: config.history_retries,
            retry_delay: config.history_retry_delay,
        }
    }
}

/// Fetch the history record for `prompt_id`, retrying while ComfyUI has
/// not written it yet.
///
/// History is eventually consistent: the completion event can arrive
/// before the record exists.
pub async fn wait_for_history<G>(
    gateway: &G,
    prompt_id: &str,
    settings: &CollectorSettings,
) -> Result<HistoryRecord, JobError>
where
    G: BackendGateway + ?Sized,
{
    let attempts = settings.retries.saturating_add(1);

    for attempt in 1..=attempts {
        if let Some(record) = gateway.fetch_history(prompt_id).await? {
            if attempt > 1 {
                tracing::debug!(prompt_id, attempt, "History became available");
            }
            return Ok(record);
        }
        if attempt < attempts {
            tokio::time::sleep(settings.retry_delay).await;
        }
    }

    tracing::error!(prompt_id, attempts, "History never became available");
    Err(JobError::HistoryUnavailable {
        prompt_id: prompt_id.to_string(),
        attempts,
    })
}

/// Download every artifact in `record` and encode it as a data URL.
///
/// Order follows [`HistoryRecord::artifacts`]. One failed download
/// fails the whole collection.
pub async fn fetch_artifacts<G>(
    gateway: &G,
    record: &HistoryRecord,
) -> Result<Vec<ArtifactPayload>, JobError>
where
    G: BackendGateway + ?Sized,
{
    let mut outputs = Vec::new();

    for artifact in record.artifacts() {
        let bytes = gateway
            .fetch_artifact(artifact.filename, artifact.storage, artifact.subfolder)
            .await
            .map_err(|source| JobError::ArtifactFetchFailed {
                filename: artifact.filename.to_string(),
                source,
            })?;

        let mime = infer_mime(artifact.kind, artifact.filename);
        tracing::debug!(
            filename = artifact.filename,
            kind = artifact.kind.as_str(),
            mime,
            size = bytes.len(),
            "Fetched artifact",
        );

        outputs.push(ArtifactPayload {
            kind: artifact.kind,
            filename: artifact.filename.to_string(),
            subfolder: artifact.subfolder.to_string(),
            storage: artifact.storage.to_string(),
            data_url: encode_data_url(mime, &bytes),
        });
    }

    Ok(outputs)
}

/// History lookup followed by artifact download.
pub async fn collect_outputs<G>(
    gateway: &G,
    prompt_id: &str,
    settings: &CollectorSettings,
) -> Result<Vec<ArtifactPayload>, JobError>
where
    G: BackendGateway + ?Sized,
{
    let record = wait_for_history(gateway, prompt_id, settings).await?;
    let outputs = fetch_artifacts(gateway, &record).await?;
    tracing::info!(prompt_id, count = outputs.len(), "Collected outputs");
    Ok(outputs)
}
