//! Asset staging: upload inline assets and point the workflow at them.
//!
//! ComfyUI may store an upload under a different name than the caller
//! used (`a.png` becomes `a_001.png` when `a.png` already exists), so
//! after uploading, every node input that names an asset is rewritten
//! to the stored name.

use comfybridge_comfyui::gateway::BackendGateway;
use comfybridge_core::data_url::decode_asset;
use comfybridge_core::envelope::NameMapping;
use comfybridge_core::job::{AssetInput, WorkflowGraph};
use serde_json::Value;

use crate::error::JobError;

/// Workflow ready for submission plus the names it was rewritten with.
#[derive(Debug, Clone)]
pub struct StagedWorkflow {
    pub workflow: WorkflowGraph,
    pub uploaded: NameMapping,
}

/// Decode and upload every asset, then rewrite the workflow.
///
/// With no assets the workflow is returned untouched. The first decode
/// or upload failure aborts staging.
pub async fn stage_assets<G>(
    gateway: &G,
    workflow: WorkflowGraph,
    assets: &[AssetInput],
) -> Result<StagedWorkflow, JobError>
where
    G: BackendGateway + ?Sized,
{
    if assets.is_empty() {
        return Ok(StagedWorkflow {
            workflow,
            uploaded: NameMapping::new(),
        });
    }

    let mut uploaded = NameMapping::with_capacity(assets.len());
    for asset in assets {
        let bytes = decode_asset(&asset.data)?;
        let size = bytes.len();
        let stored = gateway.upload_asset(&asset.name, bytes).await?;
        tracing::info!(name = %asset.name, stored = %stored, size, "Uploaded input asset");
        uploaded.insert(asset.name.clone(), stored);
    }

    Ok(StagedWorkflow {
        workflow: rewrite_inputs(workflow, &uploaded),
        uploaded,
    })
}

/// Replace direct string inputs that exactly equal a caller name.
///
/// Nested values and partial matches are left alone, as are nodes
/// whose `inputs` is missing or not an object.
pub fn rewrite_inputs(mut workflow: WorkflowGraph, mapping: &NameMapping) -> WorkflowGraph {
    if mapping.is_empty() {
        return workflow;
    }

    for (node_id, node) in workflow.iter_mut() {
        let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
            continue;
        };
        for (input, value) in inputs.iter_mut() {
            let Value::String(current) = value else {
                continue;
            };
            if let Some(stored) = mapping.get(current.as_str()) {
                tracing::debug!(node_id = %node_id, input = %input, from = %current, to = %stored, "Rewrote asset reference");
                *current = stored.clone();
            }
        }
    }
    workflow
}
