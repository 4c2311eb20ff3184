//! Job orchestration.
//!
//! One job runs strictly in sequence:
//!
//! 1. wait until ComfyUI answers,
//! 2. validate the job and resolve its deadline and client id,
//! 3. upload inline assets and rewrite the workflow,
//! 4. open the event stream for the client id,
//! 5. submit the workflow,
//! 6. track completion until a terminal state,
//! 7. collect the produced files,
//! 8. build the success envelope.
//!
//! Tracking never raises: a failed or timed-out prompt still gets its
//! outputs collected and is reported with `done: false`.

use std::time::Duration;

use comfybridge_comfyui::api::ComfyUIApi;
use comfybridge_comfyui::client::{ComfyUIClient, EventSource};
use comfybridge_comfyui::gateway::BackendGateway;
use comfybridge_comfyui::readiness::{wait_until_ready, ReadinessConfig};
use comfybridge_comfyui::tracker::{CompletionTracker, TrackerSettings};
use comfybridge_core::config::BridgeConfig;
use comfybridge_core::envelope::JobOutput;
use comfybridge_core::job::{JobHandle, JobRequest};
use serde_json::Value;

use crate::collector::{collect_outputs, CollectorSettings};
use crate::error::JobError;
use crate::staging::stage_assets;

/// Runs jobs against one ComfyUI instance.
pub struct JobOrchestrator<G, E> {
    gateway: G,
    tracker: CompletionTracker<E>,
    readiness: ReadinessConfig,
    collector: CollectorSettings,
    default_timeout: Duration,
    refresh_worker: bool,
}

impl JobOrchestrator<ComfyUIApi, ComfyUIClient> {
    /// Orchestrator talking to the ComfyUI instance named in `config`.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, JobError> {
        let gateway = ComfyUIApi::from_config(config)?;
        let events = ComfyUIClient::from_config(config);
        Ok(Self::new(gateway, events, config))
    }
}

impl<G, E> JobOrchestrator<G, E>
where
    G: BackendGateway,
    E: EventSource,
{
    pub fn new(gateway: G, events: E, config: &BridgeConfig) -> Self {
        Self {
            gateway,
            tracker: CompletionTracker::new(events, TrackerSettings::from_config(config)),
            readiness: ReadinessConfig::from_config(config),
            collector: CollectorSettings::from_config(config),
            default_timeout: config.default_job_timeout,
            refresh_worker: config.refresh_worker,
        }
    }

    /// Whether envelopes should ask the runtime to recycle the worker.
    pub fn refresh_worker(&self) -> bool {
        self.refresh_worker
    }

    /// Run one raw job to completion.
    pub async fn run(&self, job: Value) -> Result<JobOutput, JobError> {
        wait_until_ready(&self.gateway, &self.readiness).await?;

        let request = JobRequest::from_job(job, self.default_timeout)?;
        tracing::info!(
            client_id = %request.client_id,
            nodes = request.workflow.len(),
            assets = request.assets.len(),
            timeout_secs = request.timeout.as_secs_f64(),
            "Job accepted",
        );

        let staged = stage_assets(&self.gateway, request.workflow, &request.assets).await?;

        // Subscribe before submitting so a fast prompt cannot finish
        // unobserved.
        let subscription = self.tracker.subscribe(&request.client_id).await?;

        let prompt_id = self
            .gateway
            .submit(&staged.workflow, &request.client_id)
            .await?;
        let handle = JobHandle {
            prompt_id,
            client_id: request.client_id,
        };
        tracing::info!(prompt_id = %handle.prompt_id, client_id = %handle.client_id, "Workflow submitted");

        let completion = self
            .tracker
            .track(subscription, &handle.prompt_id, request.timeout)
            .await;

        let outputs = collect_outputs(&self.gateway, &handle.prompt_id, &self.collector).await?;

        tracing::info!(
            prompt_id = %handle.prompt_id,
            done = completion.done(),
            ws_errors = completion.errors.len(),
            outputs = outputs.len(),
            "Job finished",
        );

        Ok(JobOutput {
            prompt_id: handle.prompt_id,
            done: completion.done(),
            ws_errors: completion.errors,
            uploaded_images: staged.uploaded,
            outputs,
            refresh_worker: self.refresh_worker.then_some(true),
        })
    }
}
