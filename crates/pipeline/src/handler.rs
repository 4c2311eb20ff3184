//! Boundary between the pipeline and the worker runtime.
//!
//! [`handle_job`] is the only place where failures become data: any
//! [`JobError`], and any panic inside the pipeline, is turned into an
//! [`ErrorEnvelope`]. Callers always get a [`JobResponse`] back.

use std::any::Any;
use std::error::Error as StdError;
use std::fmt::Write as _;
use std::panic::AssertUnwindSafe;

use comfybridge_comfyui::client::EventSource;
use comfybridge_comfyui::gateway::BackendGateway;
use comfybridge_core::config::BridgeConfig;
use comfybridge_core::envelope::{ErrorEnvelope, JobResponse};
use futures::FutureExt;
use serde_json::Value;

use crate::orchestrator::JobOrchestrator;

/// Run one job and shape the outcome for the runtime.
pub async fn handle_job<G, E>(orchestrator: &JobOrchestrator<G, E>, job: Value) -> JobResponse
where
    G: BackendGateway,
    E: EventSource,
{
    let refresh_worker = orchestrator.refresh_worker();

    match AssertUnwindSafe(orchestrator.run(job)).catch_unwind().await {
        Ok(Ok(output)) => JobResponse::Success(output),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Job failed");
            JobResponse::Failure(error_envelope(&e, refresh_worker))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(panic = %message, "Job panicked");
            JobResponse::Failure(ErrorEnvelope {
                error: format!("internal error: {message}"),
                traceback: format!("panic: {message}"),
                refresh_worker,
            })
        }
    }
}

/// Build a production orchestrator from `config` and run one job on it.
pub async fn handle_with_config(config: &BridgeConfig, job: Value) -> JobResponse {
    match JobOrchestrator::from_config(config) {
        Ok(orchestrator) => handle_job(&orchestrator, job).await,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build ComfyUI client");
            JobResponse::Failure(error_envelope(&e, config.refresh_worker))
        }
    }
}

/// Error envelope for `err`: its message, plus a traceback made of the
/// debug form and the `source()` chain.
pub fn error_envelope(err: &(dyn StdError + 'static), refresh_worker: bool) -> ErrorEnvelope {
    ErrorEnvelope {
        error: err.to_string(),
        traceback: traceback(err),
        refresh_worker,
    }
}

fn traceback(err: &(dyn StdError + 'static)) -> String {
    let mut out = format!("{err:?}\n");
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = writeln!(out, "Caused by: {cause}");
        source = cause.source();
    }
    out
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
