//! Startup readiness wait for a ComfyUI instance.
//!
//! The worker container usually starts ComfyUI and the bridge at the
//! same time, so the first job has to wait for the HTTP API to come up.
//! [`wait_until_ready`] probes with a fixed sleep until the backend
//! answers or the attempt budget runs out.

use std::time::Duration;

use comfybridge_core::config::BridgeConfig;

use crate::gateway::BackendGateway;

/// Tunable parameters for the readiness wait.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessConfig {
    /// Total number of probes before giving up.
    pub attempts: u32,
    /// Fixed delay between probes.
    pub sleep: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            attempts: 500,
            sleep: Duration::from_millis(200),
        }
    }
}

impl ReadinessConfig {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            attempts: config.connect_retries,
            sleep: config.connect_sleep,
        }
    }
}

/// The backend never answered within the attempt budget.
#[derive(Debug, thiserror::Error)]
#[error("ComfyUI not reachable after {attempts} attempts: {last_error}")]
pub struct NotReady {
    pub attempts: u32,
    pub last_error: String,
}

/// Probe the backend until it is ready.
///
/// Returns the number of probes it took.
pub async fn wait_until_ready<G>(gateway: &G, config: &ReadinessConfig) -> Result<u32, NotReady>
where
    G: BackendGateway + ?Sized,
{
    let mut last_error = String::from("no probe attempted");

    for attempt in 1..=config.attempts {
        match gateway.probe_ready().await {
            Ok(()) => {
                if attempt > 1 {
                    tracing::info!(attempt, "ComfyUI became ready");
                }
                return Ok(attempt);
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "ComfyUI not ready yet");
                last_error = e.to_string();
            }
        }

        if attempt < config.attempts {
            tokio::time::sleep(config.sleep).await;
        }
    }

    tracing::error!(attempts = config.attempts, error = %last_error, "ComfyUI never became ready");
    Err(NotReady {
        attempts: config.attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use comfybridge_core::job::WorkflowGraph;

    use super::*;
    use crate::api::ComfyUIApiError;
    use crate::history::HistoryRecord;

    /// Gateway whose probe fails until `ready_after` probes have been made.
    struct WarmingUp {
        ready_after: u32,
        probes: AtomicU32,
    }

    impl WarmingUp {
        fn new(ready_after: u32) -> Self {
            Self {
                ready_after,
                probes: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl BackendGateway for WarmingUp {
        async fn probe_ready(&self) -> Result<(), ComfyUIApiError> {
            let n = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.ready_after {
                Ok(())
            } else {
                Err(ComfyUIApiError::ApiError {
                    status: 503,
                    body: "starting".into(),
                })
            }
        }

        async fn submit(&self, _: &WorkflowGraph, _: &str) -> Result<String, ComfyUIApiError> {
            unreachable!("not used by readiness")
        }

        async fn fetch_history(&self, _: &str) -> Result<Option<HistoryRecord>, ComfyUIApiError> {
            unreachable!("not used by readiness")
        }

        async fn fetch_artifact(&self, _: &str, _: &str, _: &str) -> Result<Vec<u8>, ComfyUIApiError> {
            unreachable!("not used by readiness")
        }

        async fn upload_asset(&self, _: &str, _: Vec<u8>) -> Result<String, ComfyUIApiError> {
            unreachable!("not used by readiness")
        }
    }

    fn quick(attempts: u32) -> ReadinessConfig {
        ReadinessConfig {
            attempts,
            sleep: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn ready_on_first_probe() {
        let gateway = WarmingUp::new(1);
        assert_eq!(wait_until_ready(&gateway, &quick(5)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn retries_until_ready() {
        let gateway = WarmingUp::new(4);
        assert_eq!(wait_until_ready(&gateway, &quick(5)).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let gateway = WarmingUp::new(10);
        let err = wait_until_ready(&gateway, &quick(3)).await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(err.last_error.contains("503"));
        assert_eq!(gateway.probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempts_is_not_ready() {
        let gateway = WarmingUp::new(1);
        let err = wait_until_ready(&gateway, &quick(0)).await.unwrap_err();
        assert_eq!(err.attempts, 0);
    }

    #[test]
    fn default_matches_bridge_defaults() {
        let from_bridge = ReadinessConfig::from_config(&BridgeConfig::default());
        let default = ReadinessConfig::default();
        assert_eq!(from_bridge.attempts, default.attempts);
        assert_eq!(from_bridge.sleep, default.sleep);
    }
}
