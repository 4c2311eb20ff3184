//! Bridge configuration.
//!
//! All tunables come from environment variables, read once at startup
//! by [`BridgeConfig::from_env`].

use std::str::FromStr;
use std::time::Duration;

use crate::error::CoreError;

/// Bridge configuration loaded from environment variables.
///
/// Every component receives the pieces it needs from this struct at
/// construction time; nothing reads the environment after startup.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// ComfyUI host name or address (default: `127.0.0.1`).
    pub comfy_host: String,
    /// ComfyUI port (default: `8188`).
    pub comfy_port: u16,
    /// Readiness probe attempts before giving up (default: `500`).
    pub connect_retries: u32,
    /// Fixed sleep between readiness probes (default: 200 ms).
    pub connect_sleep: Duration,
    /// Per-receive timeout on the event stream (default: 10 s).
    pub ws_recv_timeout: Duration,
    /// Consecutive silent receives before completion is inferred (default: `8`).
    pub ws_silent_max: u32,
    /// Job deadline when the caller does not supply one (default: 600 s).
    pub default_job_timeout: Duration,
    /// Timeout for JSON control calls (default: 60 s).
    pub request_timeout: Duration,
    /// Timeout for asset uploads and artifact downloads (default: 120 s).
    pub transfer_timeout: Duration,
    /// Extra history fetches after the first one comes back empty (default: `10`).
    pub history_retries: u32,
    /// Fixed delay between history fetches (default: 200 ms).
    pub history_retry_delay: Duration,
    /// Ask the worker runtime to recycle the worker after each job (default: `false`).
    pub refresh_worker: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            comfy_host: "127.0.0.1".into(),
            comfy_port: 8188,
            connect_retries: 500,
            connect_sleep: Duration::from_millis(200),
            ws_recv_timeout: Duration::from_secs(10),
            ws_silent_max: 8,
            default_job_timeout: Duration::from_secs(600),
            request_timeout: Duration::from_secs(60),
            transfer_timeout: Duration::from_secs(120),
            history_retries: 10,
            history_retry_delay: Duration::from_millis(200),
            refresh_worker: false,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default     |
    /// |------------------------------|-------------|
    /// | `COMFY_HOST`                 | `127.0.0.1` |
    /// | `COMFY_PORT`                 | `8188`      |
    /// | `COMFY_CONNECT_RETRIES`      | `500`       |
    /// | `COMFY_CONNECT_SLEEP_SEC`    | `0.2`       |
    /// | `WS_RECV_TIMEOUT_SEC`        | `10`        |
    /// | `WS_SILENT_MAX`              | `8`         |
    /// | `DEFAULT_JOB_TIMEOUT_SEC`    | `600`       |
    /// | `COMFY_REQUEST_TIMEOUT_SEC`  | `60`        |
    /// | `COMFY_TRANSFER_TIMEOUT_SEC` | `120`       |
    /// | `HISTORY_RETRIES`            | `10`        |
    /// | `HISTORY_RETRY_DELAY_SEC`    | `0.2`       |
    /// | `REFRESH_WORKER`             | `false`     |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through
    /// `lookup`, so callers can supply a fixed set of variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            comfy_host: lookup("COMFY_HOST").unwrap_or(defaults.comfy_host),
            comfy_port: parse_or(&lookup, "COMFY_PORT", defaults.comfy_port)?,
            connect_retries: parse_or(&lookup, "COMFY_CONNECT_RETRIES", defaults.connect_retries)?,
            connect_sleep: secs_or(&lookup, "COMFY_CONNECT_SLEEP_SEC", defaults.connect_sleep)?,
            ws_recv_timeout: secs_or(&lookup, "WS_RECV_TIMEOUT_SEC", defaults.ws_recv_timeout)?,
            ws_silent_max: parse_or(&lookup, "WS_SILENT_MAX", defaults.ws_silent_max)?,
            default_job_timeout: secs_or(
                &lookup,
                "DEFAULT_JOB_TIMEOUT_SEC",
                defaults.default_job_timeout,
            )?,
            request_timeout: secs_or(
                &lookup,
                "COMFY_REQUEST_TIMEOUT_SEC",
                defaults.request_timeout,
            )?,
            transfer_timeout: secs_or(
                &lookup,
                "COMFY_TRANSFER_TIMEOUT_SEC",
                defaults.transfer_timeout,
            )?,
            history_retries: parse_or(&lookup, "HISTORY_RETRIES", defaults.history_retries)?,
            history_retry_delay: secs_or(
                &lookup,
                "HISTORY_RETRY_DELAY_SEC",
                defaults.history_retry_delay,
            )?,
            refresh_worker: lookup("REFRESH_WORKER")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.refresh_worker),
        })
    }

    /// HTTP base URL of the ComfyUI instance, e.g. `http://127.0.0.1:8188`.
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.comfy_host, self.comfy_port)
    }

    /// WebSocket base URL of the ComfyUI instance, e.g. `ws://127.0.0.1:8188`.
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}", self.comfy_host, self.comfy_port)
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, CoreError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| CoreError::Config {
            var,
            message: format!("{raw:?}: {e}"),
        }),
    }
}

fn secs_or<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    let secs: f64 = raw.trim().parse().map_err(|e| CoreError::Config {
        var,
        message: format!("{raw:?}: {e}"),
    })?;
    Duration::try_from_secs_f64(secs).map_err(|e| CoreError::Config {
        var,
        message: format!("{raw:?}: {e}"),
    })
}
