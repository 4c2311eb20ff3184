//! `comfybridge-worker` -- runs one ComfyUI job and prints the result.
//!
//! Reads a job JSON document from the file named by the first argument,
//! or from stdin when no argument (or `-`) is given, runs it against the
//! configured ComfyUI instance and writes the response envelope to
//! stdout. Logs go to stderr so stdout carries only the envelope.
//!
//! # Environment variables
//!
//! Connection and timing settings are read by `BridgeConfig::from_env`
//! (`COMFY_HOST`, `COMFY_PORT`, `WS_RECV_TIMEOUT_SEC`, ...). In addition:
//!
//! | Variable     | Required | Default | Description                      |
//! |--------------|----------|---------|----------------------------------|
//! | `RUST_LOG`   | no       | `comfybridge=info` | Log filter            |
//! | `LOG_FORMAT` | no       | `text`  | `json` for one JSON object per line |

use comfybridge_core::config::BridgeConfig;
use comfybridge_core::envelope::{ErrorEnvelope, JobResponse};
use comfybridge_pipeline::handler::handle_with_config;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfybridge=info".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();

    let config = BridgeConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    let raw = read_job(std::env::args().nth(1)).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to read job input");
        std::process::exit(1);
    });

    tracing::info!(
        comfy = %config.http_url(),
        bytes = raw.len(),
        "Worker starting",
    );

    let response = match serde_json::from_str(&raw) {
        Ok(job) => handle_with_config(&config, job).await,
        Err(e) => {
            tracing::error!(error = %e, "Job input is not valid JSON");
            JobResponse::Failure(ErrorEnvelope {
                error: format!("Invalid input: job is not valid JSON: {e}"),
                traceback: format!("{e:?}"),
                refresh_worker: config.refresh_worker,
            })
        }
    };

    match serde_json::to_string(&response) {
        Ok(body) => println!("{body}"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response");
            std::process::exit(1);
        }
    }
}

/// Job source: a file path, or stdin for `None` and `-`.
async fn read_job(path: Option<String>) -> std::io::Result<String> {
    match path.as_deref() {
        None | Some("-") => {
            let mut raw = String::new();
            tokio::io::stdin().read_to_string(&mut raw).await?;
            Ok(raw)
        }
        Some(path) => tokio::fs::read_to_string(path).await,
    }
}
