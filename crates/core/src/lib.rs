//! Shared types for the ComfyUI job bridge.
//!
//! Holds everything that does not talk to the network: configuration,
//! the job input/output contracts, data URL handling and MIME
//! inference for produced artifacts.

pub mod config;
pub mod data_url;
pub mod envelope;
pub mod error;
pub mod job;
pub mod media;
