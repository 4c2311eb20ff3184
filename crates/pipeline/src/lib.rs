//! Job pipeline for the ComfyUI bridge.
//!
//! Runs one job end to end: wait for the backend, stage inline assets,
//! submit the workflow, track completion, collect the produced files
//! and shape the response envelope.

pub mod collector;
pub mod error;
pub mod handler;
pub mod orchestrator;
pub mod staging;
