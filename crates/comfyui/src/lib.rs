//! ComfyUI WebSocket and REST client library.
//!
//! Provides the HTTP gateway used to submit workflows and collect their
//! results, typed WebSocket message parsing, and the completion tracker
//! that decides when a submitted prompt has finished.

pub mod api;
pub mod client;
pub mod gateway;
pub mod history;
pub mod messages;
pub mod readiness;
pub mod tracker;
