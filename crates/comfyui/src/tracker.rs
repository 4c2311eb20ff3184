//! Completion tracking for a submitted prompt.
//!
//! ComfyUI's completion signal over WebSocket is unreliable: the final
//! `executing` message with `node: null` is sometimes missing, and the
//! socket can simply go quiet or drop. The tracker therefore runs a small
//! state machine:
//!
//! ```text
//! Connecting -> Streaming -> Completed   executing{node: null} for our prompt
//!                         -> Failed      execution_error for our prompt
//!                         -> Silent      S receive timeouts in a row, or peer closed
//!                         -> TimedOut    overall deadline passed
//! ```
//!
//! `Silent` is a soft success: the tracker assumes ComfyUI finished and
//! stopped talking, and leaves confirmation to the history lookup.
//! Known weak invariant: a backend that is stuck but keeps the socket
//! open will also end up `Silent`, and the history lookup is then the
//! only thing that notices.

use std::time::Duration;

use comfybridge_core::config::BridgeConfig;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::client::{ComfyUIClientError, EventSource, EventStream};
use crate::messages::{parse_event, ComfyUIMessage, ErrorData};

/// How tracking ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    /// Explicit completion signal received.
    Completed,
    /// ComfyUI reported an execution error for the prompt.
    Failed,
    /// The overall deadline passed first.
    TimedOut,
    /// Completion inferred from silence or a closed socket.
    Silent,
}

impl TerminalState {
    /// Whether the prompt is believed to have finished normally.
    pub fn is_done(self) -> bool {
        matches!(self, TerminalState::Completed | TerminalState::Silent)
    }
}

/// Current position in the tracking state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Connecting,
    Streaming { silent_count: u32 },
    Terminal(TerminalState),
}

/// Outcome of tracking one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub state: TerminalState,
    /// Raw `execution_error` frames and timeout notes, in arrival order.
    pub errors: Vec<String>,
}

impl CompletionResult {
    pub fn done(&self) -> bool {
        self.state.is_done()
    }
}

/// Tracker timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    /// Longest wait for a single frame.
    pub recv_timeout: Duration,
    /// Receive timeouts in a row that count as "finished".
    pub silent_max: u32,
}

impl TrackerSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            recv_timeout: config.ws_recv_timeout,
            silent_max: config.ws_silent_max,
        }
    }
}

/// Clock-free tracking state machine for one prompt.
///
/// Inputs are fed in by a driver ([`track_events`]); once a terminal
/// state is reached every further input is ignored.
#[derive(Debug)]
pub struct TrackerMachine {
    prompt_id: String,
    silent_max: u32,
    state: TrackerState,
    errors: Vec<String>,
}

impl TrackerMachine {
    pub fn new(prompt_id: impl Into<String>, silent_max: u32) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            silent_max,
            state: TrackerState::Connecting,
            errors: Vec::new(),
        }
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn terminal(&self) -> Option<TerminalState> {
        match self.state {
            TrackerState::Terminal(state) => Some(state),
            _ => None,
        }
    }

    /// The event stream is open.
    pub fn on_connected(&mut self) {
        if self.state == TrackerState::Connecting {
            self.state = TrackerState::Streaming { silent_count: 0 };
        }
    }

    /// A text frame arrived.
    ///
    /// Only the envelope has to parse: an `execution_error` is terminal
    /// whatever its payload looks like, and completion is read from the
    /// raw `node` and `prompt_id` fields.
    pub fn on_text(&mut self, text: &str) -> Option<TerminalState> {
        if !self.on_activity() {
            return self.terminal();
        }

        let event = match parse_event(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    prompt_id = %self.prompt_id,
                    error = %e,
                    raw_message = %text,
                    "Failed to parse ComfyUI message",
                );
                return None;
            }
        };

        match event.kind.as_str() {
            "execution_error" => {
                // An error without a readable prompt id cannot belong to
                // anyone else on this client-scoped socket.
                if let Some(other) = event.prompt_id().filter(|id| *id != self.prompt_id) {
                    tracing::debug!(
                        prompt_id = %self.prompt_id,
                        other_prompt = other,
                        "Ignoring execution error for another prompt",
                    );
                    return None;
                }
                let detail = ErrorData::deserialize(&event.data).unwrap_or_default();
                tracing::error!(
                    prompt_id = %self.prompt_id,
                    node_id = ?detail.node_id,
                    error_type = %detail.exception_type,
                    error_message = %detail.exception_message,
                    "Execution error",
                );
                self.errors.push(text.to_string());
                self.finish(TerminalState::Failed)
            }
            "executing" => {
                if event.prompt_id() != Some(self.prompt_id.as_str()) {
                    return None;
                }
                match event.node() {
                    None => {
                        tracing::info!(prompt_id = %self.prompt_id, "Execution completed (all nodes done)");
                        self.finish(TerminalState::Completed)
                    }
                    Some(node) => {
                        tracing::debug!(prompt_id = %self.prompt_id, node = %node, "Executing node");
                        None
                    }
                }
            }
            _ => {
                match event.into_message() {
                    Ok(ComfyUIMessage::Progress(data)) => tracing::debug!(
                        prompt_id = %self.prompt_id,
                        value = data.value,
                        max = data.max,
                        "Generation progress",
                    ),
                    Ok(other) => {
                        tracing::debug!(prompt_id = %self.prompt_id, kind = other.kind(), "ComfyUI message")
                    }
                    Err(e) => tracing::debug!(
                        prompt_id = %self.prompt_id,
                        error = %e,
                        "Unexpected ComfyUI message payload",
                    ),
                }
                None
            }
        }
    }

    /// Any frame arrived (text, binary preview, ping). Resets the
    /// silence counter; returns `false` if the machine is not streaming.
    pub fn on_activity(&mut self) -> bool {
        match &mut self.state {
            TrackerState::Streaming { silent_count } => {
                *silent_count = 0;
                true
            }
            _ => false,
        }
    }

    /// A receive wait expired without a frame.
    pub fn on_receive_timeout(&mut self) -> Option<TerminalState> {
        let count = match &mut self.state {
            TrackerState::Streaming { silent_count } => {
                *silent_count += 1;
                *silent_count
            }
            _ => return self.terminal(),
        };

        if count >= self.silent_max {
            tracing::info!(
                prompt_id = %self.prompt_id,
                silent_count = count,
                "Event stream silent, assuming execution finished",
            );
            return self.finish(TerminalState::Silent);
        }
        tracing::debug!(prompt_id = %self.prompt_id, silent_count = count, "No event received");
        None
    }

    /// The peer closed the stream or the transport failed.
    pub fn on_closed(&mut self) -> TerminalState {
        if let Some(state) = self.terminal() {
            return state;
        }
        tracing::info!(prompt_id = %self.prompt_id, "Event stream closed, assuming execution finished");
        self.state = TrackerState::Terminal(TerminalState::Silent);
        TerminalState::Silent
    }

    /// The overall deadline passed.
    pub fn on_deadline(&mut self) -> TerminalState {
        if let Some(state) = self.terminal() {
            return state;
        }
        tracing::warn!(prompt_id = %self.prompt_id, "Timed out waiting for completion");
        self.errors
            .push(format!("timeout waiting for prompt_id={}", self.prompt_id));
        self.state = TrackerState::Terminal(TerminalState::TimedOut);
        TerminalState::TimedOut
    }

    /// Consume the machine. A machine that never reached a terminal
    /// state reports `Silent`.
    pub fn into_result(self) -> CompletionResult {
        CompletionResult {
            state: self.terminal().unwrap_or(TerminalState::Silent),
            errors: self.errors,
        }
    }

    fn finish(&mut self, state: TerminalState) -> Option<TerminalState> {
        self.state = TrackerState::Terminal(state);
        Some(state)
    }
}

/// Drive a [`TrackerMachine`] from a stream of WebSocket frames until a
/// terminal state is reached.
///
/// No single receive waits past `deadline`, so a quiet stream cannot
/// push completion beyond the job's overall timeout.
pub async fn track_events<S>(
    stream: &mut S,
    prompt_id: &str,
    deadline: Instant,
    settings: &TrackerSettings,
) -> CompletionResult
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut machine = TrackerMachine::new(prompt_id, settings.silent_max);
    machine.on_connected();

    loop {
        let now = Instant::now();
        if now >= deadline {
            machine.on_deadline();
            break;
        }

        let recv_deadline = now
            .checked_add(settings.recv_timeout)
            .map_or(deadline, |t| t.min(deadline));
        let terminal = match tokio::time::timeout_at(recv_deadline, stream.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => machine.on_text(&text),
            Ok(Some(Ok(Message::Close(frame)))) => {
                tracing::info!(prompt_id, ?frame, "ComfyUI WebSocket closed");
                Some(machine.on_closed())
            }
            Ok(Some(Ok(_))) => {
                // Binary preview images, ping/pong and raw frames.
                machine.on_activity();
                None
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(prompt_id, error = %e, "WebSocket receive error");
                Some(machine.on_closed())
            }
            Ok(None) => Some(machine.on_closed()),
            Err(_elapsed) if Instant::now() >= deadline => Some(machine.on_deadline()),
            Err(_elapsed) => machine.on_receive_timeout(),
        };

        if terminal.is_some() {
            break;
        }
    }

    machine.into_result()
}

/// Stand-in deadline for timeouts too large to represent, roughly 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + timeout`, capped so that huge caller timeouts cannot overflow
/// the clock.
pub fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(FAR_FUTURE)).unwrap_or(now)
}

/// An open event stream waiting for its prompt id.
///
/// Opening the stream before submission means a fast prompt cannot
/// finish before anyone is listening. Dropping the subscription closes
/// the connection.
pub struct Subscription {
    client_id: String,
    stream: EventStream,
}

impl Subscription {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

/// Opens client-scoped event streams and tracks prompts on them.
pub struct CompletionTracker<E> {
    source: E,
    settings: TrackerSettings,
}

impl<E: EventSource> CompletionTracker<E> {
    pub fn new(source: E, settings: TrackerSettings) -> Self {
        Self { source, settings }
    }

    /// Open the event stream for `client_id`.
    pub async fn subscribe(&self, client_id: &str) -> Result<Subscription, ComfyUIClientError> {
        let stream = self.source.open(client_id).await?;
        Ok(Subscription {
            client_id: client_id.to_string(),
            stream,
        })
    }

    /// Track `prompt_id` on an open subscription until it resolves or
    /// `timeout` elapses. The subscription is closed on return.
    pub async fn track(
        &self,
        subscription: Subscription,
        prompt_id: &str,
        timeout: Duration,
    ) -> CompletionResult {
        let Subscription {
            client_id,
            mut stream,
        } = subscription;
        let deadline = deadline_after(timeout);

        tracing::info!(
            prompt_id,
            client_id = %client_id,
            timeout_secs = timeout.as_secs_f64(),
            "Waiting for completion",
        );

        let result = track_events(&mut stream, prompt_id, deadline, &self.settings).await;
        drop(stream);

        tracing::info!(
            prompt_id,
            state = ?result.state,
            errors = result.errors.len(),
            "Completion tracking finished",
        );
        result
    }
}
