//! Folds streaming events into session state.
//!
//! A turn opens with the first `token`, grows with each following one, and
//! ends with exactly one terminal event: `final` or `error`. Frames that do
//! not parse are dropped and leave the state untouched, unless their `type`
//! is terminal: a broken `final` still ends the turn and a broken `error`
//! still fails it.

use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::StreamEvent;
use crate::state::SessionState;

/// Shown when the server reports a failure without a message.
pub const DEFAULT_TURN_ERROR: &str = "Failed to get response from tutor. Please try again.";

/// What an event did to the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A fragment was appended. `started` is set for the first of a turn.
    Token {
        /// A new streaming entry was opened.
        started: bool,
    },
    /// The turn completed.
    Final {
        /// The current problem is now a different one.
        problem_changed: bool,
    },
    /// The turn failed.
    Error {
        /// Message shown to the learner.
        message: String,
    },
    /// The frame could not be understood.
    Dropped,
}

impl Applied {
    /// Returns `true` for `Final` and `Error`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Final { .. } | Self::Error { .. })
    }
}

/// Applies stream events in arrival order.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    dropped: u64,
}

impl StreamAssembler {
    /// Creates an assembler.
    #[must_use]
    pub const fn new() -> Self {
        Self { dropped: 0 }
    }

    /// Number of frames dropped as malformed.
    #[must_use]
    pub const fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    /// Parses and applies a raw text frame.
    pub fn apply_raw(&mut self, state: &mut SessionState, raw: &str) -> Applied {
        match serde_json::from_str::<StreamEvent>(raw) {
            Ok(event) => self.apply(state, event),
            Err(e) => {
                self.dropped += 1;
                let kind = terminal_kind(raw);
                warn!(error = %e, frame_len = raw.len(), ?kind, "Malformed stream frame");
                match kind {
                    Some(Terminal::Final) => {
                        state.finish_turn();
                        state.conversation.seal_streaming();
                        Applied::Final {
                            problem_changed: false,
                        }
                    }
                    Some(Terminal::Error) => {
                        state.fail_turn(DEFAULT_TURN_ERROR);
                        Applied::Error {
                            message: DEFAULT_TURN_ERROR.to_string(),
                        }
                    }
                    None => Applied::Dropped,
                }
            }
        }
    }

    /// Applies a parsed event.
    #[allow(clippy::unused_self)]
    pub fn apply(&mut self, state: &mut SessionState, event: StreamEvent) -> Applied {
        match event {
            StreamEvent::Token { token } => {
                let started = state.conversation.append_token(&token);
                state.streaming = true;
                if started {
                    debug!("Tutor reply started streaming");
                }
                Applied::Token { started }
            }
            StreamEvent::Final(payload) => {
                state.finish_turn();
                match payload.conversation_history {
                    Some(history) => state.conversation.replace(history),
                    None => {
                        state.conversation.seal_streaming();
                    }
                }
                let identity_changed = match payload.current_problem {
                    Some(problem) => state.replace_problem(Some(problem)),
                    None => false,
                };
                let problem_changed = identity_changed || payload.problem_changed;
                debug!(
                    entries = state.conversation.len(),
                    problem_changed, "Tutor reply complete"
                );
                Applied::Final { problem_changed }
            }
            StreamEvent::Error { error } => {
                let message = error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_TURN_ERROR.to_string());
                warn!(%message, "Tutor reply failed");
                state.fail_turn(message.clone());
                Applied::Error { message }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Final,
    Error,
}

/// Reads the `type` of a frame whose body failed to parse.
fn terminal_kind(raw: &str) -> Option<Terminal> {
    let value: Value = serde_json::from_str(raw).ok()?;
    match value.get("type")?.as_str()? {
        "final" => Some(Terminal::Final),
        "error" => Some(Terminal::Error),
        _ => None,
    }
}
