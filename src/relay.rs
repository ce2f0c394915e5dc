// ABOUTME: Inference relay state machine between a streaming model backend and the client
// ABOUTME: Forwards fragments in order, accumulates the response and reports how the stream ended
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # Inference Relay
//!
//! ```text
//! Idle -> Connecting -> Streaming -> Completed
//!              |             |
//!              +-------------+----> Failed | Aborted
//! ```
//!
//! The first non-empty fragment moves `Connecting` to `Streaming`. Every fragment is
//! forwarded to the client as a `chunk` event and appended to the accumulator, in
//! backend order. End of stream completes the relay. A backend or transport error
//! fails it with an `error` event. Client disconnect, explicit cancellation and
//! timeouts abort it; a timeout additionally emits a timeout-specific `error`.
//!
//! Dropping the backend stream closes the backend connection, so every exit path
//! that leaves [`InferenceRelay::run`] releases it.

use crate::errors::AppError;
use crate::llm::{ChatRequest, LlmProvider};
use crate::services::generation::StreamEvent;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Relay lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Not started
    Idle,
    /// Waiting for the backend to accept the request
    Connecting,
    /// At least one fragment forwarded
    Streaming,
    /// Backend finished normally
    Completed,
    /// Backend or transport error
    Failed,
    /// Client gone, cancelled or timed out
    Aborted,
}

impl RelayState {
    /// Whether no further transitions are possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// Whether `self -> next` is a legal transition
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Connecting)
                | (Self::Connecting, Self::Streaming)
                | (
                    Self::Connecting | Self::Streaming,
                    Self::Completed | Self::Failed | Self::Aborted
                )
        )
    }
}

/// Why a relay was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortCause {
    /// The client closed the response
    ClientDisconnected,
    /// The owner asked to stop the generation
    Cancelled,
    /// No fragment arrived within the idle timeout
    IdleTimeout,
    /// The generation exceeded the total timeout
    TotalTimeout,
}

impl AbortCause {
    /// Whether the abort was a server-side timeout
    #[must_use]
    pub const fn is_timeout(self) -> bool {
        matches!(self, Self::IdleTimeout | Self::TotalTimeout)
    }

    /// Stable name for logs and activity records
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClientDisconnected => "client_disconnected",
            Self::Cancelled => "cancelled",
            Self::IdleTimeout => "idle_timeout",
            Self::TotalTimeout => "total_timeout",
        }
    }
}

/// How a relay ended
#[derive(Debug)]
pub enum RelayOutcome {
    /// Backend finished; `content` is the concatenation of every forwarded fragment
    Completed {
        /// Full response
        content: String,
    },
    /// Backend or transport error after `partial` was forwarded
    Failed {
        /// Cause
        error: AppError,
        /// Content forwarded before the failure
        partial: String,
    },
    /// Stopped before the backend finished
    Aborted {
        /// Cause
        cause: AbortCause,
        /// Content forwarded before the abort
        partial: String,
    },
}

/// Relay result with the final state and fragment count
#[derive(Debug)]
pub struct RelayReport {
    /// How the relay ended
    pub outcome: RelayOutcome,
    /// Final state
    pub state: RelayState,
    /// Fragments forwarded to the client
    pub fragments: usize,
}

/// Destination of relayed events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver an event; `false` means the client is gone
    async fn emit(&self, event: StreamEvent) -> bool;

    /// Resolves once the client is gone
    async fn closed(&self);
}

#[async_trait]
impl EventSink for mpsc::Sender<StreamEvent> {
    async fn emit(&self, event: StreamEvent) -> bool {
        self.send(event).await.is_ok()
    }

    async fn closed(&self) {
        mpsc::Sender::closed(self).await;
    }
}

/// Relays one backend stream to one client
#[derive(Debug, Clone, Copy)]
pub struct InferenceRelay {
    idle_timeout: Duration,
    total_timeout: Duration,
}

enum Step {
    Finished,
    Error(AppError),
    Abort(AbortCause),
}

impl InferenceRelay {
    /// Create a relay with idle and total timeouts
    #[must_use]
    pub const fn new(idle_timeout: Duration, total_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            total_timeout,
        }
    }

    /// Run the relay to a terminal state
    pub async fn run(
        &self,
        provider: &dyn LlmProvider,
        request: &ChatRequest,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> RelayReport {
        let mut state = RelayState::Idle;
        advance(&mut state, RelayState::Connecting);
        let deadline = Instant::now() + self.total_timeout;
        let mut content = String::new();
        let mut fragments = 0_usize;

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Step::Abort(AbortCause::Cancelled)),
            () = sink.closed() => Err(Step::Abort(AbortCause::ClientDisconnected)),
            () = sleep_until(deadline) => Err(Step::Abort(AbortCause::TotalTimeout)),
            result = timeout(self.idle_timeout, provider.complete_stream(request)) => match result {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(e)) => Err(Step::Error(e)),
                Err(_) => Err(Step::Abort(AbortCause::IdleTimeout)),
            },
        };

        let step = match opened {
            Err(step) => step,
            Ok(mut stream) => {
                let step = loop {
                    let next = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break Step::Abort(AbortCause::Cancelled),
                        () = sink.closed() => break Step::Abort(AbortCause::ClientDisconnected),
                        () = sleep_until(deadline) => break Step::Abort(AbortCause::TotalTimeout),
                        next = timeout(self.idle_timeout, stream.next()) => next,
                    };

                    match next {
                        Err(_) => break Step::Abort(AbortCause::IdleTimeout),
                        Ok(None) => break Step::Finished,
                        Ok(Some(Err(e))) => break Step::Error(e),
                        Ok(Some(Ok(chunk))) => {
                            if !chunk.delta.is_empty() {
                                if state == RelayState::Connecting {
                                    advance(&mut state, RelayState::Streaming);
                                }
                                content.push_str(&chunk.delta);
                                fragments += 1;
                                if !sink.emit(StreamEvent::chunk(chunk.delta)).await {
                                    break Step::Abort(AbortCause::ClientDisconnected);
                                }
                            }
                            if chunk.is_final {
                                break Step::Finished;
                            }
                        }
                    }
                };
                // Closes the backend connection before any ledger work begins
                drop(stream);
                step
            }
        };

        let outcome = match step {
            Step::Finished => {
                advance(&mut state, RelayState::Completed);
                RelayOutcome::Completed { content }
            }
            Step::Error(error) => {
                advance(&mut state, RelayState::Failed);
                warn!(fragments, error = %error, "Backend stream failed");
                sink.emit(StreamEvent::error(format!(
                    "The model backend failed: {}",
                    error.message
                )))
                .await;
                RelayOutcome::Failed {
                    error,
                    partial: content,
                }
            }
            Step::Abort(cause) => {
                advance(&mut state, RelayState::Aborted);
                debug!(fragments, cause = cause.as_str(), "Relay aborted");
                if cause.is_timeout() {
                    sink.emit(StreamEvent::error(
                        "The model did not respond in time. Please try again.",
                    ))
                    .await;
                }
                RelayOutcome::Aborted {
                    cause,
                    partial: content,
                }
            }
        };

        RelayReport {
            outcome,
            state,
            fragments,
        }
    }
}

fn advance(state: &mut RelayState, next: RelayState) {
    if state.can_advance_to(next) {
        debug!(from = ?*state, to = ?next, "Relay state change");
    } else {
        warn!(from = ?*state, to = ?next, "Unexpected relay state change");
    }
    *state = next;
}
