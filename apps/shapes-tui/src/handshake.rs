//! Token-fetch-and-attach handshake.
//!
//! `Handshake` is a pure state machine: every input returns the [`Effect`]s
//! the driver has to carry out, in order. No I/O happens here.
//!
//! ```text
//! Idle -> Pending -> TokenReady -> RequestSent -> Displayed
//!            |                         \-> RequestFailed
//!            \-> TokenFailed
//! ```
//!
//! Every failure is terminal for the cycle. Nothing is retried; the user
//! starts again with `request_token`.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::attestation::{AttestationEvent, AttestationResult};
use crate::dispatch::{DispatchError, ShapeResponse};

pub const STATUS_FETCHING: &str = "Fetching shape...";
pub const MSG_REQUEST_DETAILS_INCORRECT: &str = "Request details incorrect. Please try again.";
pub const MSG_UNKNOWN_SERVER_ERROR: &str = "Unknown server error. Please try again.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Pending,
    TokenReady,
    TokenFailed,
    RequestSent,
    Displayed,
    RequestFailed,
}

impl HandshakeState {
    pub fn as_str(self) -> &'static str {
        match self {
            HandshakeState::Idle => "idle",
            HandshakeState::Pending => "pending",
            HandshakeState::TokenReady => "token_ready",
            HandshakeState::TokenFailed => "token_failed",
            HandshakeState::RequestSent => "request_sent",
            HandshakeState::Displayed => "displayed",
            HandshakeState::RequestFailed => "request_failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    FetchToken,
    SendRequest { request_id: u64, token: String },
    DisplayMessage(String),
    NavigateToDisplay(String),
}

/// Why a request did not produce a shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// The request failed and it carried no token.
    EmptyTokenAtRequestTime,
    /// The request failed even though a token was attached.
    NetworkFailure,
}

impl FailureKind {
    pub fn classify(token: &str) -> Self {
        if token.is_empty() {
            FailureKind::EmptyTokenAtRequestTime
        } else {
            FailureKind::NetworkFailure
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            FailureKind::EmptyTokenAtRequestTime => MSG_REQUEST_DETAILS_INCORRECT,
            FailureKind::NetworkFailure => MSG_UNKNOWN_SERVER_ERROR,
        }
    }
}

#[derive(Debug)]
pub struct Handshake {
    state: HandshakeState,
    // State to fall back to when a fetch ends without an outcome.
    resume_state: HandshakeState,
    last_token: String,
    outstanding_fetches: u32,
    in_flight: HashMap<u64, String>,
    next_request_id: u64,
    torn_down: bool,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
            resume_state: HandshakeState::Idle,
            last_token: String::new(),
            outstanding_fetches: 0,
            in_flight: HashMap::new(),
            next_request_id: 1,
            torn_down: false,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn last_token(&self) -> &str {
        &self.last_token
    }

    pub fn outstanding_fetches(&self) -> u32 {
        self.outstanding_fetches
    }

    pub fn in_flight_requests(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn has_pending_work(&self) -> bool {
        !self.torn_down && (self.outstanding_fetches > 0 || !self.in_flight.is_empty())
    }

    pub fn request_token(&mut self) -> Vec<Effect> {
        if self.torn_down {
            return Vec::new();
        }
        if self.state != HandshakeState::Pending {
            self.resume_state = self.state;
        }
        self.outstanding_fetches += 1;
        self.transition(HandshakeState::Pending);
        vec![Effect::FetchToken]
    }

    pub fn on_attestation(&mut self, event: AttestationEvent) -> Vec<Effect> {
        if self.torn_down {
            debug!("attestation event after teardown ignored");
            return Vec::new();
        }
        if self.outstanding_fetches == 0 {
            debug!(result = event.result.as_tag(), "stale attestation event ignored");
            return Vec::new();
        }
        self.outstanding_fetches -= 1;

        match event.result {
            AttestationResult::Success => {
                info!(token = %event.token, "received token");
                self.last_token = event.token;
                self.transition(HandshakeState::TokenReady);

                let request_id = self.next_request_id;
                self.next_request_id += 1;
                self.in_flight.insert(request_id, self.last_token.clone());
                self.transition(HandshakeState::RequestSent);
                vec![Effect::SendRequest {
                    request_id,
                    token: self.last_token.clone(),
                }]
            }
            AttestationResult::Failure => {
                warn!(token = %event.token, "failed to obtain token");
                self.last_token = event.token;
                self.transition(HandshakeState::TokenFailed);
                Vec::new()
            }
            AttestationResult::Unknown => {
                warn!("unknown token request result");
                if self.state == HandshakeState::Pending && self.outstanding_fetches == 0 {
                    self.transition(self.resume_state);
                }
                Vec::new()
            }
        }
    }

    pub fn on_response(
        &mut self,
        request_id: u64,
        result: Result<ShapeResponse, DispatchError>,
    ) -> Vec<Effect> {
        let Some(token) = self.in_flight.remove(&request_id) else {
            debug!(request_id, "response for unknown request ignored");
            return Vec::new();
        };
        if self.torn_down {
            debug!(request_id, "response after teardown ignored");
            return Vec::new();
        }

        match result {
            Ok(shape) => {
                info!("token verified by server");
                info!(response = %shape, "shape received");
                self.transition(HandshakeState::Displayed);
                vec![
                    Effect::DisplayMessage(STATUS_FETCHING.to_string()),
                    Effect::NavigateToDisplay(shape.into_string()),
                ]
            }
            Err(err) => {
                let kind = FailureKind::classify(&token);
                match kind {
                    FailureKind::EmptyTokenAtRequestTime => warn!("got empty token"),
                    FailureKind::NetworkFailure => {
                        warn!(error = %err, code = err.code(), "shape request failed")
                    }
                }
                self.transition(HandshakeState::RequestFailed);
                vec![Effect::DisplayMessage(kind.user_message().to_string())]
            }
        }
    }

    /// After teardown every callback is a no-op.
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.outstanding_fetches = 0;
        self.in_flight.clear();
    }

    fn transition(&mut self, next: HandshakeState) {
        debug!(from = self.state.as_str(), to = next.as_str(), "handshake transition");
        self.state = next;
    }
}
