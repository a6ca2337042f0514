//! Drives one [`Handshake`] against live collaborators.
//!
//! Attestation events and HTTP outcomes are produced on background tasks
//! and delivered through channels; they are only applied on the thread
//! that owns the session, via [`ShapeSession::step`] or [`ShapeSession::pump`].

use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::attestation::{Attestation, AttestationEvent, TokenReceiver};
use crate::dispatch::{DispatchError, RequestDispatcher, ShapeResponse};
use crate::handshake::{Effect, Handshake, HandshakeState};

/// Where the handshake reports to the user.
pub trait UiSink {
    fn display_message(&mut self, text: &str);
    fn navigate_to_display(&mut self, shape: &str);
}

struct ResponseEvent {
    request_id: u64,
    result: Result<ShapeResponse, DispatchError>,
}

enum Incoming {
    Attestation(AttestationEvent),
    Response(ResponseEvent),
    Closed,
}

pub struct ShapeSession<U: UiSink> {
    handshake: Handshake,
    attestation: Arc<Attestation>,
    receiver: Option<TokenReceiver>,
    dispatcher: Arc<RequestDispatcher>,
    responses_tx: UnboundedSender<ResponseEvent>,
    responses_rx: UnboundedReceiver<ResponseEvent>,
    ui: U,
}

impl<U: UiSink> ShapeSession<U> {
    /// Subscribes to `attestation` before any fetch can be triggered.
    pub fn new(attestation: Arc<Attestation>, dispatcher: Arc<RequestDispatcher>, ui: U) -> Self {
        let receiver = attestation.register_receiver();
        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        Self {
            handshake: Handshake::new(),
            attestation,
            receiver: Some(receiver),
            dispatcher,
            responses_tx,
            responses_rx,
            ui,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.handshake.state()
    }

    pub fn last_token(&self) -> &str {
        self.handshake.last_token()
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    pub fn request_token(&mut self) {
        let effects = self.handshake.request_token();
        self.apply(effects);
    }

    /// Waits for the next event and applies it. Returns `false` once no
    /// fetch or request is outstanding.
    pub async fn step(&mut self) -> bool {
        if !self.handshake.has_pending_work() {
            return false;
        }
        let Some(receiver) = self.receiver.as_mut() else {
            return false;
        };
        let incoming = tokio::select! {
            ev = receiver.recv() => ev.map_or(Incoming::Closed, Incoming::Attestation),
            resp = self.responses_rx.recv() => resp.map_or(Incoming::Closed, Incoming::Response),
        };
        match incoming {
            Incoming::Attestation(ev) => self.on_attestation(ev),
            Incoming::Response(resp) => self.on_response(resp),
            Incoming::Closed => return false,
        }
        true
    }

    /// Applies every event already delivered, without waiting.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let ev = self.receiver.as_mut().and_then(TokenReceiver::try_recv);
            if let Some(ev) = ev {
                self.on_attestation(ev);
                applied += 1;
                continue;
            }
            if let Ok(resp) = self.responses_rx.try_recv() {
                self.on_response(resp);
                applied += 1;
                continue;
            }
            return applied;
        }
    }

    /// Unsubscribes and turns any late callback into a no-op.
    pub fn teardown(&mut self) {
        self.handshake.teardown();
        self.receiver = None;
        debug!(
            receivers = self.attestation.receiver_count(),
            "session torn down"
        );
    }

    fn on_attestation(&mut self, ev: AttestationEvent) {
        let effects = self.handshake.on_attestation(ev);
        self.apply(effects);
    }

    fn on_response(&mut self, resp: ResponseEvent) {
        let effects = self.handshake.on_response(resp.request_id, resp.result);
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::FetchToken => self.attestation.fetch_token(),
                Effect::SendRequest { request_id, token } => {
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let tx = self.responses_tx.clone();
                    tokio::spawn(async move {
                        let result = dispatcher.send_request(&token).await;
                        // A closed channel means the session is gone.
                        let _ = tx.send(ResponseEvent { request_id, result });
                    });
                }
                Effect::DisplayMessage(text) => self.ui.display_message(&text),
                Effect::NavigateToDisplay(shape) => self.ui.navigate_to_display(&shape),
            }
        }
    }
}
