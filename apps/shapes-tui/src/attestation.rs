//! Attestation provider seam.
//!
//! The provider itself is opaque: a [`TokenSource`] produces exactly one
//! [`AttestationEvent`] per fetch. [`Attestation`] is the process-scoped
//! instance that runs fetches off the caller's thread and broadcasts each
//! event to every registered [`TokenReceiver`].

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttestationResult {
    Success,
    Failure,
    /// Any tag this client does not recognise. Kept distinct from `Failure`.
    Unknown,
}

impl AttestationResult {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "SUCCESS" => AttestationResult::Success,
            "FAILURE" => AttestationResult::Failure,
            _ => AttestationResult::Unknown,
        }
    }

    pub fn as_tag(self) -> &'static str {
        match self {
            AttestationResult::Success => "SUCCESS",
            AttestationResult::Failure => "FAILURE",
            AttestationResult::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttestationEvent {
    pub result: AttestationResult,
    pub token: String,
}

#[derive(Deserialize)]
struct EventPayload {
    #[serde(rename = "Result")]
    result: String,
    #[serde(rename = "Token", default)]
    token: String,
}

impl AttestationEvent {
    pub fn success(token: impl Into<String>) -> Self {
        Self {
            result: AttestationResult::Success,
            token: token.into(),
        }
    }

    pub fn failure(token: impl Into<String>) -> Self {
        Self {
            result: AttestationResult::Failure,
            token: token.into(),
        }
    }

    pub fn unknown() -> Self {
        Self {
            result: AttestationResult::Unknown,
            token: String::new(),
        }
    }

    /// Decodes `{"Result": "<TAG>", "Token": "<token>"}`.
    pub fn from_payload(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let payload: EventPayload = serde_json::from_slice(bytes)?;
        Ok(Self {
            result: AttestationResult::from_tag(&payload.result),
            token: payload.token,
        })
    }
}

/// Produces one attestation outcome per call. May block.
pub trait TokenSource: Send + Sync + 'static {
    fn fetch(&self) -> AttestationEvent;
}

impl TokenSource for Box<dyn TokenSource> {
    fn fetch(&self) -> AttestationEvent {
        (**self).fetch()
    }
}

/// Returns the same configured outcome on every fetch.
#[derive(Clone, Debug)]
pub struct StaticTokenSource {
    event: AttestationEvent,
}

impl StaticTokenSource {
    pub fn new(result: AttestationResult, token: impl Into<String>) -> Self {
        Self {
            event: AttestationEvent {
                result,
                token: token.into(),
            },
        }
    }
}

impl TokenSource for StaticTokenSource {
    fn fetch(&self) -> AttestationEvent {
        self.event.clone()
    }
}

/// Re-reads a JSON event payload on every fetch.
#[derive(Clone, Debug)]
pub struct PayloadFileSource {
    path: PathBuf,
}

impl PayloadFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenSource for PayloadFileSource {
    fn fetch(&self) -> AttestationEvent {
        let bytes = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "attestation payload unreadable");
                return AttestationEvent::failure("");
            }
        };
        match AttestationEvent::from_payload(&bytes) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "attestation payload malformed");
                AttestationEvent::failure("")
            }
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    senders: HashMap<u64, UnboundedSender<AttestationEvent>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn broadcast(registry: &Mutex<Registry>, event: AttestationEvent) {
    let mut reg = lock(registry);
    reg.senders.retain(|_, tx| tx.send(event.clone()).is_ok());
    debug!(
        result = event.result.as_tag(),
        receivers = reg.senders.len(),
        "attestation event delivered"
    );
}

/// Process-scoped attestation provider.
pub struct Attestation {
    source: Arc<dyn TokenSource>,
    registry: Arc<Mutex<Registry>>,
}

impl Attestation {
    pub fn new(source: impl TokenSource) -> Self {
        Self {
            source: Arc::new(source),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Subscribes to attestation events. Dropping the receiver unsubscribes.
    pub fn register_receiver(&self) -> TokenReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut reg = lock(&self.registry);
        let id = reg.next_id;
        reg.next_id += 1;
        reg.senders.insert(id, tx);
        TokenReceiver {
            id,
            rx,
            registry: Arc::clone(&self.registry),
        }
    }

    pub fn receiver_count(&self) -> usize {
        lock(&self.registry).senders.len()
    }

    /// Starts a fetch and returns immediately. The outcome arrives later on
    /// every registered receiver.
    pub fn fetch_token(&self) {
        let source = Arc::clone(&self.source);
        let registry = Arc::clone(&self.registry);
        let job = move || {
            let event = source.fetch();
            broadcast(&registry, event);
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => {
                std::thread::spawn(job);
            }
        }
    }
}

pub struct TokenReceiver {
    id: u64,
    rx: UnboundedReceiver<AttestationEvent>,
    registry: Arc<Mutex<Registry>>,
}

impl TokenReceiver {
    pub async fn recv(&mut self) -> Option<AttestationEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<AttestationEvent> {
        match self.rx.try_recv() {
            Ok(ev) => Some(ev),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl Drop for TokenReceiver {
    fn drop(&mut self) {
        lock(&self.registry).senders.remove(&self.id);
    }
}
