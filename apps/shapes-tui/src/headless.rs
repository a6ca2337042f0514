//! One handshake cycle without a terminal UI.

use crate::handshake::HandshakeState;
use crate::session::{ShapeSession, UiSink};

#[derive(Debug, Default)]
pub struct HeadlessUi {
    pub messages: Vec<String>,
    pub shape: Option<String>,
}

impl UiSink for HeadlessUi {
    fn display_message(&mut self, text: &str) {
        self.messages.push(text.to_string());
    }

    fn navigate_to_display(&mut self, shape: &str) {
        self.shape = Some(shape.to_string());
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum HeadlessOutcome {
    Shape(String),
    Message(String),
    /// The cycle ended without telling the user anything.
    Silent(HandshakeState),
}

impl HeadlessOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, HeadlessOutcome::Shape(_))
    }
}

/// Requests a token and drives the session until nothing is outstanding.
pub async fn run_cycle(session: &mut ShapeSession<HeadlessUi>) -> HeadlessOutcome {
    session.request_token();
    while session.step().await {}

    let state = session.state();
    let ui = session.ui();
    if let Some(shape) = &ui.shape {
        return HeadlessOutcome::Shape(shape.clone());
    }
    match ui.messages.last() {
        Some(msg) => HeadlessOutcome::Message(msg.clone()),
        None => HeadlessOutcome::Silent(state),
    }
}

pub fn format_start_line(base_url: &str) -> String {
    format!("SHAPES_HEADLESS_START base_url={base_url}")
}

pub fn format_outcome_line(outcome: &HeadlessOutcome) -> String {
    match outcome {
        HeadlessOutcome::Shape(shape) => format!("SHAPES_HEADLESS_OK shape={shape}"),
        HeadlessOutcome::Message(msg) => format!("SHAPES_HEADLESS_ERR message={msg}"),
        HeadlessOutcome::Silent(state) => {
            format!("SHAPES_HEADLESS_ERR state={}", state.as_str())
        }
    }
}
