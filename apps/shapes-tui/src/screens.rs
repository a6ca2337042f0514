use crossterm::event::KeyCode;
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use crate::session::UiSink;

pub const DEFAULT_STATUS: &str = "Press Enter to request a shape";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Screen {
    Request,
    Display { shape: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    RequestToken,
    Reset,
    Quit,
    None,
}

pub fn action_for_key(screen: &Screen, code: KeyCode) -> Action {
    match (screen, code) {
        (_, KeyCode::Char('q')) | (_, KeyCode::Esc) => Action::Quit,
        (Screen::Request, KeyCode::Enter) | (Screen::Request, KeyCode::Char('r')) => {
            Action::RequestToken
        }
        (Screen::Display { .. }, KeyCode::Enter) | (Screen::Display { .. }, KeyCode::Char('r')) => {
            Action::Reset
        }
        _ => Action::None,
    }
}

pub struct App {
    screen: Screen,
    status: String,
    base_url: String,
    running: bool,
}

impl App {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            screen: Screen::Request,
            status: DEFAULT_STATUS.to_string(),
            base_url: base_url.into(),
            running: true,
        }
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Back to a fresh request screen.
    pub fn reset(&mut self) {
        self.screen = Screen::Request;
        self.status = DEFAULT_STATUS.to_string();
    }

    pub fn quit(&mut self) {
        self.running = false;
    }
}

impl UiSink for App {
    fn display_message(&mut self, text: &str) {
        self.status = text.to_string();
    }

    fn navigate_to_display(&mut self, shape: &str) {
        self.screen = Screen::Display {
            shape: shape.to_string(),
        };
    }
}

pub fn render(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(2)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(3),
        ])
        .split(f.size());

    let title = Paragraph::new(Line::from(vec![Span::styled(
        "Approov Shapes Demo",
        Style::default().add_modifier(Modifier::BOLD),
    )]))
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL).title("shapes-tui"));
    f.render_widget(title, chunks[0]);

    let server = Paragraph::new(format!("base_url={}", app.base_url))
        .block(Block::default().borders(Borders::ALL).title("server"));
    f.render_widget(server, chunks[1]);

    let (body, title, footer) = match &app.screen {
        Screen::Request => (
            app.status.as_str(),
            "request",
            "Enter/r: request shape   q: quit",
        ),
        Screen::Display { shape } => (shape.as_str(), "shape", "Enter/r: reset   q: quit"),
    };
    // No trimming: the shape is shown exactly as the server sent it.
    let main = Paragraph::new(body)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(main, chunks[2]);

    let footer = Paragraph::new(footer)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, chunks[3]);
}
