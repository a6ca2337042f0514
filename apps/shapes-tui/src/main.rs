use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use crossterm::{
    event::{self, Event, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::{io, path::PathBuf, sync::Arc, time::Duration};

use shapes_tui::attestation::{Attestation, AttestationResult};
use shapes_tui::config::{read_file_config, ClientConfig, Overrides};
use shapes_tui::dispatch::RequestDispatcher;
use shapes_tui::headless::{format_outcome_line, format_start_line, run_cycle, HeadlessUi};
use shapes_tui::screens::{action_for_key, render, Action, App};
use shapes_tui::session::ShapeSession;

#[derive(Parser, Debug)]
#[command(author, version, about = "Approov shapes demo client")]
struct Args {
    /// Shapes server URL (default: SHAPES_BASE_URL or http://127.0.0.1:5000)
    #[arg(long)]
    base_url: Option<String>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Route requests through this proxy
    #[arg(long)]
    proxy: Option<String>,

    /// Token returned by the built-in attestation source (default: SHAPES_APPROOV_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Outcome reported by the built-in attestation source
    #[arg(long, value_enum)]
    result: Option<ResultArg>,

    /// Read each attestation event from this JSON payload file
    #[arg(long)]
    payload_file: Option<PathBuf>,

    /// Run one request cycle and print the outcome
    #[arg(long)]
    headless: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ResultArg {
    Success,
    Failure,
    Unknown,
}

impl From<ResultArg> for AttestationResult {
    fn from(r: ResultArg) -> Self {
        match r {
            ResultArg::Success => AttestationResult::Success,
            ResultArg::Failure => AttestationResult::Failure,
            ResultArg::Unknown => AttestationResult::Unknown,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let file = args.config.as_deref().map(read_file_config).transpose()?;
    let cfg = ClientConfig::resolve(
        Overrides {
            base_url: args.base_url,
            timeout_secs: args.timeout_secs,
            proxy: args.proxy,
            token: args.token,
            result: args.result.map(AttestationResult::from),
            payload_file: args.payload_file,
        },
        file,
        |key| std::env::var(key).ok(),
    )?;

    // One provider for the whole process.
    let attestation = Arc::new(Attestation::new(cfg.token_source()));
    let dispatcher = Arc::new(RequestDispatcher::new(&cfg.dispatch())?);

    if args.headless {
        println!("{}", format_start_line(dispatcher.base_url()));
        let mut session = ShapeSession::new(attestation, dispatcher, HeadlessUi::default());
        let outcome = run_cycle(&mut session).await;
        session.teardown();
        let line = format_outcome_line(&outcome);
        if outcome.is_ok() {
            println!("{line}");
            return Ok(());
        }
        eprintln!("{line}");
        return Err(anyhow!("shape request did not complete"));
    }

    let app = App::new(dispatcher.base_url());
    let mut session = ShapeSession::new(attestation, dispatcher, app);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_terminal(&mut terminal, &mut session);
    session.teardown();

    disable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(LeaveAlternateScreen)?;
    result
}

fn run_terminal(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    session: &mut ShapeSession<App>,
) -> Result<()> {
    while session.ui().is_running() {
        session.pump();
        terminal.draw(|f| render(f, session.ui()))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match action_for_key(session.ui().screen(), key.code) {
                    Action::RequestToken => session.request_token(),
                    Action::Reset => session.ui_mut().reset(),
                    Action::Quit => session.ui_mut().quit(),
                    Action::None => {}
                }
            }
        }
    }
    Ok(())
}
