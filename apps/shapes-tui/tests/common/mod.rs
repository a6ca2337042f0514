use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::Duration;

use shapes_tui::attestation::{Attestation, AttestationEvent, TokenSource};
use shapes_tui::dispatch::{DispatchConfig, RequestDispatcher};
use shapes_tui::headless::HeadlessUi;
use shapes_tui::session::ShapeSession;

/// Answers every GET with a fixed status and body and records the
/// `ApproovToken` header of each request (`None` when absent).
pub struct ShapeTestServer {
    base_url: String,
    tokens: Arc<Mutex<Vec<Option<String>>>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl ShapeTestServer {
    pub fn start(status: u16, body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.set_nonblocking(true).expect("nonblocking");
        let addr = listener.local_addr().expect("addr");
        let tokens = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));

        let tokens_t = Arc::clone(&tokens);
        let shutdown_t = Arc::clone(&shutdown);
        let body = body.to_string();
        let handle = thread::spawn(move || {
            while !shutdown_t.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => handle_conn(stream, status, &body, &tokens_t),
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            tokens,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().expect("tokens lock").clone()
    }

    pub fn request_count(&self) -> usize {
        self.tokens.lock().expect("tokens lock").len()
    }
}

impl Drop for ShapeTestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn handle_conn(mut stream: TcpStream, status: u16, body: &str, tokens: &Mutex<Vec<Option<String>>>) {
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let head = String::from_utf8_lossy(&buf).to_string();
    let token = head.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("approovtoken") {
            Some(value.trim().to_string())
        } else {
            None
        }
    });
    tokens.lock().expect("tokens lock").push(token);

    let reason = if (200..300).contains(&status) { "OK" } else { "ERR" };
    let resp = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(resp.as_bytes());
    let _ = stream.flush();
}

/// A base URL with nothing listening behind it.
#[allow(dead_code)]
pub fn closed_base_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}")
}

/// Hands out queued outcomes in order; `Unknown` once the queue is empty.
pub struct ScriptedSource {
    events: Mutex<VecDeque<AttestationEvent>>,
}

impl ScriptedSource {
    pub fn new(events: Vec<AttestationEvent>) -> Self {
        Self {
            events: Mutex::new(events.into()),
        }
    }
}

impl TokenSource for ScriptedSource {
    fn fetch(&self) -> AttestationEvent {
        self.events
            .lock()
            .expect("events lock")
            .pop_front()
            .unwrap_or_else(AttestationEvent::unknown)
    }
}

#[allow(dead_code)]
pub fn headless_session(
    base_url: &str,
    events: Vec<AttestationEvent>,
) -> (Arc<Attestation>, ShapeSession<HeadlessUi>) {
    let attestation = Arc::new(Attestation::new(ScriptedSource::new(events)));
    let dispatcher =
        Arc::new(RequestDispatcher::new(&DispatchConfig::new(base_url)).expect("dispatcher"));
    let session = ShapeSession::new(Arc::clone(&attestation), dispatcher, HeadlessUi::default());
    (attestation, session)
}

#[allow(dead_code)]
pub async fn settle(session: &mut ShapeSession<HeadlessUi>) {
    tokio::time::timeout(Duration::from_secs(15), async {
        while session.step().await {}
    })
    .await
    .expect("session settles");
}
