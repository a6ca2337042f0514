use reqwest::{Client, Proxy, Url};
use std::fmt;
use std::time::Duration;
use tracing::debug;

pub const TOKEN_HEADER: &str = "ApproovToken";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const ALLOW_REMOTE_ENV: &str = "SHAPES_ALLOW_REMOTE";

// Hosts reachable without opt-in. 10.0.2.2 is the emulator alias for the host loopback.
const LOCAL_HOSTS: &[&str] = &["127.0.0.1", "localhost", "[::1]", "10.0.2.2"];

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid base url {0}; reason_code=INVALID_BASE_URL")]
    InvalidBaseUrl(String),
    #[error("remote base url needs SHAPES_ALLOW_REMOTE=1; reason_code=REMOTE_OPT_IN_REQUIRED")]
    RemoteOptIn,
    #[error("http client setup failed; reason_code=CLIENT_BUILD: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request failed; reason_code=TRANSPORT: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("server rejected request; reason_code=HTTP_STATUS_{0}")]
    Status(u16),
    #[error("response body unreadable; reason_code=BODY: {0}")]
    Body(#[source] reqwest::Error),
}

impl DispatchError {
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::InvalidBaseUrl(_) => "INVALID_BASE_URL",
            DispatchError::RemoteOptIn => "REMOTE_OPT_IN_REQUIRED",
            DispatchError::Client(_) => "CLIENT_BUILD",
            DispatchError::Transport(_) => "TRANSPORT",
            DispatchError::Status(_) => "HTTP_STATUS",
            DispatchError::Body(_) => "BODY",
        }
    }
}

/// Server payload, shown exactly as received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShapeResponse(String);

impl ShapeResponse {
    pub fn new(body: impl Into<String>) -> Self {
        Self(body.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ShapeResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub proxy: Option<String>,
}

impl DispatchConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            proxy: None,
        }
    }
}

pub struct RequestDispatcher {
    base_url: String,
    client: Client,
}

impl RequestDispatcher {
    pub fn new(cfg: &DispatchConfig) -> Result<Self, DispatchError> {
        let base_url = cfg.base_url.trim_end_matches('/').to_string();
        enforce_remote_opt_in(&base_url)?;

        let mut builder = Client::builder().timeout(cfg.timeout);
        // Only an explicit proxy is used; HTTP_PROXY and friends are ignored.
        builder = match cfg.proxy.as_deref() {
            Some(proxy_url) => builder.proxy(Proxy::all(proxy_url).map_err(DispatchError::Client)?),
            None => builder.no_proxy(),
        };
        let client = builder.build().map_err(DispatchError::Client)?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One GET to the base URL carrying the token header.
    pub async fn send_request(&self, token: &str) -> Result<ShapeResponse, DispatchError> {
        debug!(url = %self.base_url, "sending shape request");
        let resp = self
            .client
            .get(&self.base_url)
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(DispatchError::Transport)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }
        let body = resp.text().await.map_err(DispatchError::Body)?;
        Ok(ShapeResponse::new(body))
    }
}

pub fn is_local_base_url(base_url: &str) -> Result<bool, DispatchError> {
    let url =
        Url::parse(base_url).map_err(|_| DispatchError::InvalidBaseUrl(base_url.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| DispatchError::InvalidBaseUrl(base_url.to_string()))?;
    Ok(LOCAL_HOSTS.contains(&host))
}

fn enforce_remote_opt_in(base_url: &str) -> Result<(), DispatchError> {
    if is_local_base_url(base_url)? {
        return Ok(());
    }
    let allow = std::env::var(ALLOW_REMOTE_ENV).unwrap_or_default();
    if allow != "1" {
        return Err(DispatchError::RemoteOptIn);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_and_emulator_hosts_are_local() {
        assert!(is_local_base_url("http://127.0.0.1:5000").unwrap());
        assert!(is_local_base_url("http://localhost:5000/").unwrap());
        assert!(is_local_base_url("http://10.0.2.2:5000").unwrap());
        assert!(is_local_base_url("http://[::1]:5000").unwrap());
        assert!(!is_local_base_url("http://localhost.example.com:5000").unwrap());
    }

    #[test]
    fn garbage_base_url_is_invalid() {
        let err = is_local_base_url("not a url").err().unwrap();
        assert_eq!(err.code(), "INVALID_BASE_URL");
    }

    #[test]
    fn remote_opt_in_guard_rejects_without_env() {
        std::env::remove_var(ALLOW_REMOTE_ENV);
        let err = RequestDispatcher::new(&DispatchConfig::new("http://shapes.example.com:5000"))
            .err()
            .unwrap();
        let msg = format!("{err}");
        assert!(msg.contains("reason_code=REMOTE_OPT_IN_REQUIRED"));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let d = RequestDispatcher::new(&DispatchConfig::new("http://127.0.0.1:5000/")).unwrap();
        assert_eq!(d.base_url(), "http://127.0.0.1:5000");
    }

    #[test]
    fn unparsable_proxy_is_a_client_build_error() {
        let cfg = DispatchConfig {
            proxy: Some("http://[not-a-proxy".to_string()),
            ..DispatchConfig::new("http://127.0.0.1:5000")
        };
        let err = RequestDispatcher::new(&cfg).err().unwrap();
        assert!(matches!(err, DispatchError::Client(_)));
        assert_eq!(err.code(), "CLIENT_BUILD");
        assert!(err.to_string().contains("reason_code=CLIENT_BUILD"));
    }

    #[test]
    fn status_error_carries_code() {
        let e = DispatchError::Status(401);
        assert_eq!(
            e.to_string(),
            "server rejected request; reason_code=HTTP_STATUS_401"
        );
    }
}
