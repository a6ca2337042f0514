use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::attestation::{AttestationResult, PayloadFileSource, StaticTokenSource, TokenSource};
use crate::dispatch::{DispatchConfig, DEFAULT_TIMEOUT_SECS};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const BASE_URL_ENV: &str = "SHAPES_BASE_URL";
pub const TOKEN_ENV: &str = "SHAPES_APPROOV_TOKEN";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config {}: {source}; reason_code=CONFIG_READ", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config {}: {source}; reason_code=CONFIG_PARSE", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported attestation result {0:?}; reason_code=CONFIG_RESULT")]
    InvalidResult(String),
    #[error("timeout must be at least one second; reason_code=CONFIG_TIMEOUT")]
    Timeout,
}

/// On-disk JSON config. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub proxy: Option<String>,
    pub token: Option<String>,
    pub result: Option<String>,
    pub payload_file: Option<PathBuf>,
}

pub fn read_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let data = fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Values given on the command line.
#[derive(Debug, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub proxy: Option<String>,
    pub token: Option<String>,
    pub result: Option<AttestationResult>,
    pub payload_file: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceConfig {
    Static {
        result: AttestationResult,
        token: String,
    },
    PayloadFile(PathBuf),
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub source: SourceConfig,
}

pub fn parse_result(value: &str) -> Result<AttestationResult, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "success" => Ok(AttestationResult::Success),
        "failure" => Ok(AttestationResult::Failure),
        "unknown" => Ok(AttestationResult::Unknown),
        _ => Err(ConfigError::InvalidResult(value.to_string())),
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

impl ClientConfig {
    /// Precedence: command line, then environment, then file, then defaults.
    pub fn resolve(
        cli: Overrides,
        file: Option<FileConfig>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file = file.unwrap_or_default();

        let base_url = non_empty(cli.base_url)
            .or_else(|| non_empty(env(BASE_URL_ENV)))
            .or_else(|| non_empty(file.base_url))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = cli
            .timeout_secs
            .or(file.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::Timeout);
        }

        let proxy = non_empty(cli.proxy).or_else(|| non_empty(file.proxy));

        let source = match cli.payload_file.or(file.payload_file) {
            Some(path) => SourceConfig::PayloadFile(path),
            None => {
                let result = match (cli.result, file.result) {
                    (Some(r), _) => r,
                    (None, Some(s)) => parse_result(&s)?,
                    (None, None) => AttestationResult::Success,
                };
                let token = cli
                    .token
                    .or_else(|| env(TOKEN_ENV))
                    .or(file.token)
                    .unwrap_or_default();
                SourceConfig::Static { result, token }
            }
        };

        Ok(Self {
            base_url,
            timeout: Duration::from_secs(timeout_secs),
            proxy,
            source,
        })
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            base_url: self.base_url.clone(),
            timeout: self.timeout,
            proxy: self.proxy.clone(),
        }
    }

    pub fn token_source(&self) -> Box<dyn TokenSource> {
        match &self.source {
            SourceConfig::Static { result, token } => {
                Box::new(StaticTokenSource::new(*result, token.clone()))
            }
            SourceConfig::PayloadFile(path) => Box::new(PayloadFileSource::new(path.clone())),
        }
    }
}
