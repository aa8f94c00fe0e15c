use std::path::PathBuf;
use std::time::Duration;

use reqwest::Url;

use crate::{AppError, AppResult};

pub const ENV_API_URL: &str = "LISTING_DESK_API_URL";
pub const ENV_TIMEOUT_SECS: &str = "LISTING_DESK_TIMEOUT_SECS";
pub const ENV_SESSION_FILE: &str = "LISTING_DESK_SESSION_FILE";

const DEFAULT_API_URL: &str = "http://localhost:8000/";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const APP_DIR: &str = "listing-desk";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub session_file: PathBuf,
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(base_url: &str) -> AppResult<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            session_file: default_session_file(),
            user_agent: default_user_agent(),
        })
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = lookup(ENV_API_URL).unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let mut config = Self::new(&base)?;

        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                AppError::new("CONFIG/INVALID_TIMEOUT", "Timeout must be a whole number of seconds")
                    .with_context("value", raw.clone())
            })?;
            if secs == 0 {
                return Err(AppError::new(
                    "CONFIG/INVALID_TIMEOUT",
                    "Timeout must be greater than zero",
                ));
            }
            config.timeout = Duration::from_secs(secs);
        }

        if let Some(path) = lookup(ENV_SESSION_FILE).filter(|p| !p.trim().is_empty()) {
            config.session_file = PathBuf::from(path);
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: &str) -> AppResult<Self> {
        self.base_url = parse_base_url(base_url)?;
        Ok(self)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = path.into();
        self
    }
}

fn parse_base_url(raw: &str) -> AppResult<Url> {
    let mut normalized = raw.trim().to_string();
    // `Url::join` replaces the last segment unless the base ends in a slash.
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let url = Url::parse(&normalized).map_err(|err| {
        AppError::new("CONFIG/INVALID_URL", err.to_string()).with_context("value", raw.to_string())
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(AppError::new("CONFIG/INVALID_URL", "API URL must use http or https")
            .with_context("scheme", other.to_string())),
    }
}

fn default_session_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("session.json")
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
