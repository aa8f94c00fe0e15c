use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::error::Category as JsonCategory;

/// Error surfaced to the operator: a stable `AREA/REASON` code, a readable
/// message and string context. Server field errors travel as
/// `field.<name>` context entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Underlying failure, when one was converted from another error type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

pub const FIELD_CONTEXT_PREFIX: &str = "field.";

impl AppError {
    /// Code for failures that carry no more specific classification.
    pub const UNKNOWN_CODE: &'static str = "CLIENT/UNKNOWN";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_contexts<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in entries {
            self.context.insert(key.into(), value.into());
        }
        self
    }

    /// Field validation messages reported by the server, sorted by field name.
    pub fn field_errors(&self) -> Vec<(&str, &str)> {
        let mut fields: Vec<(&str, &str)> = self
            .context
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(FIELD_CONTEXT_PREFIX)
                    .map(|field| (field, value.as_str()))
            })
            .collect();
        fields.sort_unstable();
        fields
    }

    pub fn is_auth(&self) -> bool {
        self.code.starts_with("AUTH/")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            let mut entries: Vec<_> = self.context.iter().collect();
            entries.sort_unstable();
            let rendered: Vec<String> = entries
                .into_iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            write!(f, " ({})", rendered.join(", "))?;
        }
        Ok(())
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn StdError + 'static))
    }
}

fn from_chain(err: &(dyn StdError + 'static)) -> AppError {
    if let Some(app) = err.downcast_ref::<AppError>() {
        return app.clone();
    }
    AppError {
        cause: err.source().map(|source| Box::new(from_chain(source))),
        ..AppError::new(AppError::UNKNOWN_CODE, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        from_chain(error.as_ref())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        let app = AppError::new(format!("IO/{:?}", error.kind()), error.to_string());
        match error.raw_os_error() {
            Some(os_code) => app.with_context("os_code", os_code.to_string()),
            None => app,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        let code = match error.classify() {
            JsonCategory::Io => "JSON/IO",
            JsonCategory::Syntax => "JSON/SYNTAX",
            JsonCategory::Data => "JSON/DATA",
            JsonCategory::Eof => "JSON/EOF",
        };
        let app = AppError::new(code, error.to_string());
        if error.line() == 0 {
            return app;
        }
        app.with_context("line", error.line().to_string())
            .with_context("column", error.column().to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        let code = match error.status() {
            _ if error.is_timeout() => "HTTP/TIMEOUT".to_string(),
            _ if error.is_connect() => "HTTP/CONNECT".to_string(),
            _ if error.is_decode() => "HTTP/DECODE".to_string(),
            _ if error.is_builder() => "HTTP/BUILDER".to_string(),
            Some(status) => format!("HTTP/{}", status.as_u16()),
            None => "HTTP/ERROR".to_string(),
        };
        let app = AppError::new(code, error.to_string());
        match error.url() {
            Some(url) => app.with_context("path", url.path()),
            None => app,
        }
    }
}
