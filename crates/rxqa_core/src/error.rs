use serde::{Deserialize, Serialize};
use std::fmt;

/// Single structured error shape shared by the index, the providers and the
/// query pipeline. An outer surface maps `code` to its own status space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    /// Re-wrap `inner` under a new code while keeping its retry hint and a
    /// trace of the original failure in `details`.
    pub fn wrap(code: impl Into<String>, message: impl Into<String>, inner: &AppError) -> Self {
        let details = match inner.details.as_deref() {
            Some(d) => format!("{}: {}; {}", inner.code, inner.message, d),
            None => format!("{}: {}", inner.code, inner.message),
        };
        Self::new(code, message)
            .with_details(details)
            .with_retryable(inner.retryable)
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.details.as_deref() {
            Some(d) => write!(f, "[{}] {} ({})", self.code, self.message, d),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for AppError {}
