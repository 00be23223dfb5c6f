use serde::{Deserialize, Serialize};
use std::fmt;

/// Single structured error shape used by the engine, the store adapter and the CLI.
///
/// `code` is stable and machine-matchable (`COMPONENT_NOT_FOUND`, `DB_QUERY_FAILED`, ...);
/// `details` carries the underlying library error text when there is one.
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

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn component_not_found(component_id: i64) -> Self {
        Self::new("COMPONENT_NOT_FOUND", "Component not found")
            .with_details(format!("component_id={component_id}"))
    }

    pub fn is_not_found(&self) -> bool {
        self.code.ends_with("_NOT_FOUND")
    }
}

/// Adapter for `map_err` on rusqlite calls: keeps the code/message at the call site and the
/// driver error in `details`.
pub(crate) fn db_error(
    code: &'static str,
    message: impl Into<String>,
) -> impl FnOnce(rusqlite::Error) -> AppError {
    let message = message.into();
    move |e| AppError::new(code, message).with_details(e.to_string())
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "[{}] {} ({})", self.code, self.message, details),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl std::error::Error for AppError {}
