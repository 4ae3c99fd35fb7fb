//! Structured error types shared across swept crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`SweepError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (equation, scheme, paths, counts, ...).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the sweep driver.
///
/// Per-run failures (non-zero exits, timeouts) are recorded as run outcomes
/// and never surface through this type unless the sweep runs in abort mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum SweepError {
    /// Malformed sweep definition or configuration, raised before any run.
    #[error("invalid spec: {0}")]
    InvalidSpec(ErrorInfo),
    /// External binary or launcher could not be started.
    #[error("spawn failed: {0}")]
    SpawnFailed(ErrorInfo),
    /// The sweep stopped on its first terminal failure.
    #[error("sweep aborted: {0}")]
    Aborted(ErrorInfo),
    /// The sweep was cancelled before every run reached a terminal state.
    #[error("sweep cancelled: {0}")]
    Cancelled(ErrorInfo),
    /// The timing artifact does not account for every successful run.
    #[error("incomplete artifact: {0}")]
    IncompleteArtifact(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
    /// Filesystem errors.
    #[error("io error: {0}")]
    Io(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl SweepError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            SweepError::InvalidSpec(info)
            | SweepError::SpawnFailed(info)
            | SweepError::Aborted(info)
            | SweepError::Cancelled(info)
            | SweepError::IncompleteArtifact(info)
            | SweepError::Serde(info)
            | SweepError::Io(info) => info,
        }
    }

    /// Shorthand for an [`SweepError::InvalidSpec`] with no context.
    pub fn invalid_spec(code: impl Into<String>, message: impl Into<String>) -> Self {
        SweepError::InvalidSpec(ErrorInfo::new(code, message))
    }

    /// Wraps an I/O failure under the provided error code.
    pub fn io(code: &str, err: impl ToString) -> Self {
        SweepError::Io(ErrorInfo::new(code, err.to_string()))
    }

    /// Wraps a serialization failure under the provided error code.
    pub fn serde(code: &str, err: impl ToString) -> Self {
        SweepError::Serde(ErrorInfo::new(code, err.to_string()))
    }
}
