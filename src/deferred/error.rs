use crate::runtime_config::ServerMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Message every aborted field carries.
pub const ABORTED_MESSAGE: &str = "Deferred data aborted";
/// Replacement message for internal errors outside development.
pub const REDACTED_MESSAGE: &str = "Unexpected Server Error";

/// Why a deferred value rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum DeferredError {
    /// An application error. Message and stack are internal details.
    Error {
        message: String,
        stack: Option<String>,
    },
    /// The loader rejected with a plain value meant for the client.
    Value(Value),
    /// Force-settled by the abort governor.
    Aborted,
}

impl DeferredError {
    pub fn error(message: impl Into<String>) -> Self {
        DeferredError::Error {
            message: message.into(),
            stack: None,
        }
    }

    #[must_use]
    pub fn with_stack(self, stack: impl Into<String>) -> Self {
        match self {
            DeferredError::Error { message, .. } => DeferredError::Error {
                message,
                stack: Some(stack.into()),
            },
            other => other,
        }
    }

    pub fn value(value: impl Into<Value>) -> Self {
        DeferredError::Value(value.into())
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, DeferredError::Aborted)
    }

    /// Wire form of this error. Internal details are redacted unless `mode`
    /// is development.
    #[must_use]
    pub fn describe(&self, mode: ServerMode) -> ErrorDescriptor {
        match self {
            DeferredError::Error { message, stack } => {
                if mode.exposes_internals() {
                    ErrorDescriptor {
                        message: message.clone(),
                        stack: stack.clone(),
                        kind: ErrorKind::Error,
                        data: None,
                    }
                } else {
                    ErrorDescriptor {
                        message: REDACTED_MESSAGE.to_string(),
                        stack: None,
                        kind: ErrorKind::Error,
                        data: None,
                    }
                }
            }
            DeferredError::Value(value) => ErrorDescriptor {
                message: match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
                stack: None,
                kind: ErrorKind::Value,
                data: Some(value.clone()),
            },
            DeferredError::Aborted => ErrorDescriptor::aborted(),
        }
    }
}

impl fmt::Display for DeferredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferredError::Error { message, .. } => f.write_str(message),
            DeferredError::Value(value) => write!(f, "Deferred value rejected with {value}"),
            DeferredError::Aborted => f.write_str(ABORTED_MESSAGE),
        }
    }
}

impl std::error::Error for DeferredError {}

impl From<anyhow::Error> for DeferredError {
    fn from(err: anyhow::Error) -> Self {
        DeferredError::Error {
            message: err.to_string(),
            stack: Some(format!("{err:?}")),
        }
    }
}

/// Kind tag carried on the wire so clients can special-case aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    #[default]
    Error,
    Aborted,
    Value,
}

/// Serializable description of a rejected field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default)]
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorDescriptor {
    #[must_use]
    pub fn aborted() -> Self {
        Self {
            message: ABORTED_MESSAGE.to_string(),
            stack: None,
            kind: ErrorKind::Aborted,
            data: None,
        }
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.kind == ErrorKind::Aborted
    }
}
