//! Error types shared across the runtime.
//!
//! Handler code works with [`anyhow::Error`]; everything the runtime itself can
//! fail with is one of the enums below so callers can match on it.

use crate::data::HandlerKind;
use crate::deferred::FieldPath;
use crate::response::Response;
use http::Method;
use std::fmt;

/// Failure of a loader or action invocation.
#[derive(Debug)]
pub enum DataError {
    /// No handler registered for the request method (405).
    MethodNotAllowed {
        method: Method,
        url: String,
        route_id: String,
        kind: HandlerKind,
    },
    /// A handler finished without returning anything. Always a developer error.
    ReturnedUndefined { route_id: String, kind: HandlerKind },
    /// Actions cannot stream; deferred containers are loader-only.
    DeferredFromAction { route_id: String },
    /// A non-redirect response thrown by the handler, already carrying the
    /// catch marker header. Only produced in router mode.
    Thrown(Response),
    /// Any other failure raised by the handler, unchanged.
    Handler(anyhow::Error),
    /// A response advertised `application/json` but the body did not parse.
    InvalidJson(serde_json::Error),
}

impl DataError {
    /// HTTP status this error maps to when it reaches the transport.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            DataError::MethodNotAllowed { .. } => 405,
            DataError::Thrown(response) => response.status,
            _ => 500,
        }
    }
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::MethodNotAllowed {
                method,
                url,
                route_id,
                kind,
            } => write!(
                f,
                "You made a {method} request to \"{url}\" but did not provide {article} `{kind}` \
                 for route \"{route_id}\", so there is no way to handle the request.",
                article = kind.article(),
            ),
            DataError::ReturnedUndefined { route_id, kind } => write!(
                f,
                "You defined {article} {kind} for route \"{route_id}\" but didn't return anything \
                 from your `{kind}` function. Please return a value or `null`.",
                article = kind.article(),
            ),
            DataError::DeferredFromAction { route_id } => write!(
                f,
                "The action for route \"{route_id}\" returned deferred data; only loaders may defer."
            ),
            DataError::Thrown(response) => {
                write!(f, "Handler threw a {} response", response.status)
            }
            DataError::Handler(err) => write!(f, "{err}"),
            DataError::InvalidJson(err) => write!(f, "Invalid JSON response body: {err}"),
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::Handler(err) => Some(err.as_ref()),
            DataError::InvalidJson(err) => Some(err),
            _ => None,
        }
    }
}

/// Failure reported by the UI collaborator while producing the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellRenderError {
    /// The renderer returned an error.
    Render(String),
    /// The renderer panicked.
    Panicked(String),
    /// The abort governor fired before the shell was ready.
    Aborted,
}

impl ShellRenderError {
    pub fn render(message: impl Into<String>) -> Self {
        ShellRenderError::Render(message.into())
    }
}

impl fmt::Display for ShellRenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellRenderError::Render(msg) => write!(f, "Shell render failed: {msg}"),
            ShellRenderError::Panicked(msg) => write!(f, "Shell renderer panicked: {msg}"),
            ShellRenderError::Aborted => write!(f, "Shell was not ready before the abort delay"),
        }
    }
}

impl std::error::Error for ShellRenderError {}

/// Failure of a whole stream.
#[derive(Debug)]
pub enum AssembleError {
    /// The shell failed before anything was flushed; the caller may still send
    /// an alternate response.
    Shell(ShellRenderError),
    /// The transport failed. If `flushed` is true the head was already sent.
    Transport { flushed: bool, source: std::io::Error },
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssembleError::Shell(err) => write!(f, "{err}"),
            AssembleError::Transport { flushed, source } => {
                write!(f, "Transport failed (head flushed: {flushed}): {source}")
            }
        }
    }
}

impl std::error::Error for AssembleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssembleError::Shell(err) => Some(err),
            AssembleError::Transport { source, .. } => Some(source),
        }
    }
}

/// Invalid deferred container construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredBuildError {
    /// Keys must be non-empty and may not contain `.`.
    InvalidKey(String),
    /// The same field path was declared twice.
    DuplicateField(FieldPath),
}

impl fmt::Display for DeferredBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferredBuildError::InvalidKey(key) => {
                write!(f, "Invalid deferred field key {key:?}: keys must be non-empty and contain no '.'")
            }
            DeferredBuildError::DuplicateField(path) => {
                write!(f, "Deferred field '{path}' declared more than once")
            }
        }
    }
}

impl std::error::Error for DeferredBuildError {}

/// Configuration loading failure.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: String, source: std::io::Error },
    Yaml(serde_yaml::Error),
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => write!(f, "Cannot read config '{path}': {source}"),
            ConfigError::Yaml(err) => write!(f, "Invalid config YAML: {err}"),
            ConfigError::InvalidValue { key, value } => {
                write!(f, "Invalid value {value:?} for config key '{key}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Yaml(err) => Some(err),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}

/// Malformed bytes on a client transport.
#[derive(Debug)]
pub enum DecodeError {
    Utf8(std::str::Utf8Error),
    Json(serde_json::Error),
    /// A data frame that is neither the critical payload nor `data:`/`error:`.
    UnknownFrame(String),
    /// A settled-value frame that does not hold exactly one field.
    MalformedFrame(String),
    /// The stream ended in the middle of a frame.
    Truncated,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Utf8(err) => write!(f, "Stream is not valid UTF-8: {err}"),
            DecodeError::Json(err) => write!(f, "Stream payload is not valid JSON: {err}"),
            DecodeError::UnknownFrame(frame) => write!(f, "Unknown stream frame: {frame:.64}"),
            DecodeError::MalformedFrame(frame) => write!(f, "Malformed stream frame: {frame:.64}"),
            DecodeError::Truncated => write!(f, "Stream ended inside a frame"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Utf8(err) => Some(err),
            DecodeError::Json(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_not_allowed_names_the_action() {
        let err = DataError::MethodNotAllowed {
            method: Method::POST,
            url: "http://localhost/posts".to_string(),
            route_id: "routes/posts".to_string(),
            kind: HandlerKind::Action,
        };
        let msg = err.to_string();
        assert!(msg.contains("POST"));
        assert!(msg.contains("an `action`"));
        assert!(msg.contains("\"routes/posts\""));
        assert_eq!(err.status(), 405);
    }

    #[test]
    fn undefined_names_route_and_kind() {
        let err = DataError::ReturnedUndefined {
            route_id: "routes/index".to_string(),
            kind: HandlerKind::Loader,
        };
        let msg = err.to_string();
        assert!(msg.contains("a loader for route \"routes/index\""));
        assert!(msg.contains("`loader` function"));
        assert_eq!(err.status(), 500);
    }
}
