use crate::deferred::{ErrorDescriptor, FieldPath};
use crate::response::HeaderVec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Where a deferred field lives: the route whose loader produced it plus the
/// path inside that loader's data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldAddress {
    pub route: String,
    pub path: FieldPath,
}

impl FieldAddress {
    pub fn new(route: impl Into<String>, path: FieldPath) -> Self {
        Self {
            route: route.into(),
            path,
        }
    }
}

impl fmt::Display for FieldAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.route, self.path)
    }
}

/// One unit of a stream. The shell is always first; the others follow in
/// settlement order and are never retracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StreamChunk {
    InitialShell {
        /// Rendered document shell. Not repeated on the wire.
        #[serde(default, skip_serializing)]
        html: String,
        /// Critical data keyed by route id; pending fields hold placeholders.
        critical: Value,
    },
    ResolvedValue {
        route: String,
        path: FieldPath,
        value: Value,
        /// Optional markup for the placeholder's content, when the renderer
        /// provides one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        html: Option<String>,
    },
    RejectedValue {
        route: String,
        path: FieldPath,
        error: ErrorDescriptor,
    },
}

impl StreamChunk {
    /// Address of a settled-value chunk; `None` for the shell.
    #[must_use]
    pub fn address(&self) -> Option<FieldAddress> {
        match self {
            StreamChunk::InitialShell { .. } => None,
            StreamChunk::ResolvedValue { route, path, .. }
            | StreamChunk::RejectedValue { route, path, .. } => {
                Some(FieldAddress::new(route.clone(), path.clone()))
            }
        }
    }

    #[must_use]
    pub fn is_shell(&self) -> bool {
        matches!(self, StreamChunk::InitialShell { .. })
    }
}

/// Status and headers, fixed once the shell is flushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: HeaderVec,
}

impl ResponseHead {
    #[must_use]
    pub fn new(status: u16, headers: HeaderVec) -> Self {
        Self { status, headers }
    }

    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
