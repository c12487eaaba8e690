//! Byte encodings of a stream for the two transports.
//!
//! Document transport (HTML):
//!
//! ```text
//! <shell html><script>window.__brrts=window.__brrts||[];__brrts.push({"kind":"initial-shell","critical":{..}})</script>
//! <script>__brrts.push({"kind":"resolved-value","route":"root","path":"a","value":1})</script>
//! ```
//!
//! Data transport (`text/remix-deferred`), one route only:
//!
//! ```text
//! {"a":"__deferred_promise:a"}\n\n
//! data:{"a":1}\n\n
//! error:{"b":{"message":"..","kind":"error"}}\n\n
//! ```

use super::chunk::StreamChunk;
use crate::response::{DEFERRED_CONTENT_TYPE, HTML_CONTENT_TYPE};
use serde_json::{Map, Value};
use std::io;

/// Marker the client looks for in document scripts.
pub const SCRIPT_PUSH: &str = "__brrts.push(";
pub const SCRIPT_CLOSE: &str = ")</script>";
pub const SCRIPT_OPEN: &str = "<script>";
pub const SCRIPT_BOOTSTRAP: &str = "<script>window.__brrts=window.__brrts||[];";
pub const FRAME_SEPARATOR: &str = "\n\n";
pub const DATA_FRAME_PREFIX: &str = "data:";
pub const ERROR_FRAME_PREFIX: &str = "error:";

/// Turns chunks into transport bytes.
pub trait ChunkEncoder: Send {
    fn encode(&mut self, chunk: &StreamChunk, out: &mut Vec<u8>) -> io::Result<()>;
    fn content_type(&self) -> &'static str;
}

/// Escape JSON so it can sit inside an inline `<script>`: no `</script>`, no
/// HTML entities, no JS line terminators.
#[must_use]
pub fn escape_html_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            other => out.push(other),
        }
    }
    out
}

fn to_io(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

/// HTML document encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentEncoder;

impl ChunkEncoder for DocumentEncoder {
    fn encode(&mut self, chunk: &StreamChunk, out: &mut Vec<u8>) -> io::Result<()> {
        let json = serde_json::to_string(chunk).map_err(to_io)?;
        if let StreamChunk::InitialShell { html, .. } = chunk {
            out.extend_from_slice(html.as_bytes());
            out.extend_from_slice(SCRIPT_BOOTSTRAP.as_bytes());
        } else {
            out.extend_from_slice(SCRIPT_OPEN.as_bytes());
        }
        out.extend_from_slice(SCRIPT_PUSH.as_bytes());
        out.extend_from_slice(escape_html_json(&json).as_bytes());
        out.extend_from_slice(SCRIPT_CLOSE.as_bytes());
        Ok(())
    }

    fn content_type(&self) -> &'static str {
        HTML_CONTENT_TYPE
    }
}

/// Data-channel encoding for a single route's container.
#[derive(Debug, Clone)]
pub struct DataEncoder {
    route: String,
}

impl DataEncoder {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
        }
    }

    fn frame(out: &mut Vec<u8>, prefix: &str, key: String, value: Value) -> io::Result<()> {
        let mut obj = Map::new();
        obj.insert(key, value);
        out.extend_from_slice(prefix.as_bytes());
        serde_json::to_writer(&mut *out, &Value::Object(obj)).map_err(to_io)?;
        out.extend_from_slice(FRAME_SEPARATOR.as_bytes());
        Ok(())
    }
}

impl ChunkEncoder for DataEncoder {
    fn encode(&mut self, chunk: &StreamChunk, out: &mut Vec<u8>) -> io::Result<()> {
        match chunk {
            StreamChunk::InitialShell { critical, .. } => {
                let own = critical.get(&self.route).unwrap_or(&Value::Null);
                serde_json::to_writer(&mut *out, own).map_err(to_io)?;
                out.extend_from_slice(FRAME_SEPARATOR.as_bytes());
                Ok(())
            }
            StreamChunk::ResolvedValue {
                route, path, value, ..
            } if *route == self.route => {
                Self::frame(out, DATA_FRAME_PREFIX, path.to_string(), value.clone())
            }
            StreamChunk::RejectedValue { route, path, error } if *route == self.route => {
                let error = serde_json::to_value(error).map_err(to_io)?;
                Self::frame(out, ERROR_FRAME_PREFIX, path.to_string(), error)
            }
            _ => Ok(()),
        }
    }

    fn content_type(&self) -> &'static str {
        DEFERRED_CONTENT_TYPE
    }
}
