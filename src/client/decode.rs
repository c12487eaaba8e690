//! Incremental decoders for both transports. Bytes may arrive split anywhere;
//! each `feed` returns the chunks that became complete.

use crate::deferred::{ErrorDescriptor, FieldPath};
use crate::error::DecodeError;
use crate::stream::{
    StreamChunk, DATA_FRAME_PREFIX, ERROR_FRAME_PREFIX, FRAME_SEPARATOR, SCRIPT_BOOTSTRAP,
    SCRIPT_CLOSE, SCRIPT_OPEN, SCRIPT_PUSH,
};
use serde_json::{Map, Value};

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Decoder for `text/remix-deferred` bodies of one route.
#[derive(Debug)]
pub struct DataFrameDecoder {
    route: String,
    buf: Vec<u8>,
    seen_critical: bool,
}

impl DataFrameDecoder {
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            buf: Vec::new(),
            seen_critical: false,
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<StreamChunk>, DecodeError> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        let sep = FRAME_SEPARATOR.as_bytes();
        while let Some(end) = find(&self.buf, sep) {
            let frame: Vec<u8> = self.buf.drain(..end + sep.len()).take(end).collect();
            let text = std::str::from_utf8(&frame).map_err(DecodeError::Utf8)?;
            if text.trim().is_empty() {
                continue;
            }
            out.push(self.decode_frame(text)?);
        }
        Ok(out)
    }

    /// Call once the body has ended.
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.buf.iter().all(u8::is_ascii_whitespace) {
            Ok(())
        } else {
            Err(DecodeError::Truncated)
        }
    }

    fn decode_frame(&mut self, text: &str) -> Result<StreamChunk, DecodeError> {
        if !self.seen_critical {
            self.seen_critical = true;
            let value: Value = serde_json::from_str(text).map_err(DecodeError::Json)?;
            let mut critical = Map::new();
            critical.insert(self.route.clone(), value);
            return Ok(StreamChunk::InitialShell {
                html: String::new(),
                critical: Value::Object(critical),
            });
        }
        if let Some(body) = text.strip_prefix(DATA_FRAME_PREFIX) {
            let (path, value) = single_field(body)?;
            return Ok(StreamChunk::ResolvedValue {
                route: self.route.clone(),
                path,
                value,
                html: None,
            });
        }
        if let Some(body) = text.strip_prefix(ERROR_FRAME_PREFIX) {
            let (path, value) = single_field(body)?;
            let error: ErrorDescriptor =
                serde_json::from_value(value).map_err(DecodeError::Json)?;
            return Ok(StreamChunk::RejectedValue {
                route: self.route.clone(),
                path,
                error,
            });
        }
        Err(DecodeError::UnknownFrame(text.to_string()))
    }
}

fn single_field(body: &str) -> Result<(FieldPath, Value), DecodeError> {
    let value: Value = serde_json::from_str(body).map_err(DecodeError::Json)?;
    match value {
        Value::Object(map) if map.len() == 1 => map
            .into_iter()
            .next()
            .map(|(k, v)| (FieldPath::parse(&k), v))
            .ok_or_else(|| DecodeError::MalformedFrame(body.to_string())),
        _ => Err(DecodeError::MalformedFrame(body.to_string())),
    }
}

/// Decoder for HTML documents carrying `__brrts.push(...)` scripts.
#[derive(Debug, Default)]
pub struct DocumentDecoder {
    buf: Vec<u8>,
    shell_html: Vec<u8>,
    seen_shell: bool,
}

impl DocumentDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script opening expected next. Shell markup may contain the bare push
    /// marker as text, so the search is anchored on the full script prefix
    /// the encoder writes.
    fn opening(&self) -> Vec<u8> {
        let lead = if self.seen_shell {
            SCRIPT_OPEN
        } else {
            SCRIPT_BOOTSTRAP
        };
        [lead.as_bytes(), SCRIPT_PUSH.as_bytes()].concat()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<StreamChunk>, DecodeError> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        let close = SCRIPT_CLOSE.as_bytes();
        loop {
            let open = self.opening();
            let Some(start) = find(&self.buf, &open) else {
                break;
            };
            let payload_start = start + open.len();
            // Payloads are escaped, so `)</script>` cannot occur inside one.
            let Some(len) = find(&self.buf[payload_start..], close) else {
                break;
            };
            if !self.seen_shell {
                self.shell_html.extend_from_slice(&self.buf[..start]);
            }
            let json = std::str::from_utf8(&self.buf[payload_start..payload_start + len])
                .map_err(DecodeError::Utf8)?;
            let mut chunk: StreamChunk = serde_json::from_str(json).map_err(DecodeError::Json)?;
            if let StreamChunk::InitialShell { html, .. } = &mut chunk {
                self.seen_shell = true;
                *html = String::from_utf8_lossy(&self.shell_html).into_owned();
            }
            out.push(chunk);
            self.buf.drain(..payload_start + len + close.len());
        }
        Ok(out)
    }

    /// Markup that preceded the bootstrap script.
    #[must_use]
    pub fn shell_html(&self) -> String {
        String::from_utf8_lossy(&self.shell_html).into_owned()
    }

    pub fn finish(&self) -> Result<(), DecodeError> {
        if find(&self.buf, &self.opening()).is_some() {
            Err(DecodeError::Truncated)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ChunkEncoder, DataEncoder, DocumentEncoder};
    use serde_json::json;

    fn chunks() -> Vec<StreamChunk> {
        vec![
            StreamChunk::InitialShell {
                html: "<p>D</p>".to_string(),
                critical: json!({"root": {"a": "__deferred_promise:a", "d": "D"}}),
            },
            StreamChunk::ResolvedValue {
                route: "root".to_string(),
                path: FieldPath::parse("a"),
                value: json!("</script>"),
                html: None,
            },
            StreamChunk::RejectedValue {
                route: "root".to_string(),
                path: FieldPath::parse("b"),
                error: ErrorDescriptor::aborted(),
            },
        ]
    }

    fn encode(enc: &mut dyn ChunkEncoder) -> Vec<u8> {
        let mut out = Vec::new();
        for c in chunks() {
            enc.encode(&c, &mut out).unwrap();
        }
        out
    }

    #[test]
    fn document_bytes_split_anywhere() {
        let bytes = encode(&mut DocumentEncoder);
        for split in [1, 7, 40, bytes.len() - 3] {
            let mut dec = DocumentDecoder::new();
            let mut got = dec.feed(&bytes[..split]).unwrap();
            got.extend(dec.feed(&bytes[split..]).unwrap());
            dec.finish().unwrap();
            assert_eq!(got, chunks(), "split at {split}");
        }
    }

    #[test]
    fn data_frames_decode_per_route() {
        let bytes = encode(&mut DataEncoder::new("root"));
        let mut dec = DataFrameDecoder::new("root");
        let mut got = Vec::new();
        for b in bytes.chunks(5) {
            got.extend(dec.feed(b).unwrap());
        }
        dec.finish().unwrap();
        assert_eq!(got.len(), 3);
        match &got[0] {
            StreamChunk::InitialShell { critical, .. } => {
                assert_eq!(critical["root"]["d"], json!("D"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(got[1], chunks()[1]);
        assert_eq!(got[2], chunks()[2]);
    }

    #[test]
    fn bad_frames_are_reported() {
        let mut dec = DataFrameDecoder::new("root");
        dec.feed(b"{}\n\n").unwrap();
        assert!(matches!(
            dec.feed(b"nope:{}\n\n"),
            Err(DecodeError::UnknownFrame(_))
        ));
        assert!(matches!(
            dec.feed(b"data:{\"a\":1,\"b\":2}\n\n"),
            Err(DecodeError::MalformedFrame(_))
        ));
        dec.feed(b"data:{\"a\"").unwrap();
        assert!(matches!(dec.finish(), Err(DecodeError::Truncated)));
    }
}
