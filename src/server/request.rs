use crate::response::HeaderVec;
use http::Method;
use std::io::{self, Read};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Header slots handed to `httparse`. Requests with more headers are rejected.
pub const MAX_HEADERS: usize = 32;
/// Largest request line plus headers accepted.
pub const MAX_HEAD_BYTES: usize = 16 * 1024;
/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;
const READ_CHUNK: usize = 4096;

/// A request read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    /// Path and query as sent (`/posts?_data=root`).
    pub target: String,
    pub headers: HeaderVec,
    pub body: Vec<u8>,
}

impl HttpRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Path without the query.
    #[must_use]
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("/")
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Read one request. Returns `Ok(None)` if the peer closed before sending
/// anything.
pub fn read_request<R: Read>(stream: &mut R) -> io::Result<Option<HttpRequest>> {
    let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    let (head_len, method, target, headers, content_length) = loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside request head",
            ));
        }
        buf.extend_from_slice(&chunk[..n]);

        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut raw_headers);
        let head_len = match req.parse(&buf).map_err(|e| invalid(e.to_string()))? {
            httparse::Status::Complete(n) => n,
            httparse::Status::Partial if buf.len() > MAX_HEAD_BYTES => {
                return Err(invalid(format!(
                    "request head exceeds {MAX_HEAD_BYTES} bytes"
                )));
            }
            httparse::Status::Partial => continue,
        };
        let method = req
            .method
            .and_then(|m| Method::from_str(m).ok())
            .ok_or_else(|| invalid("invalid method"))?;
        let target = req.path.unwrap_or("/").to_string();
        let mut headers = HeaderVec::new();
        let mut content_length = 0usize;
        for h in req.headers.iter() {
            let value = String::from_utf8_lossy(h.value).into_owned();
            if h.name.eq_ignore_ascii_case("content-length") {
                content_length = value
                    .trim()
                    .parse()
                    .map_err(|_| invalid("invalid content-length"))?;
            }
            headers.push((Arc::from(h.name.to_ascii_lowercase()), value));
        }
        break (head_len, method, target, headers, content_length);
    };

    if content_length > MAX_BODY_BYTES {
        return Err(invalid(format!(
            "request body of {content_length} bytes exceeds {MAX_BODY_BYTES}"
        )));
    }
    let mut body = buf.split_off(head_len);
    while body.len() < content_length {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside request body",
            ));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    debug!(
        method = %method,
        target = %target,
        header_count = headers.len(),
        body_bytes = body.len(),
        "Request parsed"
    );
    Ok(Some(HttpRequest {
        method,
        target,
        headers,
        body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_head_and_body() {
        let raw = b"POST /posts?index HTTP/1.1\r\nHost: x\r\nContent-Length: 5\r\nX-Request-Id: a\r\n\r\nhello";
        let req = read_request(&mut Cursor::new(&raw[..])).unwrap().unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.target, "/posts?index");
        assert_eq!(req.path(), "/posts");
        assert_eq!(req.header("x-request-id"), Some("a"));
        assert_eq!(req.body, b"hello");
    }

    #[test]
    fn empty_stream_is_none_and_partial_is_error() {
        assert!(read_request(&mut Cursor::new(&b""[..])).unwrap().is_none());
        let err = read_request(&mut Cursor::new(&b"GET / HTTP/1.1\r\nHost"[..])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn oversized_body_is_rejected() {
        let raw = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n", MAX_BODY_BYTES + 1);
        let err = read_request(&mut Cursor::new(raw.into_bytes())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn endless_head_is_rejected_early() {
        let mut raw = b"GET / HTTP/1.1\r\nX: ".to_vec();
        raw.resize(4 * 1024 * 1024, b'a');
        let mut cursor = Cursor::new(raw);
        let err = read_request(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        // Stopped right after the limit instead of draining the stream.
        assert!(cursor.position() as usize <= MAX_HEAD_BYTES + READ_CHUNK);
    }
}
