//! Uniform response objects produced by loaders, actions and the transports.

use serde_json::Value;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::sync::Arc;

/// Maximum inline headers before heap allocation.
pub const MAX_INLINE_HEADERS: usize = 16;

/// Stack-allocated header storage. Names are `Arc<str>` because the same few
/// names repeat on every response.
pub type HeaderVec = SmallVec<[(Arc<str>, String); MAX_INLINE_HEADERS]>;

/// Diagnostic marker set on non-redirect responses thrown from a handler.
pub const CATCH_HEADER: &str = "X-Remix-Catch";
/// Marks a data-path response produced by a handler.
pub const DATA_RESPONSE_HEADER: &str = "X-Remix-Response";
/// Marks a data-path response produced by an uncaught error.
pub const DATA_ERROR_HEADER: &str = "X-Remix-Error";
/// Carries the redirect target on the data path (fetch cannot observe 3xx).
pub const DATA_REDIRECT_HEADER: &str = "X-Remix-Redirect";
/// Carries the original redirect status on the data path.
pub const DATA_STATUS_HEADER: &str = "X-Remix-Status";

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const DEFERRED_CONTENT_TYPE: &str = "text/remix-deferred";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Redirect statuses; anything else with a `Location` is not a redirect.
#[inline]
#[must_use]
pub fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Canonical reason phrase, `"Unknown"` for non-standard codes.
#[must_use]
pub fn status_reason(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

fn find_header<'a>(headers: &'a HeaderVec, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn put_header(headers: &mut HeaderVec, name: &str, value: String) {
    headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    headers.push((Arc::from(name), value));
}

/// Status and headers a handler wants on its eventual response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseInit {
    pub status: u16,
    pub headers: HeaderVec,
}

impl Default for ResponseInit {
    fn default() -> Self {
        Self {
            status: 200,
            headers: HeaderVec::new(),
        }
    }
}

impl ResponseInit {
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        put_header(&mut self.headers, name, value.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A fully materialised response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderVec,
    pub body: Vec<u8>,
}

impl Response {
    #[must_use]
    pub fn new(status: u16, headers: HeaderVec, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// `200` JSON response.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::json_with_init(value, ResponseInit::default())
    }

    /// JSON response keeping the caller's status and headers. A content type
    /// already present in `init` wins.
    #[must_use]
    pub fn json_with_init(value: &Value, init: ResponseInit) -> Self {
        let ResponseInit { status, mut headers } = init;
        if find_header(&headers, "content-type").is_none() {
            headers.push((Arc::from("content-type"), JSON_CONTENT_TYPE.to_string()));
        }
        Self {
            status,
            headers,
            body: value.to_string().into_bytes(),
        }
    }

    #[must_use]
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut headers = HeaderVec::new();
        headers.push((
            Arc::from("content-type"),
            "text/plain; charset=utf-8".to_string(),
        ));
        Self {
            status,
            headers,
            body: body.into().into_bytes(),
        }
    }

    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: HeaderVec::new(),
            body: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Add or replace a header (case-insensitive).
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        put_header(&mut self.headers, name, value.into());
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.get_header("content-type")
    }

    #[must_use]
    pub fn is_redirect(&self) -> bool {
        is_redirect_status(self.status) && self.get_header("location").is_some()
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.get_header("location")
    }

    #[must_use]
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// `302` redirect to `url`.
#[must_use]
pub fn redirect(url: &str) -> Response {
    redirect_with_init(url, ResponseInit::status(302))
}

/// Redirect keeping the caller's headers. A non-redirect status in `init`
/// falls back to `302`.
#[must_use]
pub fn redirect_with_init(url: &str, init: ResponseInit) -> Response {
    let ResponseInit { status, headers } = init;
    let status = if is_redirect_status(status) { status } else { 302 };
    let mut response = Response::new(status, headers, Vec::new());
    response.set_header("location", url);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_sets_content_type_once() {
        let init = ResponseInit::status(201).with_header("Content-Type", "application/vnd+json");
        let res = Response::json_with_init(&json!({"a": 1}), init);
        assert_eq!(res.status, 201);
        assert_eq!(res.content_type(), Some("application/vnd+json"));
        assert_eq!(res.headers.len(), 1);
        assert_eq!(res.body_text(), "{\"a\":1}");
    }

    #[test]
    fn redirect_detection_requires_location() {
        assert!(redirect("/login").is_redirect());
        assert!(!Response::empty(302).is_redirect());
        assert!(!Response::empty(304).is_redirect());
        let r = redirect_with_init("/x", ResponseInit::status(200));
        assert_eq!(r.status, 302);
    }

    #[test]
    fn set_header_replaces_case_insensitively() {
        let mut res = Response::empty(200);
        res.set_header("X-Test", "1");
        res.set_header("x-test", "2");
        assert_eq!(res.headers.len(), 1);
        assert_eq!(res.get_header("X-TEST"), Some("2"));
    }

    #[test]
    fn reasons() {
        assert_eq!(status_reason(405), "Method Not Allowed");
        assert_eq!(status_reason(299), "Unknown");
    }
}
