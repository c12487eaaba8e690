use crate::ids::RequestId;
use crate::response::HeaderVec;
use crate::stream::AbortSignal;
use http::Method;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use url::Url;

/// Query parameter that marks a data-only request and names its route.
pub const DATA_PARAM: &str = "_data";
/// Query parameter that targets an index route's action.
pub const INDEX_PARAM: &str = "index";

/// A request as loaders and actions see it.
#[derive(Debug, Clone)]
pub struct DataRequest {
    pub request_id: RequestId,
    pub method: Method,
    pub url: Url,
    pub headers: HeaderVec,
    pub body: Vec<u8>,
    /// Tripped when the response stream is aborted.
    pub signal: AbortSignal,
}

impl DataRequest {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            request_id: RequestId::new(),
            method,
            url,
            headers: HeaderVec::new(),
            body: Vec::new(),
            signal: AbortSignal::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((Arc::from(name), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = signal;
        self
    }

    /// Header lookup (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rfind(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Last value of a query parameter.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<Cow<'_, str>> {
        self.url
            .query_pairs()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v)
            .last()
    }

    /// Route id targeted by a data-only request (`?_data=<routeId>`).
    #[must_use]
    pub fn data_route_id(&self) -> Option<String> {
        self.query_param(DATA_PARAM).map(Cow::into_owned)
    }

    /// Path plus query, as shown in error messages.
    #[must_use]
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(q) => format!("{}?{q}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }

    #[must_use]
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Body decoded as `application/x-www-form-urlencoded`.
    #[must_use]
    pub fn form(&self) -> Vec<(String, String)> {
        url::form_urlencoded::parse(&self.body)
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    /// Copy of this request with runtime-internal query parameters removed:
    /// `_data` always, `index` only when empty.
    #[must_use]
    pub fn normalized(&self) -> DataRequest {
        let mut normalized = self.clone();
        normalized.url = normalize_url(&self.url);
        normalized
    }
}

/// Strip `_data` and empty `index` parameters, keeping everything else in order.
#[must_use]
pub fn normalize_url(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, v)| k != DATA_PARAM && !(k == INDEX_PARAM && v.is_empty()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut url = url.clone();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(url: &str) -> DataRequest {
        DataRequest::new(Method::GET, Url::parse(url).unwrap())
    }

    #[test]
    fn strips_data_and_empty_index() {
        let r = req("http://localhost/posts?index&_data=routes%2Fposts&page=2");
        assert_eq!(r.data_route_id().as_deref(), Some("routes/posts"));
        let n = r.normalized();
        assert_eq!(n.url.as_str(), "http://localhost/posts?page=2");
        assert_eq!(n.data_route_id(), None);
    }

    #[test]
    fn keeps_non_empty_index() {
        let n = req("http://localhost/?index=1&_data=root").normalized();
        assert_eq!(n.url.query(), Some("index=1"));
    }

    #[test]
    fn drops_query_when_nothing_left() {
        let n = req("http://localhost/a?_data=root").normalized();
        assert_eq!(n.url.as_str(), "http://localhost/a");
        assert_eq!(n.path_and_query(), "/a");
    }

    #[test]
    fn form_and_headers() {
        let r = req("http://localhost/")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("a=1&b=two+words");
        assert_eq!(
            r.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            r.form(),
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two words".to_string())
            ]
        );
    }
}
