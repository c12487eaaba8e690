//! Request handling: health check, data requests (`?_data=<routeId>`) and
//! document requests.

use super::request::HttpRequest;
use super::response::{write_response, write_response_head, write_stream_head, HttpChunkSink};
use crate::data::{
    call_route_action, call_route_loader, extract_data, DataRequest, Invocation, LoadContext,
    LoaderResult,
};
use crate::deferred::{DeferredError, ErrorDescriptor, ErrorKind};
use crate::error::{AssembleError, DataError, ShellRenderError};
use crate::ids::RequestId;
use crate::response::{
    HeaderVec, Response, ResponseInit, DATA_ERROR_HEADER, DATA_REDIRECT_HEADER,
    DATA_RESPONSE_HEADER, DATA_STATUS_HEADER, DEFERRED_CONTENT_TYPE, HTML_CONTENT_TYPE,
};
use crate::routes::{RouteMatch, RouteModule, RouteTable};
use crate::runtime_config::RuntimeConfig;
use crate::stream::{
    AbortReason, AbortSignal, DataEncoder, DocumentEncoder, ResponseHead, RouteData, ShellContext,
    ShellRenderer, StreamAssembler, StreamConfig, StreamDocument,
};
use http::Method;
use may::coroutine::JoinHandle;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

/// Key in a document's critical data holding the action result, by route id.
pub const ACTION_DATA_KEY: &str = "__actionData";

type ContextFactory = dyn Fn(&DataRequest) -> LoadContext + Send + Sync;

/// The application: routes, a shell renderer, and runtime settings.
#[derive(Clone)]
pub struct AppService {
    pub routes: Arc<RouteTable>,
    pub renderer: Arc<dyn ShellRenderer>,
    pub config: RuntimeConfig,
    context: Arc<ContextFactory>,
}

/// Data requests have no document to render.
struct NoShell;

impl ShellRenderer for NoShell {
    fn render_shell(&self, _ctx: &ShellContext) -> Result<String, ShellRenderError> {
        Ok(String::new())
    }
}

/// Basic health check endpoint returning `{ "status": "ok" }`.
#[must_use]
pub fn health_endpoint() -> Response {
    Response::json(&json!({ "status": "ok" }))
}

impl AppService {
    pub fn new(
        routes: Arc<RouteTable>,
        renderer: Arc<dyn ShellRenderer>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            routes,
            renderer,
            config,
            context: Arc::new(|_: &DataRequest| LoadContext::empty()),
        }
    }

    /// Build the load context for each request.
    #[must_use]
    pub fn with_context<F>(mut self, factory: F) -> Self
    where
        F: Fn(&DataRequest) -> LoadContext + Send + Sync + 'static,
    {
        self.context = Arc::new(factory);
        self
    }

    /// Handle one request, writing the whole response to `out`.
    pub fn handle<W: Write>(&self, req: HttpRequest, out: &mut W) -> io::Result<()> {
        let start = Instant::now();
        let request_id = RequestId::from_header_or_new(req.header("x-request-id"));
        info!(
            request_id = %request_id,
            method = %req.method,
            path = %req.path(),
            "Request received"
        );

        if req.method == Method::GET && req.path() == "/health" {
            return write_response(out, &health_endpoint());
        }

        let data_request = match self.data_request(req, request_id) {
            Ok(r) => r,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Invalid request URL");
                return write_response(out, &Response::json_with_init(
                    &json!({ "error": "Bad Request" }),
                    ResponseInit::status(400),
                ));
            }
        };

        let Some(matched) = self.routes.match_path(data_request.url.path()) else {
            debug!(request_id = %request_id, path = %data_request.url.path(), "No route matched");
            return write_response(out, &Response::json_with_init(
                &json!({ "error": "Not Found", "path": data_request.url.path() }),
                ResponseInit::status(404),
            ));
        };

        let result = match data_request.data_route_id() {
            Some(route_id) => self.handle_data(&route_id, data_request, &matched, out),
            None => self.handle_document(data_request, &matched, out),
        };
        info!(
            request_id = %request_id,
            duration_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Request finished"
        );
        result
    }

    fn data_request(&self, req: HttpRequest, request_id: RequestId) -> Result<DataRequest, url::ParseError> {
        let host = req.header("host").unwrap_or("localhost").to_string();
        let url = Url::parse(&format!("http://{host}{}", req.target))?;
        let mut request = DataRequest::new(req.method, url);
        request.request_id = request_id;
        request.headers = req.headers;
        request.body = req.body;
        Ok(request)
    }

    fn invocation(&self, route: &RouteModule, request: DataRequest, matched: &RouteMatch) -> Invocation {
        Invocation {
            route_id: route.id.clone(),
            context: (self.context)(&request),
            request,
            params: matched.params.clone(),
            response_mode: self.config.response_mode,
        }
    }

    fn describe(&self, err: &DataError) -> ErrorDescriptor {
        match err {
            DataError::MethodNotAllowed { .. } => ErrorDescriptor {
                message: err.to_string(),
                stack: None,
                kind: ErrorKind::Error,
                data: None,
            },
            DataError::Handler(e) => {
                DeferredError::error(e.to_string())
                    .with_stack(format!("{e:?}"))
                    .describe(self.config.server_mode)
            }
            other => DeferredError::error(other.to_string()).describe(self.config.server_mode),
        }
    }

    fn handle_data<W: Write>(
        &self,
        route_id: &str,
        request: DataRequest,
        matched: &RouteMatch,
        out: &mut W,
    ) -> io::Result<()> {
        let request_id = request.request_id;
        let Some(route) = matched.find(route_id).cloned() else {
            warn!(request_id = %request_id, route_id = %route_id, "Data request for unmatched route");
            let mut res = Response::json_with_init(
                &json!({ "message": format!("Route \"{route_id}\" does not match URL \"{}\"", request.url.path()) }),
                ResponseInit::status(403),
            );
            res.set_header(DATA_ERROR_HEADER, "yes");
            return write_response(out, &res);
        };

        let head_only = request.method == Method::HEAD;
        let is_read = request.method == Method::GET || head_only;
        let signal = request.signal.clone();
        let result = if is_read {
            call_route_loader(route.loader.as_deref(), self.invocation(&route, request, matched))
        } else {
            call_route_action(route.action.as_deref(), self.invocation(&route, request, matched))
                .map(LoaderResult::Response)
        };

        match result {
            Ok(LoaderResult::Response(res)) => reply(out, &data_response(res), head_only),
            Ok(LoaderResult::Deferred(data)) => {
                let mut head = ResponseHead::new(data.status(), data.init().headers.clone());
                head.headers.push((Arc::from(DATA_RESPONSE_HEADER), "yes".to_string()));
                if head_only {
                    abandon(&signal, request_id);
                    return write_stream_head(out, &head, DEFERRED_CONTENT_TYPE);
                }
                let document = StreamDocument::new(head).route(route.id.clone(), data);
                let outcome = {
                    let mut sink =
                        HttpChunkSink::new(DataEncoder::new(route.id.clone()), &mut *out);
                    StreamAssembler::new(request_id, StreamConfig::from(&self.config))
                        .with_signal(signal)
                        .run(document, Arc::new(NoShell), &mut sink)
                };
                self.finish_stream(request_id, outcome, out)
            }
            Err(DataError::Thrown(res)) => reply(out, &res, head_only),
            Err(err) => {
                log_data_error(request_id, route_id, &err);
                let mut res = Response::json_with_init(
                    &serde_json::to_value(self.describe(&err)).unwrap_or(Value::Null),
                    ResponseInit::status(err.status()),
                );
                res.set_header(DATA_ERROR_HEADER, "yes");
                reply(out, &res, head_only)
            }
        }
    }

    fn handle_document<W: Write>(
        &self,
        request: DataRequest,
        matched: &RouteMatch,
        out: &mut W,
    ) -> io::Result<()> {
        let request_id = request.request_id;
        let signal = AbortSignal::new();
        let request = request.with_signal(signal.clone());
        let Some(leaf) = matched.leaf().cloned() else {
            return write_response(out, &Response::text(404, "Not Found"));
        };

        let mut status = None;
        let mut action_data = None;
        if request.method != Method::GET && request.method != Method::HEAD {
            match call_route_action(leaf.action.as_deref(), self.invocation(&leaf, request.clone(), matched)) {
                Ok(res) if res.is_redirect() => return write_response(out, &res),
                Ok(res) => {
                    status = Some(res.status);
                    match extract_data(&res) {
                        Ok(v) => action_data = Some(v),
                        Err(err) => return self.error_document(request_id, &leaf.id, &err, out),
                    }
                }
                Err(DataError::Thrown(res)) => return self.catch_document(&res, out),
                Err(err) => return self.error_document(request_id, &leaf.id, &err, out),
            }
        }

        // Every loader in the chain starts at once; results are taken in chain
        // order so a slow parent does not hold back its children.
        let loads: Vec<(Arc<RouteModule>, Option<JoinHandle<LoadOutcome>>)> = matched
            .chain
            .iter()
            .map(|route| {
                let task = route.loader.clone().map(|loader| {
                    let invocation = self.invocation(route, request.clone(), matched);
                    may::go!(move || call_route_loader(Some(&*loader), invocation))
                });
                (Arc::clone(route), task)
            })
            .collect();

        let mut document_routes: Vec<(String, RouteData)> = Vec::with_capacity(loads.len());
        let mut headers = HeaderVec::new();
        for (route, task) in loads {
            let is_leaf = route.id == leaf.id;
            let Some(task) = task else {
                document_routes.push((route.id.clone(), RouteData::Plain(Value::Null)));
                continue;
            };
            let result = task
                .join()
                .unwrap_or_else(|panic| Err(loader_panicked(&route.id, panic.as_ref())));
            match result {
                Ok(LoaderResult::Response(res)) if res.is_redirect() => {
                    abandon(&signal, request_id);
                    return write_response(out, &res);
                }
                Ok(LoaderResult::Response(res)) => {
                    if is_leaf {
                        status = status.or(Some(res.status));
                        headers = res.headers.clone();
                    }
                    match extract_data(&res) {
                        Ok(v) => document_routes.push((route.id.clone(), RouteData::Plain(v))),
                        Err(err) => {
                            abandon(&signal, request_id);
                            return self.error_document(request_id, &route.id, &err, out);
                        }
                    }
                }
                Ok(LoaderResult::Deferred(data)) => {
                    if is_leaf {
                        status = status.or(Some(data.status()));
                        headers = data.init().headers.clone();
                    }
                    document_routes.push((route.id.clone(), RouteData::Deferred(data)));
                }
                Err(DataError::Thrown(res)) => {
                    abandon(&signal, request_id);
                    return self.catch_document(&res, out);
                }
                Err(err) => {
                    abandon(&signal, request_id);
                    return self.error_document(request_id, &route.id, &err, out);
                }
            }
        }
        if let Some(data) = action_data {
            let mut by_route = Map::new();
            by_route.insert(leaf.id.clone(), data);
            document_routes.push((ACTION_DATA_KEY.to_string(), RouteData::Plain(Value::Object(by_route))));
        }

        let head = ResponseHead::new(status.unwrap_or(200), headers);
        if request.method == Method::HEAD {
            abandon(&signal, request_id);
            return write_stream_head(out, &head, HTML_CONTENT_TYPE);
        }
        let document = StreamDocument {
            routes: document_routes,
            head,
        };
        let outcome = {
            let mut sink = HttpChunkSink::new(DocumentEncoder, &mut *out);
            StreamAssembler::new(request_id, StreamConfig::from(&self.config))
                .with_signal(signal)
                .run(document, Arc::clone(&self.renderer), &mut sink)
        };
        self.finish_stream(request_id, outcome, out)
    }

    fn finish_stream<W: Write, T>(
        &self,
        request_id: RequestId,
        outcome: Result<T, AssembleError>,
        out: &mut W,
    ) -> io::Result<()> {
        match outcome {
            Ok(_) => Ok(()),
            Err(AssembleError::Shell(err)) => {
                error!(request_id = %request_id, error = %err, "Shell failed, sending error document");
                let message = if self.config.server_mode.exposes_internals() {
                    err.to_string()
                } else {
                    crate::deferred::REDACTED_MESSAGE.to_string()
                };
                write_response(out, &error_page(500, &message))
            }
            Err(AssembleError::Transport { source, .. }) => Err(source),
        }
    }

    fn error_document<W: Write>(
        &self,
        request_id: RequestId,
        route_id: &str,
        err: &DataError,
        out: &mut W,
    ) -> io::Result<()> {
        log_data_error(request_id, route_id, err);
        let desc = self.describe(err);
        write_response(out, &error_page(err.status(), &desc.message))
    }

    fn catch_document<W: Write>(&self, thrown: &Response, out: &mut W) -> io::Result<()> {
        let mut page = error_page(thrown.status, &thrown.body_text());
        for (name, value) in &thrown.headers {
            if !name.eq_ignore_ascii_case("content-type") && !name.eq_ignore_ascii_case("content-length") {
                page.set_header(name, value.clone());
            }
        }
        write_response(out, &page)
    }
}

type LoadOutcome = Result<LoaderResult, DataError>;

fn loader_panicked(route_id: &str, panic: &(dyn Any + Send)) -> DataError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "loader panicked".to_string());
    DataError::Handler(anyhow::anyhow!(
        "loader for route \"{route_id}\" panicked: {message}"
    ))
}

/// `HEAD` gets the same status and headers, never the body.
fn reply<W: Write>(out: &mut W, res: &Response, head_only: bool) -> io::Result<()> {
    if head_only {
        write_response_head(out, res)
    } else {
        write_response(out, res)
    }
}

/// Trip the signal handed to loaders whose deferred work will never be sent.
fn abandon(signal: &AbortSignal, request_id: RequestId) {
    if signal.trip(AbortReason::Cancelled) {
        debug!(request_id = %request_id, "Document abandoned before streaming");
    }
}

fn log_data_error(request_id: RequestId, route_id: &str, err: &DataError) {
    match err {
        DataError::MethodNotAllowed { .. } => {
            warn!(request_id = %request_id, route_id = %route_id, error = %err, "Method not allowed");
        }
        _ => {
            error!(request_id = %request_id, route_id = %route_id, error = %err, "Data function failed");
        }
    }
}

/// Data path rewrite: a fetch cannot observe a 3xx, so redirects become
/// `204` plus headers the client router understands.
fn data_response(res: Response) -> Response {
    if let Some(location) = res.location().map(str::to_string).filter(|_| res.is_redirect()) {
        let mut headers = res.headers;
        headers.retain(|(k, _)| !k.eq_ignore_ascii_case("location"));
        let mut out = Response::new(204, headers, Vec::new());
        out.set_header(DATA_REDIRECT_HEADER, location);
        out.set_header(DATA_STATUS_HEADER, res.status.to_string());
        return out;
    }
    let mut res = res;
    res.set_header(DATA_RESPONSE_HEADER, "yes");
    res
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn error_page(status: u16, message: &str) -> Response {
    let body = format!(
        "<!DOCTYPE html><html><head><title>{status}</title></head><body><h1>{status} {}</h1><p>{}</p></body></html>",
        crate::response::status_reason(status),
        escape_html(message)
    );
    let mut res = Response::new(status, HeaderVec::new(), body.into_bytes());
    res.set_header("content-type", HTML_CONTENT_TYPE);
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::redirect;

    #[test]
    fn data_redirects_become_204() {
        let res = data_response(redirect("/login").with_header("Set-Cookie", "a=1"));
        assert_eq!(res.status, 204);
        assert_eq!(res.get_header(DATA_REDIRECT_HEADER), Some("/login"));
        assert_eq!(res.get_header(DATA_STATUS_HEADER), Some("302"));
        assert_eq!(res.get_header("set-cookie"), Some("a=1"));
        assert_eq!(res.location(), None);
    }

    #[test]
    fn data_success_is_marked() {
        let res = data_response(Response::json(&json!(1)));
        assert_eq!(res.get_header(DATA_RESPONSE_HEADER), Some("yes"));
    }

    #[test]
    fn error_page_escapes_message() {
        let page = error_page(500, "<b>");
        assert!(page.body_text().contains("&lt;b&gt;"));
        assert_eq!(page.content_type(), Some(HTML_CONTENT_TYPE));
    }
}
