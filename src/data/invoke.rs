use super::handler::{
    DataFunction, DataFunctionArgs, HandlerKind, HandlerOutput, LoadContext, Thrown,
};
use super::request::DataRequest;
use crate::deferred::DeferredData;
use crate::error::DataError;
use crate::response::{is_redirect_status, redirect_with_init, Response, CATCH_HEADER};
use crate::routes::ParamVec;
use crate::runtime_config::ResponseMode;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

/// Everything needed to call one route's loader or action.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub route_id: String,
    pub request: DataRequest,
    pub context: LoadContext,
    pub params: ParamVec,
    pub response_mode: ResponseMode,
}

/// A loader's answer after normalization.
#[derive(Debug)]
pub enum LoaderResult {
    Response(Response),
    Deferred(DeferredData),
}

impl LoaderResult {
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            LoaderResult::Response(r) => r.status,
            LoaderResult::Deferred(d) => d.status(),
        }
    }
}

/// Call a route's loader.
pub fn call_route_loader(
    loader: Option<&dyn DataFunction>,
    invocation: Invocation,
) -> Result<LoaderResult, DataError> {
    match call(loader, HandlerKind::Loader, invocation)? {
        Called::Response(response) => Ok(LoaderResult::Response(response)),
        Called::Deferred(data) => {
            let location = data.init().get_header("location").map(str::to_string);
            match location {
                Some(url) if is_redirect_status(data.status()) => {
                    let init = data.into_parts().init;
                    Ok(LoaderResult::Response(redirect_with_init(&url, init)))
                }
                _ => Ok(LoaderResult::Deferred(data)),
            }
        }
    }
}

/// Call a route's action. Actions cannot defer.
pub fn call_route_action(
    action: Option<&dyn DataFunction>,
    invocation: Invocation,
) -> Result<Response, DataError> {
    let route_id = invocation.route_id.clone();
    match call(action, HandlerKind::Action, invocation)? {
        Called::Response(response) => Ok(response),
        Called::Deferred(_) => Err(DataError::DeferredFromAction { route_id }),
    }
}

enum Called {
    Response(Response),
    Deferred(DeferredData),
}

fn call(
    handler: Option<&dyn DataFunction>,
    kind: HandlerKind,
    invocation: Invocation,
) -> Result<Called, DataError> {
    let Invocation {
        route_id,
        request,
        context,
        params,
        response_mode,
    } = invocation;

    let Some(handler) = handler else {
        warn!(
            request_id = %request.request_id,
            route_id = %route_id,
            method = %request.method,
            kind = %kind,
            "No handler for request method"
        );
        return Err(DataError::MethodNotAllowed {
            method: request.method.clone(),
            url: request.path_and_query(),
            route_id,
            kind,
        });
    };

    let request_id = request.request_id;
    let args = DataFunctionArgs {
        request: request.normalized(),
        context,
        params,
    };
    let start = Instant::now();
    let result = handler.call(args);
    debug!(
        request_id = %request_id,
        route_id = %route_id,
        kind = %kind,
        duration_us = start.elapsed().as_micros() as u64,
        "Data function returned"
    );

    match result {
        Ok(HandlerOutput::Data(value)) => Ok(Called::Response(Response::json(&value))),
        Ok(HandlerOutput::Response(response)) => Ok(Called::Response(response)),
        Ok(HandlerOutput::Deferred(data)) => Ok(Called::Deferred(data)),
        Ok(HandlerOutput::Undefined) => Err(DataError::ReturnedUndefined { route_id, kind }),
        Err(Thrown::Response(response)) if response.is_redirect() => {
            debug!(
                request_id = %request_id,
                route_id = %route_id,
                location = response.location().unwrap_or_default(),
                "Thrown redirect"
            );
            Ok(Called::Response(response))
        }
        Err(Thrown::Response(mut response)) => {
            response.set_header(CATCH_HEADER, "yes");
            debug!(
                request_id = %request_id,
                route_id = %route_id,
                status = response.status,
                mode = ?response_mode,
                "Thrown response caught"
            );
            match response_mode {
                ResponseMode::Legacy => Ok(Called::Response(response)),
                ResponseMode::Router => Err(DataError::Thrown(response)),
            }
        }
        Err(Thrown::Error(err)) => Err(DataError::Handler(err)),
    }
}

/// Body of a handler response as data: JSON for `application/json`, text for
/// everything else.
pub fn extract_data(response: &Response) -> Result<Value, DataError> {
    let is_json = response
        .content_type()
        .is_some_and(|ct| ct.trim_start().starts_with("application/json"));
    if is_json {
        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&response.body).map_err(DataError::InvalidJson)
    } else {
        Ok(Value::String(response.body_text().into_owned()))
    }
}
