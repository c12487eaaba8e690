use super::request::DataRequest;
use crate::deferred::DeferredData;
use crate::error::DeferredBuildError;
use crate::response::Response;
use crate::routes::ParamVec;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Which of a route's two data functions is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Loader,
    Action,
}

impl HandlerKind {
    /// Indefinite article for messages ("a loader", "an action").
    #[must_use]
    pub fn article(self) -> &'static str {
        match self {
            HandlerKind::Loader => "a",
            HandlerKind::Action => "an",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandlerKind::Loader => "loader",
            HandlerKind::Action => "action",
        })
    }
}

/// What a loader or action returned.
#[derive(Debug)]
pub enum HandlerOutput {
    /// Plain data, serialized as JSON. `Value::Null` is a valid answer.
    Data(Value),
    Response(Response),
    /// Loader-only: immediate data mixed with pending promises.
    Deferred(DeferredData),
    /// The handler produced nothing at all.
    Undefined,
}

impl From<Value> for HandlerOutput {
    fn from(value: Value) -> Self {
        HandlerOutput::Data(value)
    }
}

impl From<Response> for HandlerOutput {
    fn from(response: Response) -> Self {
        HandlerOutput::Response(response)
    }
}

impl From<DeferredData> for HandlerOutput {
    fn from(data: DeferredData) -> Self {
        HandlerOutput::Deferred(data)
    }
}

/// What a loader or action threw.
#[derive(Debug)]
pub enum Thrown {
    /// A response used as control flow (redirects, 404s, ...).
    Response(Response),
    Error(anyhow::Error),
}

impl From<Response> for Thrown {
    fn from(response: Response) -> Self {
        Thrown::Response(response)
    }
}

impl From<anyhow::Error> for Thrown {
    fn from(err: anyhow::Error) -> Self {
        Thrown::Error(err)
    }
}

impl From<DeferredBuildError> for Thrown {
    fn from(err: DeferredBuildError) -> Self {
        Thrown::Error(err.into())
    }
}

impl From<serde_json::Error> for Thrown {
    fn from(err: serde_json::Error) -> Self {
        Thrown::Error(err.into())
    }
}

pub type HandlerResult = Result<HandlerOutput, Thrown>;

/// Caller-supplied value shared with every handler of a request (database
/// pools, sessions, ...).
#[derive(Clone)]
pub struct LoadContext(Arc<dyn Any + Send + Sync>);

impl LoadContext {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(())
    }

    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl Default for LoadContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LoadContext(..)")
    }
}

/// Arguments of a single handler call.
#[derive(Debug, Clone)]
pub struct DataFunctionArgs {
    /// Request with `_data` and empty `index` parameters removed.
    pub request: DataRequest,
    pub context: LoadContext,
    pub params: ParamVec,
}

impl DataFunctionArgs {
    #[inline]
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .rfind(|(k, _)| k.as_ref() == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A loader or action.
pub trait DataFunction: Send + Sync {
    fn call(&self, args: DataFunctionArgs) -> HandlerResult;
}

impl<F> DataFunction for F
where
    F: Fn(DataFunctionArgs) -> HandlerResult + Send + Sync,
{
    fn call(&self, args: DataFunctionArgs) -> HandlerResult {
        self(args)
    }
}
