//! # Data Invocation Layer
//!
//! Wraps route loaders and actions so the rest of the runtime only ever sees
//! a [`Response`](crate::response::Response), a
//! [`DeferredData`](crate::deferred::DeferredData), or a [`DataError`](crate::error::DataError).
//!
//! - Requests are normalized before a handler sees them: `_data` is removed and
//!   so is an empty `index` parameter.
//! - A missing handler is a `405` naming the method, URL and route.
//! - Thrown redirects are successful results. Any other thrown response gets
//!   `X-Remix-Catch: yes` and is then returned or re-thrown according to
//!   [`ResponseMode`](crate::runtime_config::ResponseMode).
//! - Returning nothing is a developer error and fails fast.

mod handler;
mod invoke;
mod request;

pub use handler::{
    DataFunction, DataFunctionArgs, HandlerKind, HandlerOutput, HandlerResult, LoadContext,
    Thrown,
};
pub use invoke::{call_route_action, call_route_loader, extract_data, Invocation, LoaderResult};
pub use request::{normalize_url, DataRequest, DATA_PARAM, INDEX_PARAM};
