//! # brrtstream
//!
//! **brrtstream** is a coroutine-powered runtime for server-rendered pages whose
//! data arrives in pieces. A route loader may return values that are ready now
//! next to promises that settle later; the runtime sends the page shell as soon
//! as the ready data is known and then streams each pending value to the client
//! in whatever order it settles.
//!
//! ## Architecture
//!
//! - **[`deferred`]** - the container a loader returns: immediate fields and
//!   settle-once [`Promise`](deferred::Promise)s, addressed by field path
//! - **[`data`]** - invoking loaders and actions, request normalization, and
//!   thrown-response semantics
//! - **[`routes`]** - route modules, parent chains and path matching
//! - **[`stream`]** - the stream assembler, the abort governor, and the two
//!   wire encodings (HTML document and `text/remix-deferred`)
//! - **[`client`]** - the receiving side: frame decoders, settle-once slots,
//!   and a live component tree whose placeholders and error boundaries react
//!   to arriving chunks
//! - **[`server`]** - a small HTTP/1.1 server on `may` that streams with
//!   chunked transfer encoding
//! - **[`runtime_config`]** / **[`logging`]** - configuration and tracing setup
//!
//! ### Request flow
//!
//! ```text
//! HTTP request ──► server::AppService
//!                    │  ?_data=<route>           │  document
//!                    ▼                           ▼
//!              call_route_loader         action, then loaders for the route chain
//!                    │                           │
//!                    ▼                           ▼
//!              StreamAssembler ──► DataEncoder / DocumentEncoder ──► chunked body
//!                    ▲
//!              AbortGovernor (timeout, cancel, disconnect)
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use brrtstream::data::{DataFunctionArgs, HandlerResult};
//! use brrtstream::deferred::{defer, Promise};
//! use brrtstream::routes::{RouteModule, RouteTable};
//! use brrtstream::runtime_config::RuntimeConfig;
//! use brrtstream::server::{AppService, HttpServer};
//! use brrtstream::stream::PageShell;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! fn loader(_args: DataFunctionArgs) -> HandlerResult {
//!     let slow = Promise::spawn(|| Ok(json!("later")));
//!     Ok(defer().value("now", 1).pending("slow", slow).build()?.into())
//! }
//!
//! let routes = Arc::new(RouteTable::new());
//! routes.add(RouteModule::new("root", "/").loader(loader));
//! let service = AppService::new(routes, Arc::new(PageShell::new("demo")), RuntimeConfig::from_env());
//! let handle = HttpServer(service).start("127.0.0.1:8080").unwrap();
//! handle.join().unwrap();
//! ```

pub mod client;
pub mod data;
pub mod deferred;
pub mod error;
pub mod ids;
pub mod logging;
pub mod response;
pub mod routes;
pub mod runtime_config;
pub mod server;
pub mod stream;

pub use deferred::{defer, DeferredData, FieldPath, Promise, Settlement};
pub use error::{AssembleError, DataError};
pub use ids::RequestId;
pub use response::{redirect, Response, ResponseInit};
pub use runtime_config::RuntimeConfig;
