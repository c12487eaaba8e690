pub mod http_server;
pub mod request;
pub mod response;
pub mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{read_request, HttpRequest, MAX_BODY_BYTES, MAX_HEADERS, MAX_HEAD_BYTES};
pub use response::{
    write_response, write_response_head, write_stream_head, ChunkedBody, HttpChunkSink,
};
pub use service::{health_endpoint, AppService, ACTION_DATA_KEY};
