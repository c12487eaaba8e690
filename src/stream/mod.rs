//! # Streaming
//!
//! Everything between a loader's output and the bytes on the wire: the
//! [`StreamAssembler`] state machine, the [`AbortGovernor`] that bounds it, the
//! [`ShellRenderer`] seam to the UI layer, and the two transport encodings
//! ([`DocumentEncoder`] for HTML documents, [`DataEncoder`] for
//! `text/remix-deferred` data requests).

mod assembler;
mod chunk;
mod encode;
mod governor;
mod render;
mod sink;

pub use assembler::{
    RouteData, StreamAssembler, StreamConfig, StreamDocument, StreamEvent, StreamOutcome,
    StreamState,
};
pub use chunk::{FieldAddress, ResponseHead, StreamChunk};
pub use encode::{
    escape_html_json, ChunkEncoder, DataEncoder, DocumentEncoder, DATA_FRAME_PREFIX,
    ERROR_FRAME_PREFIX, FRAME_SEPARATOR, SCRIPT_BOOTSTRAP, SCRIPT_CLOSE, SCRIPT_OPEN, SCRIPT_PUSH,
};
pub use governor::{AbortGovernor, AbortHandle, AbortReason, AbortSignal};
pub use render::{PageShell, ShellContext, ShellRenderer};
pub use sink::{ChunkSink, CollectSink, EncodedSink};
