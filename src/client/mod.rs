//! # Client Runtime
//!
//! The receiving end of a stream: decoders for both transports, settle-once
//! slots per awaited field, and a reconciliation runtime that applies chunks
//! to a live tree without disturbing mounted component state.

mod decode;
mod runtime;
mod slot;
mod tree;

pub use decode::{DataFrameDecoder, DocumentDecoder};
pub use runtime::{ApplyOutcome, ClientRuntime, ConnectionId};
pub use slot::{ClientSlot, SlotState};
pub use tree::{LiveTree, Node, NodeId, NodeKind, PlaceholderState};
