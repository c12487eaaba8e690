//! # Deferred Value Container
//!
//! A loader that wants to stream returns a [`DeferredData`]: a tree of fields
//! where each field is either available now ([`Field::Immediate`]) or waiting on
//! a [`Promise`] ([`Field::Pending`]). Pending fields live in an arena of
//! [`DeferredSlot`]s addressed by [`SlotId`], and every slot knows its
//! [`FieldPath`] so a settlement can be shipped to the client out of order.
//!
//! ```rust
//! use brrtstream::deferred::{defer, Promise};
//! use serde_json::json;
//!
//! let data = defer()
//!     .value("deferredId", "D")
//!     .pending("resolvedId", Promise::spawn(|| Ok(json!("R"))))
//!     .header("Cache-Control", "no-store")
//!     .build()
//!     .unwrap();
//! assert_eq!(data.pending_count(), 1);
//! ```

mod data;
mod error;
mod promise;

pub use data::{
    critical_value, defer, DeferredBuilder, DeferredData, DeferredParts, DeferredSlot, Field,
    FieldPath, SlotId, PLACEHOLDER_PREFIX,
};
pub use error::{DeferredError, ErrorDescriptor, ErrorKind, ABORTED_MESSAGE, REDACTED_MESSAGE};
pub use promise::{promise, Promise, Resolver, Settlement};
