//! # Client Reconciliation Runtime
//!
//! Applies stream chunks to a [`LiveTree`]. Chunks are matched to placeholders
//! by [`FieldAddress`] only, so order of arrival does not matter and a late
//! value never touches anything outside its own placeholder (or, for an
//! unhandled rejection, the nearest boundary).
//!
//! Exactly one connection is current at a time. A document load or a
//! navigation opens a new one; chunks still arriving on an older connection
//! are ignored.

use super::slot::{ClientSlot, SlotState};
use super::tree::{LiveTree, NodeId};
use crate::deferred::FieldPath;
use crate::stream::{FieldAddress, StreamChunk};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Identifies one document load or navigation fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

/// What applying one chunk did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Nodes that re-rendered (placeholders, or boundaries that caught a
    /// rejection). Empty for a shell.
    Applied { affected: Vec<NodeId> },
    /// The field was already settled; nothing changed.
    Duplicate,
    /// The chunk belongs to a connection that is no longer current.
    Stale,
    /// Settled, but no placeholder is mounted for it yet.
    Pending,
}

/// Client-side state for one page.
#[derive(Debug)]
pub struct ClientRuntime {
    tree: LiveTree,
    slots: HashMap<FieldAddress, ClientSlot>,
    critical: Map<String, Value>,
    current: ConnectionId,
    next_connection: u64,
}

impl Default for ClientRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: LiveTree::new(),
            slots: HashMap::new(),
            critical: Map::new(),
            current: ConnectionId(0),
            next_connection: 1,
        }
    }

    #[must_use]
    pub fn tree(&self) -> &LiveTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut LiveTree {
        &mut self.tree
    }

    #[must_use]
    pub fn current_connection(&self) -> ConnectionId {
        self.current
    }

    fn open_connection(&mut self) -> ConnectionId {
        self.current = ConnectionId(self.next_connection);
        self.next_connection += 1;
        self.current
    }

    /// Start a full document load: a fresh tree and no known fields.
    pub fn open_document(&mut self) -> ConnectionId {
        self.tree = LiveTree::new();
        self.slots.clear();
        self.critical.clear();
        let conn = self.open_connection();
        debug!(connection = conn.0, "Document connection opened");
        conn
    }

    /// Start a client-side navigation that re-fetches `routes`. Their
    /// fields are forgotten; everything else (and the tree) stays.
    pub fn navigate(&mut self, routes: &[&str]) -> ConnectionId {
        self.slots.retain(|addr, _| !routes.contains(&addr.route.as_str()));
        for route in routes {
            self.critical.remove(*route);
        }
        let conn = self.open_connection();
        debug!(connection = conn.0, routes = ?routes, "Navigation connection opened");
        conn
    }

    /// Critical data of a route as received in its shell frame.
    #[must_use]
    pub fn critical(&self, route: &str) -> Option<&Value> {
        self.critical.get(route)
    }

    /// Current value of a field: an inlined critical value or a resolved slot.
    #[must_use]
    pub fn value(&self, address: &FieldAddress) -> Option<&Value> {
        if let Some(SlotState::Resolved(v)) = self.slots.get(address).and_then(ClientSlot::get) {
            return Some(v);
        }
        let v = address.path.lookup(self.critical.get(&address.route)?)?;
        FieldPath::from_placeholder(v).is_none().then_some(v)
    }

    #[must_use]
    pub fn slot(&self, address: &FieldAddress) -> Option<&ClientSlot> {
        self.slots.get(address)
    }

    /// Apply one chunk received on `conn`.
    pub fn apply(&mut self, conn: ConnectionId, chunk: StreamChunk) -> ApplyOutcome {
        if conn != self.current {
            trace!(connection = conn.0, current = self.current.0, "Stale chunk ignored");
            return ApplyOutcome::Stale;
        }
        match chunk {
            StreamChunk::InitialShell { critical, .. } => {
                if let Value::Object(routes) = critical {
                    for (route, data) in routes {
                        self.register_placeholders(&route, &data);
                        self.critical.insert(route, data);
                    }
                }
                ApplyOutcome::Applied {
                    affected: Vec::new(),
                }
            }
            StreamChunk::ResolvedValue {
                route, path, value, ..
            } => self.settle(FieldAddress::new(route, path), SlotState::Resolved(value)),
            StreamChunk::RejectedValue { route, path, error } => {
                self.settle(FieldAddress::new(route, path), SlotState::Rejected(error))
            }
        }
    }

    /// Apply a batch in order, returning each outcome.
    pub fn apply_all(
        &mut self,
        conn: ConnectionId,
        chunks: impl IntoIterator<Item = StreamChunk>,
    ) -> Vec<ApplyOutcome> {
        chunks.into_iter().map(|c| self.apply(conn, c)).collect()
    }

    fn register_placeholders(&mut self, route: &str, data: &Value) {
        let mut stack = vec![data];
        while let Some(value) = stack.pop() {
            match value {
                Value::Object(map) => stack.extend(map.values()),
                Value::String(_) => {
                    if let Some(path) = FieldPath::from_placeholder(value) {
                        self.slots
                            .entry(FieldAddress::new(route, path))
                            .or_default();
                    }
                }
                _ => {}
            }
        }
    }

    fn settle(&mut self, address: FieldAddress, state: SlotState) -> ApplyOutcome {
        let slot = self.slots.entry(address.clone()).or_default();
        if !slot.settle(state.clone()) {
            trace!(field = %address, "Duplicate chunk ignored");
            return ApplyOutcome::Duplicate;
        }
        let placeholders = self.tree.placeholders_for(&address);
        if placeholders.is_empty() {
            debug!(field = %address, "Settled before its placeholder mounted");
            return ApplyOutcome::Pending;
        }
        let affected: Vec<NodeId> = placeholders
            .into_iter()
            .filter_map(|id| self.tree.settle_placeholder(id, &state))
            .collect();
        debug!(
            field = %address,
            resolved = matches!(state, SlotState::Resolved(_)),
            affected = affected.len(),
            "Chunk applied"
        );
        ApplyOutcome::Applied { affected }
    }

    /// Mount a placeholder for `address`. A field that already has a value
    /// (inlined in the shell or settled earlier) renders it right away.
    pub fn mount_placeholder(
        &mut self,
        parent: NodeId,
        address: FieldAddress,
        fallback: &str,
        error_view: Option<&str>,
    ) -> Option<NodeId> {
        let known = match self.slots.get(&address).and_then(ClientSlot::get) {
            Some(state) => Some(state.clone()),
            None => self.value(&address).cloned().map(SlotState::Resolved),
        };
        let id = self.tree.placeholder(parent, address, fallback, error_view)?;
        if let Some(state) = known {
            self.tree.settle_placeholder(id, &state);
        }
        Some(id)
    }
}
