//! # Live Tree
//!
//! A minimal model of the client's mounted UI: an arena of nodes addressed by
//! [`NodeId`]. It tracks exactly what reconciliation must preserve:
//!
//! - component instances and their local state (never reset by a late value)
//! - placeholders waiting on a field address
//! - error boundaries, which swap their subtree for an error view
//!
//! Every node counts its mounts and renders so callers can see which parts of
//! the tree an update touched.

use super::slot::SlotState;
use crate::deferred::ErrorDescriptor;
use crate::stream::FieldAddress;
use serde_json::Value;
use std::fmt::Write as _;

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// What a placeholder currently shows.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaceholderState {
    Pending,
    Resolved(Value),
    Rejected(ErrorDescriptor),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Element {
        tag: String,
    },
    Text(String),
    /// A stateful component instance.
    Component {
        name: String,
        state: Value,
    },
    /// Catches rejections bubbling from descendants. `error` is set once it
    /// has caught one.
    Boundary {
        error: Option<ErrorDescriptor>,
    },
    Placeholder {
        address: FieldAddress,
        fallback: String,
        /// Local error view; without one, rejections bubble.
        error_view: Option<String>,
        state: PlaceholderState,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub mounted: bool,
    pub mount_count: u32,
    pub render_count: u32,
}

/// The mounted UI.
#[derive(Debug, Clone)]
pub struct LiveTree {
    nodes: Vec<Node>,
}

impl Default for LiveTree {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveTree {
    /// A tree holding only the root, which is itself an error boundary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Boundary { error: None },
                parent: None,
                children: Vec::new(),
                mounted: true,
                mount_count: 1,
                render_count: 1,
            }],
        }
    }

    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Mount a new node under `parent`. Returns `None` if `parent` is unknown
    /// or no longer mounted.
    pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> Option<NodeId> {
        if !self.node(parent)?.mounted {
            return None;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
            mounted: true,
            mount_count: 1,
            render_count: 1,
        });
        self.nodes[parent.0].children.push(id);
        Some(id)
    }

    pub fn element(&mut self, parent: NodeId, tag: &str) -> Option<NodeId> {
        self.append(parent, NodeKind::Element { tag: tag.to_string() })
    }

    pub fn text(&mut self, parent: NodeId, text: &str) -> Option<NodeId> {
        self.append(parent, NodeKind::Text(text.to_string()))
    }

    pub fn component(&mut self, parent: NodeId, name: &str, state: Value) -> Option<NodeId> {
        self.append(
            parent,
            NodeKind::Component {
                name: name.to_string(),
                state,
            },
        )
    }

    pub fn boundary(&mut self, parent: NodeId) -> Option<NodeId> {
        self.append(parent, NodeKind::Boundary { error: None })
    }

    pub fn placeholder(
        &mut self,
        parent: NodeId,
        address: FieldAddress,
        fallback: &str,
        error_view: Option<&str>,
    ) -> Option<NodeId> {
        self.append(
            parent,
            NodeKind::Placeholder {
                address,
                fallback: fallback.to_string(),
                error_view: error_view.map(str::to_string),
                state: PlaceholderState::Pending,
            },
        )
    }

    #[must_use]
    pub fn component_state(&self, id: NodeId) -> Option<&Value> {
        match &self.node(id)?.kind {
            NodeKind::Component { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Local state change inside a component (a click on a counter). Only
    /// that component re-renders.
    pub fn set_component_state(&mut self, id: NodeId, value: Value) -> bool {
        let Some(node) = self.nodes.get_mut(id.0).filter(|n| n.mounted) else {
            return false;
        };
        match &mut node.kind {
            NodeKind::Component { state, .. } => {
                *state = value;
                node.render_count += 1;
                true
            }
            _ => false,
        }
    }

    /// Mounted placeholders waiting on `address`.
    #[must_use]
    pub fn placeholders_for(&self, address: &FieldAddress) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.mounted)
            .filter(|(_, n)| matches!(&n.kind, NodeKind::Placeholder { address: a, .. } if a == address))
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    /// Settle one placeholder. Returns the node that re-rendered: the
    /// placeholder itself, or the boundary that caught a bubbling rejection.
    pub fn settle_placeholder(&mut self, id: NodeId, settlement: &SlotState) -> Option<NodeId> {
        let node = self.nodes.get_mut(id.0).filter(|n| n.mounted)?;
        let NodeKind::Placeholder {
            error_view, state, ..
        } = &mut node.kind
        else {
            return None;
        };
        match settlement {
            SlotState::Resolved(value) => {
                *state = PlaceholderState::Resolved(value.clone());
                node.render_count += 1;
                Some(id)
            }
            SlotState::Rejected(err) if error_view.is_some() => {
                *state = PlaceholderState::Rejected(err.clone());
                node.render_count += 1;
                Some(id)
            }
            SlotState::Rejected(err) => {
                let boundary = self.nearest_boundary(id)?;
                self.catch(boundary, err.clone());
                Some(boundary)
            }
        }
    }

    fn nearest_boundary(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.node(id)?.parent;
        while let Some(parent) = current {
            let node = self.node(parent)?;
            if matches!(node.kind, NodeKind::Boundary { .. }) {
                return Some(parent);
            }
            current = node.parent;
        }
        None
    }

    /// Put `boundary` into its error state; its children unmount.
    fn catch(&mut self, boundary: NodeId, err: ErrorDescriptor) {
        let children = self.nodes[boundary.0].children.clone();
        for child in children {
            self.unmount(child);
        }
        let node = &mut self.nodes[boundary.0];
        node.children.clear();
        node.render_count += 1;
        if let NodeKind::Boundary { error } = &mut node.kind {
            *error = Some(err);
        }
    }

    /// Unmount `id` and its subtree.
    pub fn unmount(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get_mut(current.0) else {
                continue;
            };
            node.mounted = false;
            stack.extend(node.children.iter().copied());
        }
    }

    /// Remove `id` from its parent and unmount it.
    pub fn remove(&mut self, id: NodeId) {
        if let Some(parent) = self.node(id).and_then(|n| n.parent) {
            self.nodes[parent.0].children.retain(|c| *c != id);
        }
        self.unmount(id);
    }

    /// Clear a boundary's error so it can render children again.
    pub fn reset_boundary(&mut self, id: NodeId) -> bool {
        match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Boundary { error }) => {
                *error = None;
                self.nodes[id.0].render_count += 1;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn boundary_error(&self, id: NodeId) -> Option<&ErrorDescriptor> {
        match &self.node(id)?.kind {
            NodeKind::Boundary { error } => error.as_ref(),
            _ => None,
        }
    }

    #[must_use]
    pub fn placeholder_state(&self, id: NodeId) -> Option<&PlaceholderState> {
        match &self.node(id)?.kind {
            NodeKind::Placeholder { state, .. } => Some(state),
            _ => None,
        }
    }

    /// Markup of the mounted tree, for inspection.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_node(self.root(), &mut out);
        out
    }

    fn render_node(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id).filter(|n| n.mounted) else {
            return;
        };
        let children = |tree: &Self, out: &mut String| {
            for child in &node.children {
                tree.render_node(*child, out);
            }
        };
        match &node.kind {
            NodeKind::Element { tag } => {
                let _ = write!(out, "<{tag}>");
                children(self, out);
                let _ = write!(out, "</{tag}>");
            }
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Component { name, state } => {
                let _ = write!(out, "<{name} state={state}>");
                children(self, out);
                let _ = write!(out, "</{name}>");
            }
            NodeKind::Boundary { error: Some(err) } => {
                let _ = write!(out, "<error>{}</error>", err.message);
            }
            NodeKind::Boundary { error: None } => children(self, out),
            NodeKind::Placeholder {
                fallback,
                error_view,
                state,
                ..
            } => match state {
                PlaceholderState::Pending => out.push_str(fallback),
                PlaceholderState::Resolved(value) => {
                    let _ = write!(out, "{value}");
                }
                PlaceholderState::Rejected(err) => {
                    let view = error_view.as_deref().unwrap_or_default();
                    let _ = write!(out, "{view}: {}", err.message);
                }
            },
        }
    }
}
