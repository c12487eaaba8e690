use crate::deferred::ErrorDescriptor;
use once_cell::sync::OnceCell;
use serde_json::Value;

/// Final value of an awaited field on the client.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotState {
    Resolved(Value),
    Rejected(ErrorDescriptor),
}

/// Settle-once cell for one awaited field path.
#[derive(Debug, Default)]
pub struct ClientSlot {
    cell: OnceCell<SlotState>,
}

impl ClientSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A slot that was settled before anyone waited on it.
    #[must_use]
    pub fn settled(state: SlotState) -> Self {
        Self {
            cell: OnceCell::with_value(state),
        }
    }

    /// Returns `true` if this call settled the slot, `false` if it was
    /// already settled (the new state is discarded).
    pub fn settle(&self, state: SlotState) -> bool {
        self.cell.set(state).is_ok()
    }

    #[must_use]
    pub fn get(&self) -> Option<&SlotState> {
        self.cell.get()
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.cell.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_settlement_wins() {
        let slot = ClientSlot::new();
        assert!(!slot.is_settled());
        assert!(slot.settle(SlotState::Resolved(json!(1))));
        assert!(!slot.settle(SlotState::Rejected(ErrorDescriptor::aborted())));
        assert_eq!(slot.get(), Some(&SlotState::Resolved(json!(1))));
    }
}
