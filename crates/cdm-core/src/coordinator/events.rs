use serde::Serialize;

use crate::model::{ItemId, TransferState};

/// Published by the coordinator on every accepted state or progress change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferEvent {
    StateChanged { item_id: ItemId, state: TransferState },
    Progress { item_id: ItemId, progress: f64 },
}

impl TransferEvent {
    pub fn item_id(&self) -> ItemId {
        match self {
            TransferEvent::StateChanged { item_id, .. } | TransferEvent::Progress { item_id, .. } => {
                *item_id
            }
        }
    }
}
