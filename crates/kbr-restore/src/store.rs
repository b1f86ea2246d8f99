//! Item-store collaborator boundary.
//!
//! The core only needs idempotent upsert semantics keyed by the item's
//! stable digest; the production store is a relational database elsewhere.
//! [`MemoryStore`] is the reference implementation used by tests and the
//! CLI.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use kbr_codec::ItemMetadataKey;
use kbr_core::ItemDigest;

/// Row identity assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("item store rejected upsert: {0}")]
    Rejected(String),
}

/// An item as handed to the store: decrypted attributes and secret payload
/// plus the (possibly healed) metadata-key record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    pub digest: ItemDigest,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub secret_data: Vec<u8>,
    pub metadata_key: ItemMetadataKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(ItemId),
    Updated(ItemId),
}

impl UpsertOutcome {
    pub fn item_id(self) -> ItemId {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Updated(id) => id,
        }
    }
}

/// Single-writer store interface. The orchestrator serializes calls at this
/// boundary, so implementations need no internal locking.
pub trait ItemStore: Send {
    fn upsert(&mut self, item: StoredItem) -> Result<UpsertOutcome, StoreError>;
    fn query(&self, digest: &ItemDigest) -> Option<&StoredItem>;
}

/// In-memory reference store with sequential row ids.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: HashMap<ItemDigest, (ItemId, StoredItem)>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl ItemStore for MemoryStore {
    fn upsert(&mut self, item: StoredItem) -> Result<UpsertOutcome, StoreError> {
        match self.items.get_mut(&item.digest) {
            Some((id, existing)) => {
                *existing = item;
                Ok(UpsertOutcome::Updated(*id))
            }
            None => {
                self.next_id += 1;
                let id = ItemId(self.next_id);
                self.items.insert(item.digest, (id, item));
                Ok(UpsertOutcome::Inserted(id))
            }
        }
    }

    fn query(&self, digest: &ItemDigest) -> Option<&StoredItem> {
        self.items.get(digest).map(|(_, item)| item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbr_core::ClassId;

    fn item(digest_byte: u8, acct: &str) -> StoredItem {
        let mut attributes = serde_json::Map::new();
        attributes.insert("acct".into(), acct.into());
        StoredItem {
            digest: ItemDigest([digest_byte; 32]),
            attributes,
            secret_data: b"payload".to_vec(),
            metadata_key: ItemMetadataKey {
                keyclass: ClassId(6),
                actual_keyclass: ClassId(6),
                bag_uuid: None,
                aks_wrapped_key: None,
                backup_wrapped_key: Some(vec![0u8; 72]),
            },
        }
    }

    #[test]
    fn upsert_inserts_then_updates() {
        let mut store = MemoryStore::new();

        let first = store.upsert(item(1, "alice")).unwrap();
        let UpsertOutcome::Inserted(id) = first else { panic!("expected insert") };

        let second = store.upsert(item(1, "bob")).unwrap();
        assert_eq!(second, UpsertOutcome::Updated(id), "same digest must update in place");

        assert_eq!(store.len(), 1);
        let stored = store.query(&ItemDigest([1; 32])).unwrap();
        assert_eq!(stored.attributes["acct"], "bob");
    }

    #[test]
    fn distinct_digests_get_distinct_ids() {
        let mut store = MemoryStore::new();
        let a = store.upsert(item(1, "a")).unwrap().item_id();
        let b = store.upsert(item(2, "b")).unwrap().item_id();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn query_missing_digest_is_none() {
        let store = MemoryStore::new();
        assert!(store.query(&ItemDigest([9; 32])).is_none());
    }
}
