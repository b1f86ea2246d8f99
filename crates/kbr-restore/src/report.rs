//! Restore report: per-item outcomes plus aggregate counts.

use serde::Serialize;

use kbr_core::{ClassId, ContainerType, ItemDigest, Uuid16};

use crate::store::ItemId;

/// Final disposition of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Inserted,
    /// An existing item was reconciled in place.
    Updated,
    SkippedMalformed,
    SkippedLockedClass,
}

/// Emitted when a declared/actual keyclass mismatch was healed by the
/// corrective upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealRecord {
    pub declared: ClassId,
    pub actual: ClassId,
    pub rewritten_to: ClassId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemReport {
    pub digest: ItemDigest,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
    /// Class whose key decrypted the item; absent for skips.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unwrapped_with: Option<ClassId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healed: Option<HealRecord>,
    /// Human-readable cause for skip outcomes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub inserted: usize,
    pub updated: usize,
    pub skipped_malformed: usize,
    pub skipped_locked_class: usize,
}

impl Totals {
    fn of(items: &[ItemReport]) -> Self {
        let mut totals = Totals::default();
        for item in items {
            match item.status {
                ItemStatus::Inserted => totals.inserted += 1,
                ItemStatus::Updated => totals.updated += 1,
                ItemStatus::SkippedMalformed => totals.skipped_malformed += 1,
                ItemStatus::SkippedLockedClass => totals.skipped_locked_class += 1,
            }
        }
        totals
    }

    pub fn restored(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn skipped(&self) -> usize {
        self.skipped_malformed + self.skipped_locked_class
    }
}

/// A class that stayed locked during keyring construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockedClassReport {
    pub class: ClassId,
    pub reason: String,
}

/// Aggregated outcome of one restore run. The container structure itself
/// passed parsing iff this struct exists; a malformed container surfaces as
/// [`crate::engine::RestoreError`] instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreReport {
    pub container_uuid: Uuid16,
    pub container_type: ContainerType,
    pub version: u32,
    pub locked_classes: Vec<LockedClassReport>,
    pub totals: Totals,
    pub items: Vec<ItemReport>,
    /// `false` when a cooperative cancellation stopped the run before every
    /// item completed.
    pub completed: bool,
}

impl RestoreReport {
    pub(crate) fn new(
        container_uuid: Uuid16,
        container_type: ContainerType,
        version: u32,
        locked_classes: Vec<LockedClassReport>,
        items: Vec<ItemReport>,
        completed: bool,
    ) -> Self {
        let totals = Totals::of(&items);
        Self { container_uuid, container_type, version, locked_classes, totals, items, completed }
    }
}
