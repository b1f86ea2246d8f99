//! Restore orchestrator.
//!
//! Drives parse → keyring build → per-item decode/reconcile → upsert and
//! aggregates outcomes. Per-item work is order-independent and may run on a
//! bounded worker pool; the item store is the sole serialization point and
//! sits behind a mutex at the collaborator boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use secrecy::SecretString;
use thiserror::Error;
use tracing::{debug, info, warn};

use kbr_codec::{parse_envelope, BackupEnvelope, EncodedItem, ParseError};
use kbr_core::ItemDigest;
use kbr_crypto::{
    build_keyring, decrypt_item, ClassKeyring, DecodedItem, DecryptError, KeyProvider,
};

use crate::reconcile::{classify, healed_metadata_key, Reconciliation};
use crate::report::{HealRecord, ItemReport, ItemStatus, LockedClassReport, RestoreReport};
use crate::store::{ItemStore, StoredItem, UpsertOutcome};

/// Orchestrator knobs. The default is a serial, non-cancellable run.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Worker threads for per-item decode: 0 or 1 runs serially in the
    /// calling thread, anything larger builds a bounded pool of that size.
    pub parallelism: usize,
    /// Cooperative cancellation, checked between items — never mid-item.
    /// Items not reached are absent from the report and `completed` is
    /// `false`.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl RestoreOptions {
    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Error)]
pub enum RestoreError {
    /// Structurally corrupt container — the only failure that aborts a
    /// restore instead of being recorded per item.
    #[error("malformed container: {0}")]
    Malformed(#[from] ParseError),

    #[error("failed to build restore worker pool: {0}")]
    WorkerPool(String),
}

/// Decode + reconciliation result for one item, before any store involvement.
///
/// [`decode_outcomes`] yields these lazily for callers that want to stream
/// per-item events instead of collecting a report.
#[derive(Debug)]
pub struct DecodeOutcome {
    pub digest: ItemDigest,
    pub result: Result<(DecodedItem, Reconciliation), DecryptError>,
}

/// Parse a container and restore every item into `store`.
pub fn restore<S: ItemStore>(
    buf: &[u8],
    secret: &SecretString,
    provider: &dyn KeyProvider,
    store: &mut S,
    options: &RestoreOptions,
) -> Result<RestoreReport, RestoreError> {
    let envelope = parse_envelope(buf)?;
    restore_envelope(&envelope, secret, provider, store, options)
}

/// Restore from an already parsed envelope.
pub fn restore_envelope<S: ItemStore>(
    envelope: &BackupEnvelope,
    secret: &SecretString,
    provider: &dyn KeyProvider,
    store: &mut S,
    options: &RestoreOptions,
) -> Result<RestoreReport, RestoreError> {
    let keyring = build_keyring(&envelope.class_keys, secret, provider);
    info!(
        container = %envelope.uuid,
        classes = keyring.available_count(),
        locked = keyring.locked().len(),
        items = envelope.items.len(),
        "keyring built, restoring items"
    );

    let locked_classes = keyring
        .locked()
        .iter()
        .map(|lc| LockedClassReport { class: lc.class, reason: lc.reason.to_string() })
        .collect();

    // Sole serialization point: decode may be parallel, upserts are not.
    let store = Mutex::new(store);

    let mut completed = true;
    let items: Vec<ItemReport> = if options.parallelism > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.parallelism)
            .build()
            .map_err(|e| RestoreError::WorkerPool(e.to_string()))?;
        let processed: Vec<Option<ItemReport>> = pool.install(|| {
            envelope
                .items
                .par_iter()
                .map(|item| {
                    if options.cancelled() {
                        return None;
                    }
                    Some(process_item(provider, &keyring, item, &store))
                })
                .collect()
        });
        completed = processed.iter().all(Option::is_some);
        processed.into_iter().flatten().collect()
    } else {
        let mut out = Vec::with_capacity(envelope.items.len());
        for item in &envelope.items {
            if options.cancelled() {
                completed = false;
                break;
            }
            out.push(process_item(provider, &keyring, item, &store));
        }
        out
    };

    let report = RestoreReport::new(
        envelope.uuid,
        envelope.container_type,
        envelope.version,
        locked_classes,
        items,
        completed,
    );
    info!(
        restored = report.totals.restored(),
        skipped = report.totals.skipped(),
        completed = report.completed,
        "restore finished"
    );
    Ok(report)
}

/// Lazily decode and reconcile items in stream order, without touching any
/// store. Re-running the iterator means re-running the decode.
pub fn decode_outcomes<'a>(
    provider: &'a dyn KeyProvider,
    keyring: &'a ClassKeyring,
    envelope: &'a BackupEnvelope,
) -> impl Iterator<Item = DecodeOutcome> + 'a {
    envelope.items.iter().map(move |item| decode_one(provider, keyring, item))
}

fn decode_one(
    provider: &dyn KeyProvider,
    keyring: &ClassKeyring,
    item: &EncodedItem,
) -> DecodeOutcome {
    let result = decrypt_item(provider, keyring, item).map(|decoded| {
        let reconciliation = classify(&item.metadata_key, Some(decoded.unwrapped_with));
        (decoded, reconciliation)
    });
    DecodeOutcome { digest: item.digest, result }
}

fn process_item<S: ItemStore>(
    provider: &dyn KeyProvider,
    keyring: &ClassKeyring,
    item: &EncodedItem,
    store: &Mutex<&mut S>,
) -> ItemReport {
    let outcome = decode_one(provider, keyring, item);
    let (decoded, reconciliation) = match outcome.result {
        Err(err @ DecryptError::ClassUnavailable { .. }) => {
            warn!(digest = %outcome.digest.short(), %err, "item skipped: class locked");
            return skip(outcome.digest, ItemStatus::SkippedLockedClass, err.to_string());
        }
        Err(err) => {
            warn!(digest = %outcome.digest.short(), %err, "item skipped");
            return skip(outcome.digest, ItemStatus::SkippedMalformed, err.to_string());
        }
        Ok(ok) => ok,
    };

    let healed = match reconciliation {
        Reconciliation::RecoverableMismatch { declared, actual, rewritten_to } => {
            debug!(
                digest = %decoded.digest.short(),
                declared = declared.0,
                actual = actual.0,
                rewritten_to = rewritten_to.0,
                "healing inconsistent metadata key"
            );
            Some(HealRecord { declared, actual, rewritten_to })
        }
        _ => None,
    };

    let metadata_key = match &healed {
        Some(h) => healed_metadata_key(&decoded.metadata_key, h.rewritten_to),
        None => decoded.metadata_key.clone(),
    };
    let stored = StoredItem {
        digest: decoded.digest,
        attributes: decoded.attributes,
        secret_data: decoded.secret_data,
        metadata_key,
    };

    let upsert = {
        let mut guard = store.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.upsert(stored)
    };
    match upsert {
        Ok(outcome) => {
            let status = match outcome {
                UpsertOutcome::Inserted(_) => ItemStatus::Inserted,
                UpsertOutcome::Updated(_) => ItemStatus::Updated,
            };
            ItemReport {
                digest: decoded.digest,
                status,
                item_id: Some(outcome.item_id()),
                unwrapped_with: Some(decoded.unwrapped_with),
                healed,
                reason: None,
            }
        }
        Err(err) => {
            warn!(digest = %decoded.digest.short(), %err, "item store refused upsert");
            skip(decoded.digest, ItemStatus::SkippedMalformed, format!("item store: {err}"))
        }
    }
}

fn skip(digest: ItemDigest, status: ItemStatus, reason: String) -> ItemReport {
    ItemReport { digest, status, item_id: None, unwrapped_with: None, healed: None, reason: Some(reason) }
}
