//! Per-restore-session class keyring.
//!
//! Built once from the envelope's class-key entries plus the unlock secret,
//! read-only afterwards. A class whose unwrap fails is recorded as locked and
//! never exposed; one locked class does not stop the others from unlocking.

use std::collections::HashMap;
use std::fmt;

use secrecy::SecretString;
use tracing::{debug, warn};

use kbr_codec::ClassKeyEntry;
use kbr_core::{ClassId, WrapType, KEY_SIZE};

use crate::keys::ClassKey;
use crate::provider::KeyProvider;

/// Why a protection class stayed locked during keyring construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockedReason {
    /// The KEK derived from the unlock secret failed the unwrap integrity
    /// check — wrong secret or corrupted entry, indistinguishable.
    UnwrapFailed,
    /// Asymmetric entries need an external collaborator the restore path
    /// does not have.
    AsymmetricUnsupported,
    /// Entry shape unexpected; the parser normally rejects these upstream.
    MalformedEntry,
}

impl fmt::Display for LockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockedReason::UnwrapFailed => write!(f, "unlock material cannot unwrap the class key"),
            LockedReason::AsymmetricUnsupported => {
                write!(f, "asymmetric wrap requires an external unwrapper")
            }
            LockedReason::MalformedEntry => write!(f, "class-key entry is malformed"),
        }
    }
}

/// A class that remained locked, with the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockedClass {
    pub class: ClassId,
    pub reason: LockedReason,
}

/// Mapping from protection class to its usable symmetric key.
pub struct ClassKeyring {
    keys: HashMap<ClassId, ClassKey>,
    locked: Vec<LockedClass>,
}

impl ClassKeyring {
    /// Key for `class`, if it unlocked.
    pub fn class_key(&self, class: ClassId) -> Option<&ClassKey> {
        self.keys.get(&class)
    }

    pub fn is_available(&self, class: ClassId) -> bool {
        self.keys.contains_key(&class)
    }

    /// Classes that stayed locked, in envelope stream order.
    pub fn locked(&self) -> &[LockedClass] {
        &self.locked
    }

    pub fn available_count(&self) -> usize {
        self.keys.len()
    }
}

impl fmt::Debug for ClassKeyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // keys themselves are redacted; only class availability is shown
        let mut available: Vec<u32> = self.keys.keys().map(|c| c.0).collect();
        available.sort_unstable();
        f.debug_struct("ClassKeyring")
            .field("available", &available)
            .field("locked", &self.locked)
            .finish()
    }
}

/// Build the keyring for one restore session.
///
/// Deterministic for fixed entries + secret + provider. Never fails as a
/// whole: per-class failures are recorded in the result.
pub fn build_keyring(
    entries: &[ClassKeyEntry],
    secret: &SecretString,
    provider: &dyn KeyProvider,
) -> ClassKeyring {
    let mut keys = HashMap::new();
    let mut locked = Vec::new();

    for entry in entries {
        match unlock_entry(entry, secret, provider) {
            Ok(key) => {
                debug!(class = entry.class.0, wrap = ?entry.wrap, "class key available");
                keys.insert(entry.class, key);
            }
            Err(reason) => {
                warn!(class = entry.class.0, %reason, "class stays locked");
                locked.push(LockedClass { class: entry.class, reason });
            }
        }
    }

    ClassKeyring { keys, locked }
}

fn unlock_entry(
    entry: &ClassKeyEntry,
    secret: &SecretString,
    provider: &dyn KeyProvider,
) -> Result<ClassKey, LockedReason> {
    match entry.wrap {
        WrapType::None => {
            let plain = entry.plain_key.as_deref().ok_or(LockedReason::MalformedEntry)?;
            let bytes: [u8; KEY_SIZE] =
                plain.try_into().map_err(|_| LockedReason::MalformedEntry)?;
            Ok(ClassKey::from_bytes(bytes))
        }
        WrapType::Passphrase => {
            let salt = entry.salt.as_deref().ok_or(LockedReason::MalformedEntry)?;
            let iterations = entry.iterations.ok_or(LockedReason::MalformedEntry)?;
            let wrapped = entry.wrapped_key.as_deref().ok_or(LockedReason::MalformedEntry)?;

            let kek = provider.derive_key(secret, salt, iterations);
            let key = provider
                .unwrap_key(wrapped, kek.as_bytes())
                .map_err(|_| LockedReason::UnwrapFailed)?;
            Ok(ClassKey::from_bytes(key))
        }
        WrapType::Asymmetric => Err(LockedReason::AsymmetricUnsupported),
    }
}
