//! Typed envelope tree produced by the parser.
//!
//! All of these are plain data: constructed once from the byte stream,
//! read-only afterwards. Field order in the vectors mirrors encounter order
//! in the stream; nothing is re-sorted.

use kbr_core::{ClassId, ContainerType, ItemDigest, Uuid16, WrapType};
use serde::Serialize;

/// Decoded backup container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEnvelope {
    /// Envelope format version; only recognized values parse.
    pub version: u32,
    pub container_type: ContainerType,
    pub uuid: Uuid16,
    /// Envelope-level integrity-key material. Carried opaquely; MAC
    /// verification belongs to the key-bag collaborator.
    #[serde(skip)]
    pub integrity_key: Vec<u8>,
    /// One entry per protection class, stream order (typically highest
    /// class first). No duplicate class identifiers.
    pub class_keys: Vec<ClassKeyEntry>,
    pub items: Vec<EncodedItem>,
}

/// One per-class key record from a `CKEY` group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassKeyEntry {
    pub uuid: Uuid16,
    pub class: ClassId,
    pub wrap: WrapType,
    /// KDF salt; present iff `wrap == Passphrase`.
    #[serde(skip)]
    pub salt: Option<Vec<u8>>,
    /// KDF iteration count; present iff `wrap == Passphrase`.
    pub iterations: Option<u32>,
    /// Wrapped key bytes; `Passphrase` entries carry exactly
    /// [`kbr_core::WRAPPED_KEY_SIZE`] bytes, `Asymmetric` entries are opaque.
    #[serde(skip)]
    pub wrapped_key: Option<Vec<u8>>,
    /// Plaintext key; present iff `wrap == None` (always-available class).
    #[serde(skip)]
    pub plain_key: Option<Vec<u8>>,
}

/// One encrypted item from an `ITEM` group.
///
/// `attributes` and `secret_data` hold the raw blob bytes (16-byte header +
/// ciphertext); the decryptor validates the headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodedItem {
    /// Declared protection-class attribute carried on the item itself.
    pub class: ClassId,
    pub digest: ItemDigest,
    pub metadata_key: ItemMetadataKey,
    #[serde(skip)]
    pub attributes: Vec<u8>,
    #[serde(skip)]
    pub secret_data: Vec<u8>,
}

/// Per-item metadata-key record from an `MKEY` group.
///
/// `keyclass` and `actual_keyclass` are always present and may disagree:
/// a historical defect wrote items whose declared class attribute did not
/// match the class their key was really wrapped under. Such items are
/// reconciliation-eligible, not invalid. The optional fields are genuinely
/// optional on the wire and stay `Option` here — no sentinel values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemMetadataKey {
    /// Class the item claims its key is wrapped under.
    pub keyclass: ClassId,
    /// Class the key material was actually wrapped under.
    pub actual_keyclass: ClassId,
    /// UUID of the device key-bag that produced `aks_wrapped_key`.
    pub bag_uuid: Option<Uuid16>,
    /// Device-bound wrapping; opaque to the restore path, passed through.
    #[serde(skip)]
    pub aks_wrapped_key: Option<Vec<u8>>,
    /// Backup wrapping, unwrappable with the class key of
    /// `actual_keyclass`.
    #[serde(skip)]
    pub backup_wrapped_key: Option<Vec<u8>>,
}

impl ItemMetadataKey {
    /// Declared and actual keyclass agree: single unwrap path.
    pub fn is_consistent(&self) -> bool {
        self.keyclass == self.actual_keyclass
    }
}

impl BackupEnvelope {
    /// Class-key entry for `class`, if the envelope carries one.
    pub fn class_key(&self, class: ClassId) -> Option<&ClassKeyEntry> {
        self.class_keys.iter().find(|e| e.class == class)
    }
}
