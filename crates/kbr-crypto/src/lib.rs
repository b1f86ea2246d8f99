//! kbr-crypto: key operations for backup envelope restore
//!
//! Key hierarchy:
//! ```text
//! unlock passphrase ──PBKDF2-HMAC-SHA256(salt, iterations)──▶ per-class KEK
//! per-class KEK   ──unwrap──▶ class key        (one per protection class)
//! class key       ──unwrap──▶ item key         (per item, backup-wrapped)
//! item key        ──XChaCha20-Poly1305──▶ attribute / secret-data blobs
//! ```
//!
//! Wrapped keys are `[24-byte nonce][ciphertext][16-byte tag]`. Blob AEAD
//! calls bind the item digest and the blob role as AAD, so ciphertext cannot
//! be swapped between items or between the attribute and data slots.
//!
//! KDF and key unwrap go through the [`provider::KeyProvider`] seam; callers
//! with hardened external primitives substitute their own implementation,
//! everything else uses [`provider::StandardProvider`].

pub mod item;
pub mod keyring;
pub mod keys;
pub mod provider;
pub mod seal;

pub use item::{decrypt_item, BlobRole, DecodedItem, DecryptError};
pub use keyring::{build_keyring, ClassKeyring, LockedClass, LockedReason};
pub use keys::{ClassKek, ClassKey, ItemKey};
pub use provider::{IntegrityError, KeyProvider, StandardProvider};
pub use seal::{generate_class_key, generate_item_key, seal_blob, wrap_class_key, wrap_item_key};
