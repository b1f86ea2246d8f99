//! Per-item decryption.
//!
//! The item key is backup-wrapped under the class key of the item's *actual*
//! keyclass — which, for items written while the declared/actual defect was
//! live, is not the class the item claims. The decryptor therefore tries the
//! declared class first and, when the item is reconciliation-eligible, falls
//! back to the actual class. Which class finally worked is reported so the
//! reconciler can heal the record.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use thiserror::Error;
use tracing::debug;

use kbr_codec::blob::{BlobError, EncryptedBlob};
use kbr_codec::{EncodedItem, ItemMetadataKey};
use kbr_core::{ClassId, ItemDigest, NONCE_SIZE};

use crate::keyring::ClassKeyring;
use crate::keys::ItemKey;
use crate::provider::KeyProvider;

/// Which slot a blob occupies; bound into the AEAD as AAD together with the
/// item digest so attribute and data ciphertexts cannot be swapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobRole {
    Attributes,
    SecretData,
}

impl BlobRole {
    /// AAD: item digest (32 bytes) followed by a role discriminator byte.
    pub(crate) fn aad(self, digest: &ItemDigest) -> [u8; 33] {
        let mut aad = [0u8; 33];
        aad[..32].copy_from_slice(digest.as_bytes());
        aad[32] = match self {
            BlobRole::Attributes => b'A',
            BlobRole::SecretData => b'D',
        };
        aad
    }
}

/// Typed per-item decode failure. None of these abort the restore; the
/// orchestrator records them and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptError {
    #[error("malformed blob: {0}")]
    Blob(#[from] BlobError),

    #[error("metadata key carries no backup-wrapped key material")]
    MissingBackupKey,

    #[error("no usable class key for declared {declared} or actual {actual}")]
    ClassUnavailable { declared: ClassId, actual: ClassId },

    #[error("integrity check failed under declared {declared} and actual {actual}")]
    Integrity { declared: ClassId, actual: ClassId },

    #[error("decrypted attributes are not a JSON object: {0}")]
    BadAttributes(String),
}

/// A fully decoded item, ready for the item store.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedItem {
    pub digest: ItemDigest,
    /// Declared protection-class attribute from the item group.
    pub declared_class: ClassId,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub secret_data: Vec<u8>,
    /// Class whose key actually unwrapped the item key.
    pub unwrapped_with: ClassId,
    /// Original metadata-key record (AKS wrapping and bag UUID pass through
    /// untouched; healing happens downstream).
    pub metadata_key: ItemMetadataKey,
}

/// Decrypt one item against the session keyring.
pub fn decrypt_item(
    provider: &dyn KeyProvider,
    keyring: &ClassKeyring,
    item: &EncodedItem,
) -> Result<DecodedItem, DecryptError> {
    // Blob framing is validated before any key is touched: a corrupt header
    // is a per-item failure no matter which classes unlocked.
    let attr_blob = EncryptedBlob::parse(&item.attributes)?;
    let data_blob = EncryptedBlob::parse(&item.secret_data)?;

    let mkey = &item.metadata_key;
    let wrapped = mkey.backup_wrapped_key.as_deref().ok_or(DecryptError::MissingBackupKey)?;

    let declared = mkey.keyclass;
    let actual = mkey.actual_keyclass;

    // Declared class first; the actual-class retry only exists for
    // reconciliation-eligible items.
    let mut candidates = vec![declared];
    if actual != declared {
        candidates.push(actual);
    }

    let mut tried_any_key = false;
    for class in candidates {
        let Some(class_key) = keyring.class_key(class) else {
            continue;
        };
        tried_any_key = true;

        let item_key = match provider.unwrap_key(wrapped, class_key.as_bytes()) {
            Ok(bytes) => ItemKey::from_bytes(bytes),
            Err(_) => {
                debug!(digest = %item.digest.short(), class = class.0, "item key unwrap failed");
                continue;
            }
        };

        let attr_plain = open_blob(&item_key, &item.digest, BlobRole::Attributes, &attr_blob);
        let data_plain = open_blob(&item_key, &item.digest, BlobRole::SecretData, &data_blob);
        let (attr_plain, secret_data) = match (attr_plain, data_plain) {
            (Some(a), Some(d)) => (a, d),
            _ => {
                debug!(digest = %item.digest.short(), class = class.0, "blob open failed");
                continue;
            }
        };

        let attributes = parse_attributes(&attr_plain)?;
        return Ok(DecodedItem {
            digest: item.digest,
            declared_class: item.class,
            attributes,
            secret_data,
            unwrapped_with: class,
            metadata_key: mkey.clone(),
        });
    }

    if tried_any_key {
        Err(DecryptError::Integrity { declared, actual })
    } else {
        Err(DecryptError::ClassUnavailable { declared, actual })
    }
}

/// AEAD-open one framed blob. `None` on authentication failure — the caller
/// decides whether another class key gets a turn.
fn open_blob(
    item_key: &ItemKey,
    digest: &ItemDigest,
    role: BlobRole,
    blob: &EncryptedBlob<'_>,
) -> Option<Vec<u8>> {
    // header validation guarantees ciphertext >= nonce + tag
    let (nonce_bytes, ciphertext) = blob.ciphertext.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(item_key.as_bytes().into());

    let aad = role.aad(digest);
    cipher.decrypt(nonce, Payload { msg: ciphertext, aad: &aad }).ok()
}

fn parse_attributes(
    plaintext: &[u8],
) -> Result<serde_json::Map<String, serde_json::Value>, DecryptError> {
    match serde_json::from_slice::<serde_json::Value>(plaintext) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(DecryptError::BadAttributes(format!(
            "expected object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(DecryptError::BadAttributes(e.to_string())),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyring::build_keyring;
    use crate::provider::StandardProvider;
    use crate::seal::{generate_class_key, generate_item_key, seal_blob, wrap_item_key};
    use kbr_codec::item_digest;
    use kbr_codec::ClassKeyEntry;
    use kbr_core::{Uuid16, WrapType};
    use secrecy::SecretString;

    fn plain_entry(class: u32, key: &crate::keys::ClassKey) -> ClassKeyEntry {
        ClassKeyEntry {
            uuid: Uuid16([class as u8; 16]),
            class: ClassId(class),
            wrap: WrapType::None,
            salt: None,
            iterations: None,
            wrapped_key: None,
            plain_key: Some(key.as_bytes().to_vec()),
        }
    }

    fn attrs_json() -> Vec<u8> {
        br#"{"svce":"test","acct":"alice","agrp":"com.example.app"}"#.to_vec()
    }

    /// Item whose key is wrapped under `wrap_class`'s key while the record
    /// declares `declared_class`.
    fn make_item(
        declared_class: u32,
        actual_class: u32,
        wrap_key_under: &crate::keys::ClassKey,
    ) -> EncodedItem {
        let attrs = attrs_json();
        let digest = item_digest(&attrs);
        let item_key = generate_item_key();
        EncodedItem {
            class: ClassId(declared_class),
            digest,
            metadata_key: ItemMetadataKey {
                keyclass: ClassId(declared_class),
                actual_keyclass: ClassId(actual_class),
                bag_uuid: Some(Uuid16([0xBB; 16])),
                aks_wrapped_key: None,
                backup_wrapped_key: Some(wrap_item_key(wrap_key_under, &item_key).unwrap()),
            },
            attributes: seal_blob(&item_key, &digest, BlobRole::Attributes, &attrs).unwrap(),
            secret_data: seal_blob(&item_key, &digest, BlobRole::SecretData, b"s3cret").unwrap(),
        }
    }

    fn keyring_with(entries: &[ClassKeyEntry]) -> ClassKeyring {
        build_keyring(entries, &SecretString::from(""), &StandardProvider)
    }

    #[test]
    fn consistent_item_decrypts_under_declared_class() {
        let k6 = generate_class_key();
        let keyring = keyring_with(&[plain_entry(6, &k6)]);
        let item = make_item(6, 6, &k6);

        let decoded = decrypt_item(&StandardProvider, &keyring, &item).unwrap();
        assert_eq!(decoded.unwrapped_with, ClassId(6));
        assert_eq!(decoded.attributes["acct"], "alice");
        assert_eq!(decoded.secret_data, b"s3cret");
    }

    #[test]
    fn mismatched_item_falls_back_to_actual_class() {
        let k6 = generate_class_key();
        let k9 = generate_class_key();
        let keyring = keyring_with(&[plain_entry(6, &k6), plain_entry(9, &k9)]);
        // declares class 6 but the key is really wrapped under class 9
        let item = make_item(6, 9, &k9);

        let decoded = decrypt_item(&StandardProvider, &keyring, &item).unwrap();
        assert_eq!(decoded.unwrapped_with, ClassId(9));
        assert!(!decoded.metadata_key.is_consistent());
    }

    #[test]
    fn mismatched_item_can_succeed_under_declared_class() {
        // the inverse defect: record says actual=9 but the wrap really used 6
        let k6 = generate_class_key();
        let keyring = keyring_with(&[plain_entry(6, &k6)]);
        let item = make_item(6, 9, &k6);

        let decoded = decrypt_item(&StandardProvider, &keyring, &item).unwrap();
        assert_eq!(decoded.unwrapped_with, ClassId(6));
    }

    #[test]
    fn locked_class_reports_unavailable() {
        let k6 = generate_class_key();
        let keyring = keyring_with(&[]);
        let item = make_item(6, 6, &k6);

        assert_eq!(
            decrypt_item(&StandardProvider, &keyring, &item),
            Err(DecryptError::ClassUnavailable { declared: ClassId(6), actual: ClassId(6) })
        );
    }

    #[test]
    fn wrong_key_reports_integrity_failure() {
        let real = generate_class_key();
        let imposter = generate_class_key();
        let keyring = keyring_with(&[plain_entry(6, &imposter)]);
        let item = make_item(6, 6, &real);

        assert_eq!(
            decrypt_item(&StandardProvider, &keyring, &item),
            Err(DecryptError::Integrity { declared: ClassId(6), actual: ClassId(6) })
        );
    }

    #[test]
    fn corrupt_blob_header_fails_before_any_key_is_used() {
        let k6 = generate_class_key();
        let keyring = keyring_with(&[plain_entry(6, &k6)]);
        let mut item = make_item(6, 6, &k6);
        item.secret_data[11] ^= 0x01; // flip a bit in the ciphertext-length field

        let err = decrypt_item(&StandardProvider, &keyring, &item).unwrap_err();
        assert!(matches!(err, DecryptError::Blob(_)), "{err:?}");
    }

    #[test]
    fn swapped_blob_roles_fail_authentication() {
        let k6 = generate_class_key();
        let keyring = keyring_with(&[plain_entry(6, &k6)]);
        let mut item = make_item(6, 6, &k6);
        std::mem::swap(&mut item.attributes, &mut item.secret_data);

        let err = decrypt_item(&StandardProvider, &keyring, &item).unwrap_err();
        assert!(matches!(err, DecryptError::Integrity { .. }), "{err:?}");
    }

    #[test]
    fn missing_backup_wrapping_is_typed() {
        let k6 = generate_class_key();
        let keyring = keyring_with(&[plain_entry(6, &k6)]);
        let mut item = make_item(6, 6, &k6);
        item.metadata_key.backup_wrapped_key = None;
        item.metadata_key.aks_wrapped_key = Some(vec![1, 2, 3]);

        assert_eq!(
            decrypt_item(&StandardProvider, &keyring, &item),
            Err(DecryptError::MissingBackupKey)
        );
    }
}
