//! Writer-side sealing: the exact mirror of the unwrap/decrypt path.
//!
//! Used by round-trip tests and the CLI fixture generator; the production
//! backup writer lives elsewhere. Errors here are writer-side programmer
//! errors, not untrusted-input failures, so they stay `anyhow`.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use kbr_codec::blob::encode_blob;
use kbr_core::{ItemDigest, KEY_SIZE, NONCE_SIZE};

use crate::item::BlobRole;
use crate::keys::{wrap_raw, ClassKek, ClassKey, ItemKey};

/// Generate a random 256-bit class key.
pub fn generate_class_key() -> ClassKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    ClassKey::from_bytes(bytes)
}

/// Generate a random 256-bit item key.
pub fn generate_item_key() -> ItemKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    ItemKey::from_bytes(bytes)
}

/// Wrap a class key under a passphrase-derived KEK (`WPKY` payload).
pub fn wrap_class_key(kek: &ClassKek, class_key: &ClassKey) -> anyhow::Result<Vec<u8>> {
    wrap_raw(kek.as_bytes(), class_key.as_bytes())
}

/// Wrap an item key under its class key (`BKWK` payload).
pub fn wrap_item_key(class_key: &ClassKey, item_key: &ItemKey) -> anyhow::Result<Vec<u8>> {
    wrap_raw(class_key.as_bytes(), item_key.as_bytes())
}

/// Seal one blob: AEAD-encrypt `plaintext` under the item key, binding the
/// item digest and blob role as AAD, then frame it with the 16-byte header.
pub fn seal_blob(
    item_key: &ItemKey,
    digest: &ItemDigest,
    role: BlobRole,
    plaintext: &[u8],
) -> anyhow::Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(item_key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let aad = role.aad(digest);
    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &aad })
        .map_err(|e| anyhow::anyhow!("blob sealing failed: {e}"))?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(encode_blob(&sealed))
}
