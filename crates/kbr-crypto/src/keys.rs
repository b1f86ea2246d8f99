//! Key material newtypes and the symmetric wrap primitive.
//!
//! All three key roles are 256-bit, zeroized on drop, and never printed.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use kbr_core::{KEY_SIZE, NONCE_SIZE, WRAPPED_KEY_SIZE};

use crate::provider::IntegrityError;

/// KEK derived from the unlock passphrase; unwraps one class key.
#[derive(Clone)]
pub struct ClassKek {
    bytes: [u8; KEY_SIZE],
}

impl ClassKek {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ClassKek {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ClassKek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassKek").field("bytes", &"[REDACTED]").finish()
    }
}

/// Per-protection-class symmetric key.
#[derive(Clone)]
pub struct ClassKey {
    bytes: [u8; KEY_SIZE],
}

impl ClassKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ClassKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ClassKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// Per-item payload key, backup-wrapped under a class key.
#[derive(Clone)]
pub struct ItemKey {
    bytes: [u8; KEY_SIZE],
}

impl ItemKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ItemKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// Wrap a 256-bit key under `kek` with a random nonce.
///
/// Output: `[24-byte nonce][ciphertext + 16-byte tag]`, 72 bytes total.
pub(crate) fn wrap_raw(kek: &[u8; KEY_SIZE], key: &[u8; KEY_SIZE]) -> anyhow::Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(kek.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, key.as_ref())
        .map_err(|e| anyhow::anyhow!("key wrapping failed: {e}"))?;

    let mut out = Vec::with_capacity(WRAPPED_KEY_SIZE);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Unwrap the output of [`wrap_raw`]. Fails closed on any length or
/// authentication mismatch.
pub(crate) fn unwrap_raw(
    kek: &[u8; KEY_SIZE],
    wrapped: &[u8],
) -> Result<[u8; KEY_SIZE], IntegrityError> {
    if wrapped.len() != WRAPPED_KEY_SIZE {
        return Err(IntegrityError);
    }

    let (nonce_bytes, ciphertext) = wrapped.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(kek.into());

    let mut plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| IntegrityError)?;
    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(IntegrityError);
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&plaintext);
    plaintext.zeroize();
    Ok(key)
}
