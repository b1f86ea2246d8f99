//! KDF and key-unwrap seam.
//!
//! The restore core treats key derivation and key unwrap as black boxes
//! (external collaborators may supply constant-time or hardware-backed
//! implementations). [`StandardProvider`] is the software default.

use pbkdf2::pbkdf2_hmac;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

use kbr_core::KEY_SIZE;

use crate::keys::{unwrap_raw, ClassKek};

/// Authentication failure while unwrapping a key. Deliberately carries no
/// detail: wrong KEK and corrupted ciphertext are indistinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("integrity check failed while unwrapping a key")]
pub struct IntegrityError;

/// Key derivation + key unwrap primitives.
///
/// Both operations must be deterministic for fixed inputs; `derive_key` is
/// expected to be expensive in proportion to `iterations` (the parser bounds
/// the count before it ever reaches a provider).
pub trait KeyProvider: Send + Sync {
    /// Derive a KEK from the unlock secret and an entry's salt/iterations.
    fn derive_key(&self, secret: &SecretString, salt: &[u8], iterations: u32) -> ClassKek;

    /// Unwrap `wrapped` (`[nonce][ciphertext][tag]`) under `kek`.
    fn unwrap_key(
        &self,
        wrapped: &[u8],
        kek: &[u8; KEY_SIZE],
    ) -> Result<[u8; KEY_SIZE], IntegrityError>;
}

/// Software provider: PBKDF2-HMAC-SHA256 derivation, XChaCha20-Poly1305
/// unwrap.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardProvider;

impl KeyProvider for StandardProvider {
    fn derive_key(&self, secret: &SecretString, salt: &[u8], iterations: u32) -> ClassKek {
        let mut kek = [0u8; KEY_SIZE];
        pbkdf2_hmac::<Sha256>(secret.expose_secret().as_bytes(), salt, iterations, &mut kek);
        ClassKek::from_bytes(kek)
    }

    fn unwrap_key(
        &self,
        wrapped: &[u8],
        kek: &[u8; KEY_SIZE],
    ) -> Result<[u8; KEY_SIZE], IntegrityError> {
        unwrap_raw(kek, wrapped)
    }
}
