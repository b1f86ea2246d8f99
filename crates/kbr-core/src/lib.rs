//! kbr-core: shared types and wire constants for the kbrestore workspace
//!
//! Everything here is consumed by at least two sibling crates; anything
//! specific to parsing, cryptography, or restore orchestration lives in
//! kbr-codec, kbr-crypto, or kbr-restore respectively.

pub mod types;

pub use types::{ClassId, ContainerType, ItemDigest, Uuid16, WrapType};

/// Size of a class or item key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a wrapped 256-bit key: `[24-byte nonce][32-byte key][16-byte tag]`
pub const WRAPPED_KEY_SIZE: usize = NONCE_SIZE + KEY_SIZE + TAG_SIZE;

/// AEAD expansion of an encrypted blob over its plaintext (nonce + tag)
pub const AEAD_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;

/// Fixed binary header in front of every encrypted item blob
pub const BLOB_HEADER_SIZE: usize = 16;

/// Recognized encrypted-blob format tag
pub const BLOB_FORMAT_V1: u32 = 1;

/// Upper bound on the per-entry KDF iteration count. A hostile envelope may
/// not spend more CPU than this per class key.
pub const MAX_KDF_ITERATIONS: u32 = 10_000_000;

/// Envelope versions this implementation decodes.
pub const RECOGNIZED_VERSIONS: [u32; 2] = [3, 4];
