//! Encrypted item blob framing.
//!
//! Every `ATTR`/`DATA` payload starts with a 16-byte header:
//! ```text
//! [u32 BE: format tag][u32 BE: reserved flags][u32 BE: ciphertext len][u32 BE: plaintext len]
//! ```
//! followed by `ciphertext len` bytes of AEAD output (`[24-byte nonce]
//! [ciphertext][16-byte tag]`). All four header fields are validated before
//! the remainder is treated as ciphertext; the two length fields must agree
//! with the actual byte count and with the AEAD expansion.

use thiserror::Error;

use kbr_core::{AEAD_OVERHEAD, BLOB_FORMAT_V1, BLOB_HEADER_SIZE};

/// Fixed header in front of every encrypted blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub format: u32,
    pub flags: u32,
    pub ciphertext_len: u32,
    pub plaintext_len: u32,
}

/// A validated blob: header plus the exact ciphertext it declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob<'a> {
    pub header: BlobHeader,
    pub ciphertext: &'a [u8],
}

/// Blob framing failure. Item-scoped: fails one item, never the container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("blob shorter than its {}-byte header: {got} bytes", BLOB_HEADER_SIZE)]
    TooShort { got: usize },

    #[error("unsupported blob format tag {format}")]
    UnsupportedFormat { format: u32 },

    #[error("reserved blob flags must be zero, got {flags:#x}")]
    NonZeroFlags { flags: u32 },

    #[error("blob declares {declared} ciphertext bytes but carries {actual}")]
    CiphertextLenMismatch { declared: u32, actual: usize },

    #[error("blob plaintext length {plaintext} inconsistent with ciphertext length {ciphertext}")]
    PlaintextLenMismatch { plaintext: u32, ciphertext: u32 },
}

impl<'a> EncryptedBlob<'a> {
    /// Validate the header and split off the ciphertext. Nothing is copied.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, BlobError> {
        if bytes.len() < BLOB_HEADER_SIZE {
            return Err(BlobError::TooShort { got: bytes.len() });
        }
        let word = |i: usize| u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let header = BlobHeader {
            format: word(0),
            flags: word(4),
            ciphertext_len: word(8),
            plaintext_len: word(12),
        };

        if header.format != BLOB_FORMAT_V1 {
            return Err(BlobError::UnsupportedFormat { format: header.format });
        }
        if header.flags != 0 {
            return Err(BlobError::NonZeroFlags { flags: header.flags });
        }

        let ciphertext = &bytes[BLOB_HEADER_SIZE..];
        if header.ciphertext_len as usize != ciphertext.len() {
            return Err(BlobError::CiphertextLenMismatch {
                declared: header.ciphertext_len,
                actual: ciphertext.len(),
            });
        }
        let expected_plaintext =
            (header.ciphertext_len as usize).checked_sub(AEAD_OVERHEAD);
        if expected_plaintext != Some(header.plaintext_len as usize) {
            return Err(BlobError::PlaintextLenMismatch {
                plaintext: header.plaintext_len,
                ciphertext: header.ciphertext_len,
            });
        }

        Ok(Self { header, ciphertext })
    }
}

/// Frame AEAD output into a blob: header + ciphertext. Writer-side mirror of
/// [`EncryptedBlob::parse`].
pub fn encode_blob(ciphertext: &[u8]) -> Vec<u8> {
    let plaintext_len = ciphertext.len().saturating_sub(AEAD_OVERHEAD);
    let mut out = Vec::with_capacity(BLOB_HEADER_SIZE + ciphertext.len());
    out.extend_from_slice(&BLOB_FORMAT_V1.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
    out.extend_from_slice(&(plaintext_len as u32).to_be_bytes());
    out.extend_from_slice(ciphertext);
    out
}
