//! kbr-codec: backup envelope container codec
//!
//! Wire grammar (everything big-endian):
//! ```text
//! field        = tag(4 ASCII bytes) length(u32) payload(length bytes)
//! container    = VERS TYPE UUID HMCK CKEY* ITEM*      (outer scope)
//! CKEY payload = UUID CLAS WRAP SALT ITER WPKY PBKY   (class-key scope)
//! ITEM payload = CLAS HASH MKEY ATTR DATA             (item scope)
//! MKEY payload = KCLS ACLS BGID AKWK BKWK             (metadata-key scope)
//! ```
//! Groups carry no end marker; a scope ends when its enclosing length is
//! exhausted. Unknown tags inside a recognized scope are skipped via their
//! length field and never interpreted.
//!
//! The parser performs no cryptography: `ATTR`/`DATA` payloads are carried as
//! opaque bytes and their 16-byte blob headers are validated later, by the
//! item decryptor, so that a corrupt blob fails one item instead of the
//! whole container.

pub mod blob;
pub mod envelope;
pub mod parse;
pub mod write;

pub use blob::{BlobError, BlobHeader, EncryptedBlob};
pub use envelope::{BackupEnvelope, ClassKeyEntry, EncodedItem, ItemMetadataKey};
pub use parse::{parse_envelope, ParseError, Tag};
pub use write::write_envelope;

use kbr_core::ItemDigest;

/// Stable item identity: BLAKE3 over the item's canonical attribute
/// plaintext. The writer stamps this into the `HASH` field; the item store
/// keys upserts by it.
pub fn item_digest(attr_plaintext: &[u8]) -> ItemDigest {
    ItemDigest(*blake3::hash(attr_plaintext).as_bytes())
}
