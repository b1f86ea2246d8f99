//! Mirror writer for the envelope container.
//!
//! Encoding exists to the extent parser/writer symmetry matters: round-trip
//! tests, fixture generation, and the CLI's test-vector path. Fields are
//! emitted in canonical scope order; optional fields are omitted, never
//! zero-filled.

use crate::envelope::{BackupEnvelope, ClassKeyEntry, EncodedItem, ItemMetadataKey};
use crate::parse::Tag;

fn put_field(out: &mut Vec<u8>, tag: Tag, payload: &[u8]) {
    out.extend_from_slice(&tag.0);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
}

fn put_u32(out: &mut Vec<u8>, tag: Tag, value: u32) {
    put_field(out, tag, &value.to_be_bytes());
}

/// Encode an envelope to container bytes. Mirror of
/// [`crate::parse::parse_envelope`]: `parse(write(e)) == e` for any envelope
/// satisfying the documented shape invariants.
pub fn write_envelope(env: &BackupEnvelope) -> Vec<u8> {
    let mut out = Vec::new();
    put_u32(&mut out, Tag::VERS, env.version);
    put_u32(&mut out, Tag::TYPE, env.container_type.to_wire());
    put_field(&mut out, Tag::UUID, env.uuid.as_bytes());
    put_field(&mut out, Tag::HMCK, &env.integrity_key);
    for entry in &env.class_keys {
        put_field(&mut out, Tag::CKEY, &write_class_key(entry));
    }
    for item in &env.items {
        put_field(&mut out, Tag::ITEM, &write_item(item));
    }
    out
}

fn write_class_key(entry: &ClassKeyEntry) -> Vec<u8> {
    let mut out = Vec::new();
    put_field(&mut out, Tag::UUID, entry.uuid.as_bytes());
    put_u32(&mut out, Tag::CLAS, entry.class.0);
    put_u32(&mut out, Tag::WRAP, entry.wrap.to_wire());
    if let Some(salt) = &entry.salt {
        put_field(&mut out, Tag::SALT, salt);
    }
    if let Some(iterations) = entry.iterations {
        put_u32(&mut out, Tag::ITER, iterations);
    }
    if let Some(wrapped) = &entry.wrapped_key {
        put_field(&mut out, Tag::WPKY, wrapped);
    }
    if let Some(plain) = &entry.plain_key {
        put_field(&mut out, Tag::PBKY, plain);
    }
    out
}

fn write_item(item: &EncodedItem) -> Vec<u8> {
    let mut out = Vec::new();
    put_u32(&mut out, Tag::CLAS, item.class.0);
    put_field(&mut out, Tag::HASH, item.digest.as_bytes());
    put_field(&mut out, Tag::MKEY, &write_metadata_key(&item.metadata_key));
    put_field(&mut out, Tag::ATTR, &item.attributes);
    put_field(&mut out, Tag::DATA, &item.secret_data);
    out
}

fn write_metadata_key(mkey: &ItemMetadataKey) -> Vec<u8> {
    let mut out = Vec::new();
    put_u32(&mut out, Tag::KCLS, mkey.keyclass.0);
    put_u32(&mut out, Tag::ACLS, mkey.actual_keyclass.0);
    if let Some(bag_uuid) = &mkey.bag_uuid {
        put_field(&mut out, Tag::BGID, bag_uuid.as_bytes());
    }
    if let Some(aks) = &mkey.aks_wrapped_key {
        put_field(&mut out, Tag::AKWK, aks);
    }
    if let Some(backup) = &mkey.backup_wrapped_key {
        put_field(&mut out, Tag::BKWK, backup);
    }
    out
}
