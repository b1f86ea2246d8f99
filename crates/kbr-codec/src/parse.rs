//! Single-pass TLV parser.
//!
//! Every length field is validated against the remaining bytes of its scope
//! before anything is sliced; offset arithmetic is checked. A parse failure
//! reports the absolute byte offset and, where known, the tag under which it
//! occurred.

use std::fmt;

use thiserror::Error;

use kbr_core::{
    ClassId, ContainerType, ItemDigest, Uuid16, WrapType, KEY_SIZE, MAX_KDF_ITERATIONS,
    RECOGNIZED_VERSIONS, WRAPPED_KEY_SIZE,
};

use crate::envelope::{BackupEnvelope, ClassKeyEntry, EncodedItem, ItemMetadataKey};

/// A 4-byte ASCII field tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    pub const VERS: Tag = Tag(*b"VERS");
    pub const TYPE: Tag = Tag(*b"TYPE");
    pub const UUID: Tag = Tag(*b"UUID");
    pub const HMCK: Tag = Tag(*b"HMCK");
    pub const CKEY: Tag = Tag(*b"CKEY");
    pub const ITEM: Tag = Tag(*b"ITEM");

    pub const CLAS: Tag = Tag(*b"CLAS");
    pub const WRAP: Tag = Tag(*b"WRAP");
    pub const SALT: Tag = Tag(*b"SALT");
    pub const ITER: Tag = Tag(*b"ITER");
    pub const WPKY: Tag = Tag(*b"WPKY");
    pub const PBKY: Tag = Tag(*b"PBKY");

    pub const HASH: Tag = Tag(*b"HASH");
    pub const MKEY: Tag = Tag(*b"MKEY");
    pub const ATTR: Tag = Tag(*b"ATTR");
    pub const DATA: Tag = Tag(*b"DATA");

    pub const KCLS: Tag = Tag(*b"KCLS");
    pub const ACLS: Tag = Tag(*b"ACLS");
    pub const BGID: Tag = Tag(*b"BGID");
    pub const AKWK: Tag = Tag(*b"AKWK");
    pub const BKWK: Tag = Tag(*b"BKWK");
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.iter().all(|b| b.is_ascii_graphic()) {
            for b in &self.0 {
                write!(f, "{}", *b as char)?;
            }
            Ok(())
        } else {
            write!(f, "0x{:02x}{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2], self.0[3])
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({self})")
    }
}

/// Structured parse failure. All variants are fatal for the container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("truncated container at offset {offset}: need {need} bytes, {have} available")]
    Truncated { offset: usize, need: usize, have: usize },

    #[error("length of {tag} at offset {offset} exceeds its enclosing scope")]
    LengthOverflow { tag: Tag, offset: usize },

    #[error("unrecognized envelope version {version}")]
    UnknownVersion { version: u32 },

    #[error("unrecognized container type {raw}")]
    UnknownContainerType { raw: u32 },

    #[error("unrecognized wrap type {raw} at offset {offset}")]
    UnknownWrapType { raw: u32, offset: usize },

    #[error("{tag} at offset {offset}: expected {expected}-byte payload, got {got}")]
    BadFieldSize { tag: Tag, offset: usize, expected: usize, got: usize },

    #[error("duplicate {tag} at offset {offset}")]
    DuplicateField { tag: Tag, offset: usize },

    #[error("missing {tag} in {scope} scope ending at offset {offset}")]
    MissingField { tag: Tag, scope: &'static str, offset: usize },

    #[error("duplicate class-key entry for {class}")]
    DuplicateClass { class: ClassId },

    #[error("iteration count {count} at offset {offset} outside 1..={}", MAX_KDF_ITERATIONS)]
    BadIterationCount { count: u32, offset: usize },

    #[error("class-key entry for {class}: {reason}")]
    InvalidClassKey { class: ClassId, reason: &'static str },

    #[error("metadata key group at offset {offset}: {reason}")]
    InvalidMetadataKey { offset: usize, reason: &'static str },
}

/// One decoded field: tag, payload slice, absolute offset of the tag byte.
struct Field<'a> {
    tag: Tag,
    payload: &'a [u8],
    offset: usize,
}

/// Iterates fields within one scope. `base` is the absolute offset of
/// `buf[0]` in the whole container so errors report real positions.
struct FieldReader<'a> {
    buf: &'a [u8],
    base: usize,
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8], base: usize) -> Self {
        Self { buf, base, pos: 0 }
    }

    /// Absolute offset one past the end of this scope.
    fn scope_end(&self) -> usize {
        self.base + self.buf.len()
    }

    fn next(&mut self) -> Result<Option<Field<'a>>, ParseError> {
        if self.pos == self.buf.len() {
            return Ok(None);
        }
        let offset = self.base + self.pos;
        let have = self.buf.len() - self.pos;
        if have < 8 {
            return Err(ParseError::Truncated { offset, need: 8, have });
        }
        let tag = Tag([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        let len = u32::from_be_bytes([
            self.buf[self.pos + 4],
            self.buf[self.pos + 5],
            self.buf[self.pos + 6],
            self.buf[self.pos + 7],
        ]) as usize;
        let start = self.pos + 8;
        let end = match start.checked_add(len) {
            Some(end) if end <= self.buf.len() => end,
            _ => return Err(ParseError::LengthOverflow { tag, offset }),
        };
        let payload = &self.buf[start..end];
        self.pos = end;
        Ok(Some(Field { tag, payload, offset }))
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, field: &Field<'_>) -> Result<(), ParseError> {
    if slot.is_some() {
        return Err(ParseError::DuplicateField { tag: field.tag, offset: field.offset });
    }
    *slot = Some(value);
    Ok(())
}

fn read_u32(field: &Field<'_>) -> Result<u32, ParseError> {
    let payload: &[u8; 4] =
        field.payload.try_into().map_err(|_| ParseError::BadFieldSize {
            tag: field.tag,
            offset: field.offset,
            expected: 4,
            got: field.payload.len(),
        })?;
    Ok(u32::from_be_bytes(*payload))
}

fn read_uuid(field: &Field<'_>) -> Result<Uuid16, ParseError> {
    let payload: &[u8; 16] =
        field.payload.try_into().map_err(|_| ParseError::BadFieldSize {
            tag: field.tag,
            offset: field.offset,
            expected: 16,
            got: field.payload.len(),
        })?;
    Ok(Uuid16(*payload))
}

fn read_digest(field: &Field<'_>) -> Result<ItemDigest, ParseError> {
    let payload: &[u8; 32] =
        field.payload.try_into().map_err(|_| ParseError::BadFieldSize {
            tag: field.tag,
            offset: field.offset,
            expected: 32,
            got: field.payload.len(),
        })?;
    Ok(ItemDigest(*payload))
}

fn missing(tag: Tag, scope: &'static str, offset: usize) -> ParseError {
    ParseError::MissingField { tag, scope, offset }
}

/// Decode a backup envelope from an immutable byte slice.
///
/// Single pass, no cryptography, no allocation proportional to anything but
/// the declared (validated) lengths.
pub fn parse_envelope(buf: &[u8]) -> Result<BackupEnvelope, ParseError> {
    let mut reader = FieldReader::new(buf, 0);

    let mut version = None;
    let mut container_type = None;
    let mut uuid = None;
    let mut integrity_key = None;
    let mut class_keys: Vec<ClassKeyEntry> = Vec::new();
    let mut items = Vec::new();

    while let Some(field) = reader.next()? {
        match field.tag {
            Tag::VERS => {
                let v = read_u32(&field)?;
                if !RECOGNIZED_VERSIONS.contains(&v) {
                    return Err(ParseError::UnknownVersion { version: v });
                }
                set_once(&mut version, v, &field)?;
            }
            Tag::TYPE => {
                let raw = read_u32(&field)?;
                let ct = ContainerType::from_wire(raw)
                    .ok_or(ParseError::UnknownContainerType { raw })?;
                set_once(&mut container_type, ct, &field)?;
            }
            Tag::UUID => {
                let u = read_uuid(&field)?;
                set_once(&mut uuid, u, &field)?;
            }
            Tag::HMCK => {
                set_once(&mut integrity_key, field.payload.to_vec(), &field)?;
            }
            Tag::CKEY => {
                let entry = parse_class_key(field.payload, field.offset + 8)?;
                if class_keys.iter().any(|e| e.class == entry.class) {
                    return Err(ParseError::DuplicateClass { class: entry.class });
                }
                class_keys.push(entry);
            }
            Tag::ITEM => {
                items.push(parse_item(field.payload, field.offset + 8)?);
            }
            // Forward compatibility: unknown tags are skipped via their
            // (already validated) length.
            _ => {}
        }
    }

    let end = buf.len();
    Ok(BackupEnvelope {
        version: version.ok_or_else(|| missing(Tag::VERS, "container", end))?,
        container_type: container_type.ok_or_else(|| missing(Tag::TYPE, "container", end))?,
        uuid: uuid.ok_or_else(|| missing(Tag::UUID, "container", end))?,
        integrity_key: integrity_key.ok_or_else(|| missing(Tag::HMCK, "container", end))?,
        class_keys,
        items,
    })
}

fn parse_class_key(buf: &[u8], base: usize) -> Result<ClassKeyEntry, ParseError> {
    let mut reader = FieldReader::new(buf, base);
    let scope_end = reader.scope_end();

    let mut uuid = None;
    let mut class = None;
    let mut wrap = None;
    let mut salt = None;
    let mut iterations = None;
    let mut wrapped_key = None;
    let mut plain_key = None;

    while let Some(field) = reader.next()? {
        match field.tag {
            Tag::UUID => {
                let u = read_uuid(&field)?;
                set_once(&mut uuid, u, &field)?;
            }
            Tag::CLAS => {
                let c = ClassId(read_u32(&field)?);
                set_once(&mut class, c, &field)?;
            }
            Tag::WRAP => {
                let raw = read_u32(&field)?;
                let w = WrapType::from_wire(raw)
                    .ok_or(ParseError::UnknownWrapType { raw, offset: field.offset })?;
                set_once(&mut wrap, w, &field)?;
            }
            Tag::SALT => {
                set_once(&mut salt, field.payload.to_vec(), &field)?;
            }
            Tag::ITER => {
                let count = read_u32(&field)?;
                if count == 0 || count > MAX_KDF_ITERATIONS {
                    return Err(ParseError::BadIterationCount { count, offset: field.offset });
                }
                set_once(&mut iterations, count, &field)?;
            }
            Tag::WPKY => {
                set_once(&mut wrapped_key, field.payload.to_vec(), &field)?;
            }
            Tag::PBKY => {
                set_once(&mut plain_key, field.payload.to_vec(), &field)?;
            }
            _ => {}
        }
    }

    let entry = ClassKeyEntry {
        uuid: uuid.ok_or_else(|| missing(Tag::UUID, "CKEY", scope_end))?,
        class: class.ok_or_else(|| missing(Tag::CLAS, "CKEY", scope_end))?,
        wrap: wrap.ok_or_else(|| missing(Tag::WRAP, "CKEY", scope_end))?,
        salt,
        iterations,
        wrapped_key,
        plain_key,
    };
    validate_class_key(&entry)?;
    Ok(entry)
}

/// Per-wrap-type shape of a class-key entry. The container is untrusted, so
/// anything outside the expected shape is rejected rather than ignored.
fn validate_class_key(entry: &ClassKeyEntry) -> Result<(), ParseError> {
    let fail = |reason| ParseError::InvalidClassKey { class: entry.class, reason };
    match entry.wrap {
        WrapType::Passphrase => {
            match &entry.salt {
                None => return Err(fail("missing derivation salt")),
                Some(salt) if salt.is_empty() => return Err(fail("empty derivation salt")),
                Some(_) => {}
            }
            if entry.iterations.is_none() {
                return Err(fail("missing iteration count"));
            }
            match &entry.wrapped_key {
                None => return Err(fail("missing wrapped key")),
                Some(wk) if wk.len() != WRAPPED_KEY_SIZE => {
                    return Err(fail("wrapped key length does not match the wrap algorithm"))
                }
                Some(_) => {}
            }
            if entry.plain_key.is_some() {
                return Err(fail("plaintext key on a passphrase-wrapped entry"));
            }
        }
        WrapType::None => {
            match &entry.plain_key {
                None => return Err(fail("missing plaintext key")),
                Some(pk) if pk.len() != KEY_SIZE => {
                    return Err(fail("plaintext key must be 32 bytes"))
                }
                Some(_) => {}
            }
            if entry.salt.is_some() || entry.iterations.is_some() || entry.wrapped_key.is_some() {
                return Err(fail("derivation fields on an unwrapped entry"));
            }
        }
        WrapType::Asymmetric => {
            match &entry.wrapped_key {
                None => return Err(fail("missing wrapped key")),
                Some(wk) if wk.is_empty() => return Err(fail("empty wrapped key")),
                Some(_) => {}
            }
            if entry.salt.is_some() || entry.iterations.is_some() || entry.plain_key.is_some() {
                return Err(fail("unexpected fields on an asymmetric entry"));
            }
        }
    }
    Ok(())
}

fn parse_item(buf: &[u8], base: usize) -> Result<EncodedItem, ParseError> {
    let mut reader = FieldReader::new(buf, base);
    let scope_end = reader.scope_end();

    let mut class = None;
    let mut digest = None;
    let mut metadata_key = None;
    let mut attributes = None;
    let mut secret_data = None;

    while let Some(field) = reader.next()? {
        match field.tag {
            Tag::CLAS => {
                let c = ClassId(read_u32(&field)?);
                set_once(&mut class, c, &field)?;
            }
            Tag::HASH => {
                let d = read_digest(&field)?;
                set_once(&mut digest, d, &field)?;
            }
            Tag::MKEY => {
                let mk = parse_metadata_key(field.payload, field.offset + 8)?;
                set_once(&mut metadata_key, mk, &field)?;
            }
            // Blob payloads stay opaque here; their 16-byte headers are
            // validated by the decryptor so a corrupt blob fails one item,
            // not the container.
            Tag::ATTR => {
                set_once(&mut attributes, field.payload.to_vec(), &field)?;
            }
            Tag::DATA => {
                set_once(&mut secret_data, field.payload.to_vec(), &field)?;
            }
            _ => {}
        }
    }

    Ok(EncodedItem {
        class: class.ok_or_else(|| missing(Tag::CLAS, "ITEM", scope_end))?,
        digest: digest.ok_or_else(|| missing(Tag::HASH, "ITEM", scope_end))?,
        metadata_key: metadata_key.ok_or_else(|| missing(Tag::MKEY, "ITEM", scope_end))?,
        attributes: attributes.ok_or_else(|| missing(Tag::ATTR, "ITEM", scope_end))?,
        secret_data: secret_data.ok_or_else(|| missing(Tag::DATA, "ITEM", scope_end))?,
    })
}

fn parse_metadata_key(buf: &[u8], base: usize) -> Result<ItemMetadataKey, ParseError> {
    let mut reader = FieldReader::new(buf, base);
    let scope_end = reader.scope_end();

    let mut keyclass = None;
    let mut actual_keyclass = None;
    let mut bag_uuid = None;
    let mut aks_wrapped_key = None;
    let mut backup_wrapped_key = None;

    while let Some(field) = reader.next()? {
        match field.tag {
            Tag::KCLS => {
                let c = ClassId(read_u32(&field)?);
                set_once(&mut keyclass, c, &field)?;
            }
            Tag::ACLS => {
                let c = ClassId(read_u32(&field)?);
                set_once(&mut actual_keyclass, c, &field)?;
            }
            Tag::BGID => {
                let u = read_uuid(&field)?;
                set_once(&mut bag_uuid, u, &field)?;
            }
            Tag::AKWK => {
                if field.payload.is_empty() {
                    return Err(ParseError::InvalidMetadataKey {
                        offset: field.offset,
                        reason: "empty AKS-wrapped key",
                    });
                }
                set_once(&mut aks_wrapped_key, field.payload.to_vec(), &field)?;
            }
            Tag::BKWK => {
                if field.payload.len() != WRAPPED_KEY_SIZE {
                    return Err(ParseError::InvalidMetadataKey {
                        offset: field.offset,
                        reason: "backup-wrapped key length does not match the wrap algorithm",
                    });
                }
                set_once(&mut backup_wrapped_key, field.payload.to_vec(), &field)?;
            }
            _ => {}
        }
    }

    if aks_wrapped_key.is_none() && backup_wrapped_key.is_none() {
        return Err(ParseError::InvalidMetadataKey {
            offset: base,
            reason: "no wrapped key material",
        });
    }

    Ok(ItemMetadataKey {
        keyclass: keyclass.ok_or_else(|| missing(Tag::KCLS, "MKEY", scope_end))?,
        actual_keyclass: actual_keyclass.ok_or_else(|| missing(Tag::ACLS, "MKEY", scope_end))?,
        bag_uuid,
        aks_wrapped_key,
        backup_wrapped_key,
    })
}
