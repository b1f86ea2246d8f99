use std::fmt;

use serde::{Serialize, Serializer};

/// Protection-class identifier.
///
/// Small integers; numerically higher classes are created first and appear
/// first in the envelope stream. The codec treats the value as opaque beyond
/// that ordering convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClassId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {}", self.0)
    }
}

/// How a class-key entry's key material is protected inside the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WrapType {
    /// Always-available class: the plaintext key travels in the envelope.
    None,
    /// Key wrapped under a KEK derived from the unlock passphrase.
    Passphrase,
    /// Key wrapped to an asymmetric recipient; unwrapping needs an external
    /// collaborator the restore path does not have.
    Asymmetric,
}

impl WrapType {
    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(WrapType::None),
            1 => Some(WrapType::Passphrase),
            2 => Some(WrapType::Asymmetric),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            WrapType::None => 0,
            WrapType::Passphrase => 1,
            WrapType::Asymmetric => 2,
        }
    }
}

/// Envelope container type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    Full,
    Incremental,
}

impl ContainerType {
    pub fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(ContainerType::Full),
            1 => Some(ContainerType::Incremental),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            ContainerType::Full => 0,
            ContainerType::Incremental => 1,
        }
    }
}

/// A 16-byte UUID wire field (container, class-key entry, or key-bag).
///
/// Kept as raw bytes: the codec never generates or interprets UUIDs, it only
/// round-trips them.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid16(pub [u8; 16]);

impl Uuid16 {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12],
            b[13], b[14], b[15]
        )
    }
}

impl fmt::Debug for Uuid16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uuid16({self})")
    }
}

impl Serialize for Uuid16 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Stable 32-byte item identity (BLAKE3 of the item's canonical attribute
/// plaintext). Upserts into the item store are keyed by this digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemDigest(pub [u8; 32]);

impl ItemDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ItemDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ItemDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemDigest({})", self.short())
    }
}

impl Serialize for ItemDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
