//! 32-byte identifiers.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::EncodingError;

/// Size of a [`Uid`] in bytes.
pub const UID_SIZE: usize = 32;

/// Opaque 32-byte identifier.
///
/// Used for protocol instance ids and device uids. Instance ids are drawn
/// from a cryptographically secure source by the engine; they double as a
/// weak shared secret between the participants of a protocol run.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Uid([u8; UID_SIZE]);

impl Uid {
    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; UID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse from a slice of exactly [`UID_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EncodingError> {
        let array: [u8; UID_SIZE] = bytes.try_into().map_err(|_| {
            EncodingError::InvalidLength { tag: crate::EncodedTag::Uid, length: bytes.len() }
        })?;
        Ok(Self(array))
    }

    /// Raw bytes.
    pub const fn as_bytes(&self) -> &[u8; UID_SIZE] {
        &self.0
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are enough to tell uids apart in logs.
        write!(f, "Uid({}..)", hex::encode(&self.0[..8]))
    }
}

impl Serialize for Uid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct UidVisitor;

        impl<'de> de::Visitor<'de> for UidVisitor {
            type Value = Uid;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{UID_SIZE} bytes")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Uid, E> {
                Uid::from_slice(v).map_err(E::custom)
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Uid, A::Error> {
                let mut bytes = [0u8; UID_SIZE];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    *byte = seq.next_element()?.ok_or_else(|| de::Error::invalid_length(i, &self))?;
                }
                Ok(Uid(bytes))
            }
        }

        deserializer.deserialize_bytes(UidVisitor)
    }
}
