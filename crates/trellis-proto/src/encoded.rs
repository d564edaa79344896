//! Self-describing tag-length-value codec.
//!
//! Every value is `tag (1 byte) || length (4 bytes, big-endian) || content`.
//! Containers (lists, dictionaries) hold complete encoded values as content,
//! so a decoder can skip any value without understanding it.
//!
//! # Invariants
//!
//! - Canonical dictionaries: keys are strictly increasing byte strings, so a
//!   value has exactly one encoding
//! - Bounded decoding: every length is checked against the remaining input
//!   before it is used, and nesting is limited to [`MAX_DEPTH`]

use std::collections::BTreeMap;

use bytes::BufMut;

use crate::{EncodingError, Uid, uid::UID_SIZE};

/// Maximum nesting of lists and dictionaries accepted by the decoder.
pub const MAX_DEPTH: usize = 16;

/// Size of the tag + length prefix.
const HEADER_SIZE: usize = 5;

/// Type tag of an [`Encoded`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncodedTag {
    /// Raw bytes.
    Bytes = 0x00,
    /// Unsigned 64-bit integer, 8 bytes big-endian.
    Int = 0x01,
    /// Boolean, one byte.
    Bool = 0x02,
    /// 32-byte identifier.
    Uid = 0x03,
    /// UTF-8 string.
    Str = 0x04,
    /// Sequence of encoded values.
    List = 0x05,
    /// Ordered mapping of byte-string keys to encoded values.
    Dict = 0x06,
    /// Big unsigned integer, big-endian.
    BigUint = 0x80,
}

impl EncodedTag {
    /// Parse a tag byte.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0x00 => Some(Self::Bytes),
            0x01 => Some(Self::Int),
            0x02 => Some(Self::Bool),
            0x03 => Some(Self::Uid),
            0x04 => Some(Self::Str),
            0x05 => Some(Self::List),
            0x06 => Some(Self::Dict),
            0x80 => Some(Self::BigUint),
            _ => None,
        }
    }
}

/// A decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Unsigned integer.
    Int(u64),
    /// Boolean.
    Bool(bool),
    /// Identifier.
    Uid(Uid),
    /// UTF-8 string.
    Str(String),
    /// Sequence of values.
    List(Vec<Encoded>),
    /// Ordered mapping keyed by byte strings (single-byte tags for keys).
    Dict(BTreeMap<Vec<u8>, Encoded>),
    /// Big-endian magnitude of a big unsigned integer.
    ///
    /// The encoder keeps the length chosen by the producer (keys use the
    /// fixed byte size of the curve modulus).
    BigUint(Vec<u8>),
}

impl Encoded {
    /// Build a dictionary from `(key, value)` pairs.
    pub fn dict<K, I>(entries: I) -> Self
    where
        K: Into<Vec<u8>>,
        I: IntoIterator<Item = (K, Encoded)>,
    {
        Self::Dict(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Type tag of this value.
    pub fn tag(&self) -> EncodedTag {
        match self {
            Self::Bytes(_) => EncodedTag::Bytes,
            Self::Int(_) => EncodedTag::Int,
            Self::Bool(_) => EncodedTag::Bool,
            Self::Uid(_) => EncodedTag::Uid,
            Self::Str(_) => EncodedTag::Str,
            Self::List(_) => EncodedTag::List,
            Self::Dict(_) => EncodedTag::Dict,
            Self::BigUint(_) => EncodedTag::BigUint,
        }
    }

    /// Encode into `dst`.
    ///
    /// # Errors
    ///
    /// Returns `EncodingError::TooLarge` if some content exceeds `u32::MAX`
    /// bytes.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), EncodingError> {
        let content = self.content()?;
        let length =
            u32::try_from(content.len()).map_err(|_| EncodingError::TooLarge(content.len()))?;
        dst.put_u8(self.tag() as u8);
        dst.put_u32(length);
        dst.put_slice(&content);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    fn content(&self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::new();
        match self {
            Self::Bytes(bytes) | Self::BigUint(bytes) => buf.put_slice(bytes),
            Self::Int(value) => buf.put_u64(*value),
            Self::Bool(value) => buf.put_u8(u8::from(*value)),
            Self::Uid(uid) => buf.put_slice(uid.as_bytes()),
            Self::Str(s) => buf.put_slice(s.as_bytes()),
            Self::List(items) => {
                for item in items {
                    item.encode(&mut buf)?;
                }
            },
            Self::Dict(entries) => {
                for (key, value) in entries {
                    Self::Bytes(key.clone()).encode(&mut buf)?;
                    value.encode(&mut buf)?;
                }
            },
        }
        Ok(buf)
    }

    /// Decode exactly one value spanning all of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns `EncodingError` on malformed input or trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, EncodingError> {
        let (value, rest) = decode_one(bytes, 0)?;
        if !rest.is_empty() {
            return Err(EncodingError::TrailingBytes(rest.len()));
        }
        Ok(value)
    }

    fn unexpected(&self, expected: EncodedTag) -> EncodingError {
        EncodingError::UnexpectedType { expected, found: self.tag() }
    }

    /// Borrow the content of a `Bytes` value.
    pub fn as_bytes(&self) -> Result<&[u8], EncodingError> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            other => Err(other.unexpected(EncodedTag::Bytes)),
        }
    }

    /// Value of an `Int`.
    pub fn as_int(&self) -> Result<u64, EncodingError> {
        match self {
            Self::Int(value) => Ok(*value),
            other => Err(other.unexpected(EncodedTag::Int)),
        }
    }

    /// Value of an `Int` that must fit in a `u8`.
    pub fn as_u8(&self) -> Result<u8, EncodingError> {
        let value = self.as_int()?;
        u8::try_from(value).map_err(|_| EncodingError::IntegerOutOfRange(value))
    }

    /// Value of an `Int` that must fit in a `u16`.
    pub fn as_u16(&self) -> Result<u16, EncodingError> {
        let value = self.as_int()?;
        u16::try_from(value).map_err(|_| EncodingError::IntegerOutOfRange(value))
    }

    /// Value of a `Bool`.
    pub fn as_bool(&self) -> Result<bool, EncodingError> {
        match self {
            Self::Bool(value) => Ok(*value),
            other => Err(other.unexpected(EncodedTag::Bool)),
        }
    }

    /// Value of a `Uid`.
    pub fn as_uid(&self) -> Result<Uid, EncodingError> {
        match self {
            Self::Uid(uid) => Ok(*uid),
            other => Err(other.unexpected(EncodedTag::Uid)),
        }
    }

    /// Borrow the content of a `Str`.
    pub fn as_str(&self) -> Result<&str, EncodingError> {
        match self {
            Self::Str(s) => Ok(s),
            other => Err(other.unexpected(EncodedTag::Str)),
        }
    }

    /// Borrow the items of a `List`.
    pub fn as_list(&self) -> Result<&[Encoded], EncodingError> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(other.unexpected(EncodedTag::List)),
        }
    }

    /// Borrow the items of a `List` that must have exactly `len` elements.
    pub fn as_list_of(&self, len: usize) -> Result<&[Encoded], EncodingError> {
        let items = self.as_list()?;
        if items.len() != len {
            return Err(EncodingError::UnexpectedListLength { expected: len, found: items.len() });
        }
        Ok(items)
    }

    /// Borrow the entries of a `Dict`.
    pub fn as_dict(&self) -> Result<&BTreeMap<Vec<u8>, Encoded>, EncodingError> {
        match self {
            Self::Dict(entries) => Ok(entries),
            other => Err(other.unexpected(EncodedTag::Dict)),
        }
    }

    /// Look up a required dictionary entry.
    pub fn dict_get(&self, key: &[u8]) -> Result<&Encoded, EncodingError> {
        self.as_dict()?.get(key).ok_or_else(|| EncodingError::MissingKey(key.to_vec()))
    }

    /// Borrow the magnitude of a `BigUint`.
    pub fn as_big_uint(&self) -> Result<&[u8], EncodingError> {
        match self {
            Self::BigUint(bytes) => Ok(bytes),
            other => Err(other.unexpected(EncodedTag::BigUint)),
        }
    }
}

/// Decode one value from the front of `input`, returning the remainder.
fn decode_one(input: &[u8], depth: usize) -> Result<(Encoded, &[u8]), EncodingError> {
    if depth > MAX_DEPTH {
        return Err(EncodingError::DepthExceeded(MAX_DEPTH));
    }
    if input.len() < HEADER_SIZE {
        return Err(EncodingError::Truncated { needed: HEADER_SIZE, available: input.len() });
    }

    let tag = EncodedTag::from_u8(input[0]).ok_or(EncodingError::UnknownTag(input[0]))?;
    let length = u32::from_be_bytes([input[1], input[2], input[3], input[4]]) as usize;
    let body = &input[HEADER_SIZE..];
    if body.len() < length {
        return Err(EncodingError::Truncated { needed: length, available: body.len() });
    }
    let (content, rest) = body.split_at(length);

    let value = match tag {
        EncodedTag::Bytes => Encoded::Bytes(content.to_vec()),
        EncodedTag::BigUint => Encoded::BigUint(content.to_vec()),
        EncodedTag::Int => {
            let array: [u8; 8] =
                content.try_into().map_err(|_| EncodingError::InvalidLength { tag, length })?;
            Encoded::Int(u64::from_be_bytes(array))
        },
        EncodedTag::Bool => match content {
            [0] => Encoded::Bool(false),
            [1] => Encoded::Bool(true),
            [other] => return Err(EncodingError::InvalidBool(*other)),
            _ => return Err(EncodingError::InvalidLength { tag, length }),
        },
        EncodedTag::Uid => {
            if length != UID_SIZE {
                return Err(EncodingError::InvalidLength { tag, length });
            }
            Encoded::Uid(Uid::from_slice(content)?)
        },
        EncodedTag::Str => {
            let s = std::str::from_utf8(content).map_err(|_| EncodingError::InvalidUtf8)?;
            Encoded::Str(s.to_owned())
        },
        EncodedTag::List => {
            let mut items = Vec::new();
            let mut remaining = content;
            while !remaining.is_empty() {
                let (item, next) = decode_one(remaining, depth + 1)?;
                items.push(item);
                remaining = next;
            }
            Encoded::List(items)
        },
        EncodedTag::Dict => {
            let mut entries = BTreeMap::new();
            let mut last_key: Option<Vec<u8>> = None;
            let mut remaining = content;
            while !remaining.is_empty() {
                let (key, next) = decode_one(remaining, depth + 1)?;
                let key = match key {
                    Encoded::Bytes(key) => key,
                    other => return Err(other.unexpected(EncodedTag::Bytes)),
                };
                if last_key.as_ref().is_some_and(|last| *last >= key) {
                    return Err(EncodingError::UnorderedKeys);
                }
                let (value, next) = decode_one(next, depth + 1)?;
                last_key = Some(key.clone());
                entries.insert(key, value);
                remaining = next;
            }
            Encoded::Dict(entries)
        },
    };

    Ok((value, rest))
}
