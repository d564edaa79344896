//! Protocol message envelope.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Encoded, EncodingError, Uid};

/// Stable identifier of a protocol type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolId(pub u16);

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol#{}", self.0)
    }
}

/// Message addressed to one protocol instance.
///
/// Transient: consumed exactly once by the step matching `message_id` and the
/// instance's current state, never persisted past delivery (except while
/// parked waiting for its step).
///
/// # Wire format
///
/// ```text
/// List[Int(protocol_id), Uid(instance_uid), Int(message_id), Bytes(payload)]
/// ```
///
/// The payload is opaque here; each protocol decodes its own message types.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Protocol type this message belongs to.
    pub protocol_id: ProtocolId,
    /// Instance the message is addressed to.
    pub instance_uid: Uid,
    /// Message type within the protocol.
    pub message_id: u8,
    /// Protocol-specific encoded payload.
    #[serde(with = "payload_bytes")]
    pub payload: Vec<u8>,
}

impl ProtocolMessage {
    /// Convert to the generic encoded form.
    pub fn to_encoded(&self) -> Encoded {
        Encoded::List(vec![
            Encoded::Int(u64::from(self.protocol_id.0)),
            Encoded::Uid(self.instance_uid),
            Encoded::Int(u64::from(self.message_id)),
            Encoded::Bytes(self.payload.clone()),
        ])
    }

    /// Parse from the generic encoded form.
    pub fn from_encoded(encoded: &Encoded) -> Result<Self, EncodingError> {
        let items = encoded.as_list_of(4)?;
        Ok(Self {
            protocol_id: ProtocolId(items[0].as_u16()?),
            instance_uid: items[1].as_uid()?,
            message_id: items[2].as_u8()?,
            payload: items[3].as_bytes()?.to_vec(),
        })
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        self.to_encoded().to_bytes()
    }

    /// Decode from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, EncodingError> {
        Self::from_encoded(&Encoded::decode(bytes)?)
    }
}

impl fmt::Debug for ProtocolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolMessage")
            .field("protocol_id", &self.protocol_id)
            .field("instance_uid", &self.instance_uid)
            .field("message_id", &self.message_id)
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .finish()
    }
}

mod payload_bytes {
    use std::fmt;

    use serde::{Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct PayloadVisitor;

        impl<'de> de::Visitor<'de> for PayloadVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a byte string")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Vec<u8>, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Vec<u8>, E> {
                Ok(v)
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Vec<u8>, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(byte) = seq.next_element()? {
                    bytes.push(byte);
                }
                Ok(bytes)
            }
        }

        deserializer.deserialize_byte_buf(PayloadVisitor)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message() -> ProtocolMessage {
        ProtocolMessage {
            protocol_id: ProtocolId(2),
            instance_uid: Uid::from_bytes([9; 32]),
            message_id: 3,
            payload: b"payload".to_vec(),
        }
    }

    #[test]
    fn envelope_survives_the_wire() {
        let bytes = message().encode().unwrap();
        assert_eq!(ProtocolMessage::decode(&bytes).unwrap(), message());
    }

    #[test]
    fn envelope_with_wrong_arity_is_rejected() {
        let mut encoded = message().to_encoded();
        if let Encoded::List(items) = &mut encoded {
            items.pop();
        }
        let bytes = encoded.to_bytes().unwrap();
        assert!(matches!(
            ProtocolMessage::decode(&bytes),
            Err(EncodingError::UnexpectedListLength { expected: 4, found: 3 })
        ));
    }

    #[test]
    fn oversized_message_id_is_rejected() {
        let mut encoded = message().to_encoded();
        if let Encoded::List(items) = &mut encoded {
            items[2] = Encoded::Int(256);
        }
        assert_eq!(
            ProtocolMessage::from_encoded(&encoded),
            Err(EncodingError::IntegerOutOfRange(256))
        );
    }

    #[test]
    fn debug_hides_payload() {
        let debug = format!("{:?}", message());
        assert!(debug.contains("<7 bytes>"));
        assert!(!debug.contains("112")); // 'p'
    }
}
