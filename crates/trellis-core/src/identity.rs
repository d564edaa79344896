//! Identities, devices and contact metadata.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use trellis_crypto::{CryptoError, CurveId, KeyPair, PublicKey};
use trellis_proto::Uid;

/// Device identifier.
pub type DeviceUid = Uid;

/// Group identifier.
pub type GroupUid = Uid;

/// Public identity: home server plus signature and encryption keys.
///
/// # Byte form
///
/// ```text
/// server (UTF-8) || 0x00 || signature key (compact) || encryption key (compact)
/// ```
///
/// Equality, ordering and hashing all go through the byte form.
#[derive(Clone)]
pub struct Identity {
    server: String,
    signature_key: PublicKey,
    encryption_key: PublicKey,
    bytes: Vec<u8>,
}

impl Identity {
    /// Build an identity. Keys are kept in compact form.
    pub fn new(
        server: impl Into<String>,
        signature_key: &PublicKey,
        encryption_key: &PublicKey,
    ) -> Self {
        let server = server.into();
        let signature_key = signature_key.compact();
        let encryption_key = encryption_key.compact();

        let mut bytes = server.as_bytes().to_vec();
        bytes.push(0);
        bytes.extend(signature_key.to_compact_bytes());
        bytes.extend(encryption_key.to_compact_bytes());

        Self { server, signature_key, encryption_key, bytes }
    }

    /// Parse and validate the byte form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let split = bytes
            .iter()
            .position(|&b| b == 0)
            .ok_or(CryptoError::InvalidLength { expected: 1, actual: 0 })?;
        let server = std::str::from_utf8(&bytes[..split])
            .map_err(|_| CryptoError::Encoding(trellis_proto::EncodingError::InvalidUtf8))?;

        let keys = &bytes[split + 1..];
        let (signature, rest) = split_compact(keys)?;
        let (encryption, rest) = split_compact(rest)?;
        if !rest.is_empty() {
            return Err(CryptoError::InvalidLength {
                expected: bytes.len() - rest.len(),
                actual: bytes.len(),
            });
        }

        Ok(Self::new(
            server,
            &PublicKey::from_compact_bytes(signature)?,
            &PublicKey::from_compact_bytes(encryption)?,
        ))
    }

    /// Canonical byte form.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Home server.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Key verifying this identity's signatures.
    pub fn signature_key(&self) -> &PublicKey {
        &self.signature_key
    }

    /// Key sealed boxes are addressed to.
    pub fn encryption_key(&self) -> &PublicKey {
        &self.encryption_key
    }
}

fn split_compact(bytes: &[u8]) -> Result<(&[u8], &[u8]), CryptoError> {
    let tag = *bytes.first().ok_or(CryptoError::InvalidLength { expected: 1, actual: 0 })?;
    let len = 1 + CurveId::from_tag(tag)?.curve().byte_len();
    if bytes.len() < len {
        return Err(CryptoError::InvalidLength { expected: len, actual: bytes.len() });
    }
    Ok(bytes.split_at(len))
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Identity {}

impl PartialOrd for Identity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({self})")
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // server plus a short fingerprint of the signature key
        let key = self.signature_key.to_compact_bytes();
        let fingerprint: String = key.iter().skip(1).take(4).map(|b| format!("{b:02x}")).collect();
        write!(f, "{}#{}", self.server, fingerprint)
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.bytes)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdentityVisitor;

        impl<'de> de::Visitor<'de> for IdentityVisitor {
            type Value = Identity;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("identity bytes")
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Identity, E> {
                Identity::from_bytes(v).map_err(E::custom)
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Identity, A::Error> {
                let mut bytes = Vec::new();
                while let Some(byte) = seq.next_element()? {
                    bytes.push(byte);
                }
                Identity::from_bytes(&bytes).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_bytes(IdentityVisitor)
    }
}

/// Identity together with its private keys.
#[derive(Debug, Clone)]
pub struct OwnedIdentity {
    /// Public identity.
    pub identity: Identity,
    /// Signing key pair.
    pub signing: KeyPair,
    /// Encryption key pair.
    pub encryption: KeyPair,
}

impl OwnedIdentity {
    /// Generate fresh key pairs on `curve`.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(
        server: impl Into<String>,
        curve: CurveId,
        rng: &mut R,
    ) -> Result<Self, CryptoError> {
        let signing = KeyPair::generate(curve, rng)?;
        let encryption = KeyPair::generate(curve, rng)?;
        let identity = Identity::new(server, &signing.public, &encryption.public);
        Ok(Self { identity, signing, encryption })
    }
}

/// Details a contact publishes about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactDetails {
    /// Name shown to the user.
    pub display_name: String,
}

impl ContactDetails {
    /// Details with just a display name.
    pub fn named(display_name: impl Into<String>) -> Self {
        Self { display_name: display_name.into() }
    }
}

/// How a contact came to be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustOrigin {
    /// Both sides scanned each other's code.
    MutualScan,
    /// Added out of band (imports, test setup).
    Direct,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn owned(server: &str, seed: u64) -> OwnedIdentity {
        OwnedIdentity::generate(server, CurveId::Curve25519, &mut ChaCha20Rng::seed_from_u64(seed))
            .unwrap()
    }

    #[test]
    fn byte_form_survives_parsing() {
        let alice = owned("https://server.example", 1).identity;
        let parsed = Identity::from_bytes(alice.as_bytes()).unwrap();
        assert_eq!(parsed, alice);
        assert_eq!(parsed.server(), "https://server.example");
        assert_eq!(alice.as_bytes().len(), "https://server.example".len() + 1 + 33 + 33);
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let alice = owned("s", 2).identity;
        let bytes = alice.as_bytes();
        assert!(Identity::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(Identity::from_bytes(b"no separator").is_err());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = owned("s", 3).identity.as_bytes().to_vec();
        bytes.push(7);
        assert!(Identity::from_bytes(&bytes).is_err());
    }

    #[test]
    fn identity_survives_cbor() {
        let alice = owned("s", 4).identity;
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&alice, &mut bytes).unwrap();
        let decoded: Identity = ciborium::de::from_reader(&bytes[..]).unwrap();
        assert_eq!(decoded, alice);
    }

    #[test]
    fn display_is_short() {
        let alice = owned("srv", 5).identity;
        let shown = alice.to_string();
        assert!(shown.starts_with("srv#"));
        assert_eq!(shown.len(), "srv#".len() + 8);
    }
}
