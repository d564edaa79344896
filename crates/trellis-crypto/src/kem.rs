//! Key agreement and sealed boxes.
//!
//! The KEM works on y-coordinates only, so any public key (full or compact)
//! can receive:
//!
//! ```text
//! encapsulate:  r ∈ [2, q), E = r·G
//!               z = (r · A).y              (scalar_mul_y)
//!               k = HKDF-SHA256(ikm = z, info = LABEL || E || A)
//! decapsulate:  z = (a · E).y
//! ```
//!
//! `seal` output layout: `E (compact bytes) || nonce (24) || ciphertext+tag`.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use num_bigint::BigUint;
use num_traits::One;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::{CryptoError, PrivateKey, PublicKey, modular};

/// XChaCha20 nonce size.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Derived symmetric key size.
pub const KEY_SIZE: usize = 32;

const LABEL: &[u8] = b"trellis kem v1";

/// Symmetric key shared through the KEM, wiped on drop.
pub type SharedKey = Zeroizing<[u8; KEY_SIZE]>;

/// Derive a fresh shared key for `recipient`.
///
/// Returns the encapsulation (the ephemeral key's compact bytes) and the key.
pub fn encapsulate<R: RngCore + CryptoRng + ?Sized>(
    recipient: &PublicKey,
    rng: &mut R,
) -> Result<(Vec<u8>, SharedKey), CryptoError> {
    let curve = recipient.curve().curve();
    let (r, ephemeral) = curve.random_scalar_and_point(rng)?;
    let ephemeral = PublicKey::from_point(ephemeral)?.to_compact_bytes();

    let shared_y = curve.scalar_mul_y(&r, recipient.y()).ok_or(CryptoError::Seal)?;
    let key = derive_key(&shared_y, curve.byte_len(), &ephemeral, recipient)?;
    Ok((ephemeral, key))
}

/// Recover the shared key from an encapsulation.
pub fn decapsulate(recipient: &PrivateKey, encapsulation: &[u8]) -> Result<SharedKey, CryptoError> {
    let ephemeral = PublicKey::from_compact_bytes(encapsulation)?;
    if ephemeral.curve() != recipient.curve() {
        return Err(CryptoError::CurveMismatch {
            expected: recipient.curve(),
            actual: ephemeral.curve(),
        });
    }

    let curve = recipient.curve().curve();
    let shared_y =
        curve.scalar_mul_y(&recipient.scalar(), ephemeral.y()).ok_or(CryptoError::Unseal)?;
    let public = recipient.public_key()?;
    derive_key(&shared_y, curve.byte_len(), encapsulation, &public)
}

fn derive_key(
    shared_y: &BigUint,
    len: usize,
    encapsulation: &[u8],
    recipient: &PublicKey,
) -> Result<SharedKey, CryptoError> {
    // identity means a degenerate exchange
    if shared_y.is_one() {
        return Err(CryptoError::LowOrder(recipient.curve()));
    }

    let ikm = Zeroizing::new(modular::to_fixed_be(shared_y, len).ok_or(CryptoError::Seal)?);
    let mut info = LABEL.to_vec();
    info.extend_from_slice(encapsulation);
    info.extend_from_slice(&recipient.to_compact_bytes());

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    Hkdf::<Sha256>::new(None, &ikm)
        .expand(&info, key.as_mut_slice())
        .map_err(|_| CryptoError::Seal)?;
    Ok(key)
}

/// Encrypt `plaintext` to `recipient`.
pub fn seal<R: RngCore + CryptoRng + ?Sized>(
    recipient: &PublicKey,
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>, CryptoError> {
    let (encapsulation, key) = encapsulate(recipient, rng)?;

    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill_bytes(&mut nonce);

    let cipher = XChaCha20Poly1305::new_from_slice(key.as_slice()).map_err(|_| CryptoError::Seal)?;
    let ciphertext =
        cipher.encrypt(XNonce::from_slice(&nonce), plaintext).map_err(|_| CryptoError::Seal)?;

    let mut out = Vec::with_capacity(encapsulation.len() + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&encapsulation);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a sealed box addressed to `recipient`.
pub fn open(recipient: &PrivateKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let enc_len = 1 + recipient.curve().curve().byte_len();
    if sealed.len() < enc_len + NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::Unseal);
    }

    let (encapsulation, rest) = sealed.split_at(enc_len);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);
    let key = decapsulate(recipient, encapsulation)?;

    let cipher =
        XChaCha20Poly1305::new_from_slice(key.as_slice()).map_err(|_| CryptoError::Unseal)?;
    cipher.decrypt(XNonce::from_slice(nonce), ciphertext).map_err(|_| CryptoError::Unseal)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;
    use crate::{CurveId, KeyPair};

    #[test]
    fn shared_keys_agree() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        for id in CurveId::ALL {
            let keys = KeyPair::generate(id, &mut rng).unwrap();
            let (enc, sender_key) = encapsulate(&keys.public.compact(), &mut rng).unwrap();
            let recipient_key = decapsulate(&keys.private, &enc).unwrap();
            assert_eq!(*sender_key, *recipient_key);
        }
    }

    #[test]
    fn sealed_box_opens_for_recipient_only() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let alice = KeyPair::generate(CurveId::Curve25519, &mut rng).unwrap();
        let eve = KeyPair::generate(CurveId::Curve25519, &mut rng).unwrap();

        let sealed = seal(&alice.public, b"confirmation", &mut rng).unwrap();
        assert_eq!(open(&alice.private, &sealed).unwrap(), b"confirmation");
        assert_eq!(open(&eve.private, &sealed), Err(CryptoError::Unseal));
    }

    #[test]
    fn tampered_box_is_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let keys = KeyPair::generate(CurveId::Mdc, &mut rng).unwrap();
        let mut sealed = seal(&keys.public, b"payload", &mut rng).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert_eq!(open(&keys.private, &sealed), Err(CryptoError::Unseal));
        assert_eq!(open(&keys.private, &sealed[..10]), Err(CryptoError::Unseal));
    }
}
