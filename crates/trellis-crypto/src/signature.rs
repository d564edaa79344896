//! Schnorr signatures (EC-SDSA) over the supported curves.
//!
//! ```text
//! sign:    r ∈ [2, q), R = r·G
//!          e = SHA-256(R.y || A.y || m) mod q
//!          s = r - a·e mod q
//!          signature = e || s
//! verify:  R' = s·G + e·A,  accept iff SHA-256(R'.y || A.y || m) mod q == e
//! ```
//!
//! Only y-coordinates enter the challenge, so a compact public key verifies
//! by trying both candidates for `R'`.

use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};

use crate::{CryptoError, CurveId, PrivateKey, PublicKey, modular};

/// Fixed-length `e || s` signature.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    curve: CurveId,
    bytes: Vec<u8>,
}

impl Signature {
    /// Signature length in bytes for `curve`.
    pub fn len_for(curve: CurveId) -> usize {
        2 * scalar_len(curve)
    }

    /// Parse raw bytes, checking only the length.
    pub fn from_bytes(curve: CurveId, bytes: &[u8]) -> Result<Self, CryptoError> {
        let expected = Self::len_for(curve);
        if bytes.len() != expected {
            return Err(CryptoError::InvalidLength { expected, actual: bytes.len() });
        }
        Ok(Self { curve, bytes: bytes.to_vec() })
    }

    /// Curve the signature was made on.
    pub fn curve(&self) -> CurveId {
        self.curve
    }

    /// Raw `e || s` bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn parts(&self) -> (BigUint, BigUint) {
        let (e, s) = self.bytes.split_at(scalar_len(self.curve));
        (modular::from_be(e), modular::from_be(s))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({}, {})", self.curve, hex_prefix(&self.bytes))
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(18);
    for byte in bytes.iter().take(8) {
        let _ = write!(out, "{byte:02x}");
    }
    out.push_str("..");
    out
}

fn scalar_len(curve: CurveId) -> usize {
    curve.curve().q().to_bytes_be().len()
}

fn challenge(curve: CurveId, r_y: &BigUint, a_y: &BigUint, message: &[u8]) -> BigUint {
    let params = curve.curve();
    let len = params.byte_len();
    let mut hasher = Sha256::new();
    for y in [r_y, a_y] {
        hasher.update(modular::to_fixed_be(y, len).unwrap_or_else(|| y.to_bytes_be()));
    }
    hasher.update(message);
    modular::from_be(&hasher.finalize()) % params.q()
}

/// Sign `message`.
pub fn sign<R: RngCore + CryptoRng + ?Sized>(
    key: &PrivateKey,
    message: &[u8],
    rng: &mut R,
) -> Result<Signature, CryptoError> {
    let curve = key.curve();
    let params = curve.curve();
    let q = params.q();
    let a = key.scalar();
    let public = key.public_key()?;

    let (r, big_r) = params.random_scalar_and_point(rng)?;
    let e = challenge(curve, big_r.y(), public.y(), message);
    let s = modular::sub(&r, &modular::mul(&a, &e, q), q);

    let len = scalar_len(curve);
    let mut bytes = modular::to_fixed_be(&e, len).ok_or(CryptoError::ScalarOutOfRange)?;
    bytes.extend(modular::to_fixed_be(&s, len).ok_or(CryptoError::ScalarOutOfRange)?);
    Ok(Signature { curve, bytes })
}

/// Verify `signature` over `message`.
///
/// Works with full and compact keys; low-order keys cannot be constructed, so
/// they never verify.
pub fn verify(key: &PublicKey, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
    let curve = key.curve();
    if signature.curve() != curve {
        return Err(CryptoError::CurveMismatch { expected: curve, actual: signature.curve() });
    }

    let params = curve.curve();
    let (e, s) = signature.parts();
    if &e >= params.q() || &s >= params.q() {
        return Err(CryptoError::InvalidSignature);
    }

    let g = params.generator();
    let candidates = match key.point() {
        Some(a) => vec![params.mul_add(&s, g, &e, a)?],
        None => {
            let (r1, r2) = params.mul_add_y(&s, g, &e, key.y())?;
            vec![r1, r2]
        },
    };

    if candidates.iter().any(|r| challenge(curve, r.y(), key.y(), message) == e) {
        Ok(())
    } else {
        Err(CryptoError::InvalidSignature)
    }
}
