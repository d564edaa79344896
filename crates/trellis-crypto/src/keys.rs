//! Key types.
//!
//! # Encodings
//!
//! ```text
//! full public key     List[Int(tag), Dict{'x': BigUint, 'y': BigUint}]
//! compact public key  List[Int(tag), Dict{'y': BigUint}]
//! private key         List[Int(tag), Dict{'n': BigUint}]
//! compact bytes       [tag] || y   (y big-endian, byte_len(p) bytes)
//! ```

use std::{
    fmt,
    hash::{Hash, Hasher},
};

use num_bigint::BigUint;
use num_traits::Zero;
use rand::{CryptoRng, RngCore};
use trellis_proto::Encoded;
use zeroize::Zeroizing;

use crate::{
    CryptoError, CurveId, Point, modular,
    point::{decode_coordinate, encode_coordinate, split_tagged},
};

/// Secret scalar in `[1, q)`.
///
/// The big-endian scalar bytes are wiped on drop. `Debug` never prints them.
#[derive(Clone)]
pub struct PrivateKey {
    curve: CurveId,
    scalar: Zeroizing<Vec<u8>>,
}

impl PrivateKey {
    /// Wrap a scalar, rejecting 0 and values `>= q`.
    pub fn from_scalar(curve: CurveId, scalar: &BigUint) -> Result<Self, CryptoError> {
        let params = curve.curve();
        if scalar.is_zero() || scalar >= params.q() {
            return Err(CryptoError::ScalarOutOfRange);
        }
        let bytes = modular::to_fixed_be(scalar, params.byte_len())
            .ok_or(CryptoError::ScalarOutOfRange)?;
        Ok(Self { curve, scalar: Zeroizing::new(bytes) })
    }

    /// Curve of this key.
    pub fn curve(&self) -> CurveId {
        self.curve
    }

    pub(crate) fn scalar(&self) -> BigUint {
        modular::from_be(&self.scalar)
    }

    /// Full public key `scalar · G`.
    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        let params = self.curve.curve();
        let point = params.scalar_mul(&self.scalar(), params.generator())?;
        Ok(PublicKey { curve: self.curve, form: Form::Full(point) })
    }

    /// `List[Int(tag), Dict{'n': BigUint}]`.
    pub fn to_encoded(&self) -> Encoded {
        Encoded::List(vec![
            Encoded::Int(u64::from(self.curve.tag())),
            Encoded::dict([(b"n", Encoded::BigUint(self.scalar.to_vec()))]),
        ])
    }

    /// Decode, range-checking the scalar.
    pub fn from_encoded(encoded: &Encoded) -> Result<Self, CryptoError> {
        let (curve, fields) = split_tagged(encoded)?;
        let scalar = decode_coordinate(fields, b"n")?;
        Self::from_scalar(curve, &scalar)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey").field("curve", &self.curve).finish_non_exhaustive()
    }
}

#[derive(Clone)]
enum Form {
    Full(Point),
    Compact(BigUint),
}

/// Public key: a full point or, in compact form, only its y-coordinate.
///
/// Construction always validates the point and rejects low-order keys.
///
/// Keys compare and hash by curve and y-coordinate: the x sign is not part of a
/// key's identity, so a full key equals its compact form.
#[derive(Clone)]
pub struct PublicKey {
    curve: CurveId,
    form: Form,
}

impl PublicKey {
    /// Wrap a point.
    pub fn from_point(point: Point) -> Result<Self, CryptoError> {
        let curve = point.curve();
        if !point.is_valid() {
            return Err(CryptoError::NotOnCurve(curve));
        }
        if point.is_low_order() {
            return Err(CryptoError::LowOrder(curve));
        }
        Ok(Self { curve, form: Form::Full(point) })
    }

    /// Compact key from a bare y-coordinate.
    pub fn from_y(curve: CurveId, y: BigUint) -> Result<Self, CryptoError> {
        let params = curve.curve();
        if params.points_for_y(&y).is_none() {
            return Err(CryptoError::NotOnCurve(curve));
        }
        if params.is_low_order_y(&y) {
            return Err(CryptoError::LowOrder(curve));
        }
        Ok(Self { curve, form: Form::Compact(y) })
    }

    /// Curve of this key.
    pub fn curve(&self) -> CurveId {
        self.curve
    }

    /// y-coordinate.
    pub fn y(&self) -> &BigUint {
        match &self.form {
            Form::Full(point) => point.y(),
            Form::Compact(y) => y,
        }
    }

    /// Full point, when known.
    pub fn point(&self) -> Option<&Point> {
        match &self.form {
            Form::Full(point) => Some(point),
            Form::Compact(_) => None,
        }
    }

    /// Whether only the y-coordinate is known.
    pub fn is_compact(&self) -> bool {
        matches!(self.form, Form::Compact(_))
    }

    /// Drop the x-coordinate.
    pub fn compact(&self) -> Self {
        Self { curve: self.curve, form: Form::Compact(self.y().clone()) }
    }

    /// `[tag] || y`.
    pub fn to_compact_bytes(&self) -> Vec<u8> {
        let len = self.curve.curve().byte_len();
        let mut out = Vec::with_capacity(1 + len);
        out.push(self.curve.tag());
        match modular::to_fixed_be(self.y(), len) {
            Some(y) => out.extend_from_slice(&y),
            None => out.extend_from_slice(&self.y().to_bytes_be()),
        }
        out
    }

    /// Parse and validate `[tag] || y`.
    pub fn from_compact_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (&tag, y) = bytes
            .split_first()
            .ok_or(CryptoError::InvalidLength { expected: 1, actual: 0 })?;
        let curve = CurveId::from_tag(tag)?;
        let len = curve.curve().byte_len();
        if y.len() != len {
            return Err(CryptoError::InvalidLength { expected: 1 + len, actual: bytes.len() });
        }
        Self::from_y(curve, modular::from_be(y))
    }

    /// Full or compact dictionary form, matching how the key is held.
    pub fn to_encoded(&self) -> Encoded {
        match &self.form {
            Form::Full(point) => point.to_encoded(),
            Form::Compact(y) => Encoded::List(vec![
                Encoded::Int(u64::from(self.curve.tag())),
                Encoded::dict([(b"y", encode_coordinate(y, self.curve.curve().byte_len()))]),
            ]),
        }
    }

    /// Decode either form. A dictionary with an `'x'` entry is a full key.
    pub fn from_encoded(encoded: &Encoded) -> Result<Self, CryptoError> {
        let (curve, fields) = split_tagged(encoded)?;
        if fields.as_dict()?.contains_key(b"x".as_slice()) {
            Self::from_point(Point::from_encoded(encoded)?)
        } else {
            Self::from_y(curve, decode_coordinate(fields, b"y")?)
        }
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.curve == other.curve && self.y() == other.y()
    }
}

impl Eq for PublicKey {}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.curve.hash(state);
        self.y().hash(state);
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let y = self.y().to_str_radix(16);
        let short = y.get(..16).unwrap_or(&y);
        let form = if self.is_compact() { "compact" } else { "full" };
        write!(f, "PublicKey({}, {form}, y={short}..)", self.curve)
    }
}

/// Private key with its full public key.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// Secret half.
    pub private: PrivateKey,
    /// Public half.
    pub public: PublicKey,
}

impl KeyPair {
    /// Draw a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(
        curve: CurveId,
        rng: &mut R,
    ) -> Result<Self, CryptoError> {
        let (scalar, point) = curve.curve().random_scalar_and_point(rng)?;
        let private = PrivateKey::from_scalar(curve, &scalar)?;
        Ok(Self { private, public: PublicKey { curve, form: Form::Full(point) } })
    }
}
