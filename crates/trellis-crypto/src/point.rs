//! Curve points.

use std::fmt;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use trellis_proto::Encoded;

use crate::{CryptoError, CurveId, modular};

/// Affine point `(x, y)` on one of the supported curves.
///
/// Immutable value type: equality is coordinate and curve equality, and every
/// operation returns a new point. Points built with [`Point::new`] or decoded
/// with [`Point::from_encoded`] satisfy the curve equation; only the
/// arithmetic engine builds points without checking.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Point {
    curve: CurveId,
    x: BigUint,
    y: BigUint,
}

impl Point {
    /// Build a point, checking the curve equation.
    pub fn new(curve: CurveId, x: BigUint, y: BigUint) -> Result<Self, CryptoError> {
        if curve.curve().satisfies(&x, &y) {
            Ok(Self { curve, x, y })
        } else {
            Err(CryptoError::NotOnCurve(curve))
        }
    }

    pub(crate) fn new_unchecked(curve: CurveId, x: BigUint, y: BigUint) -> Self {
        Self { curve, x, y }
    }

    /// Identity `(0, 1)`.
    pub fn identity(curve: CurveId) -> Self {
        Self { curve, x: BigUint::zero(), y: BigUint::one() }
    }

    /// Curve this point lies on.
    pub fn curve(&self) -> CurveId {
        self.curve
    }

    /// x-coordinate.
    pub fn x(&self) -> &BigUint {
        &self.x
    }

    /// y-coordinate.
    pub fn y(&self) -> &BigUint {
        &self.y
    }

    /// Whether this is `(0, 1)`.
    pub fn is_identity(&self) -> bool {
        self.x.is_zero() && self.y.is_one()
    }

    /// Re-check the curve equation.
    pub fn is_valid(&self) -> bool {
        self.curve.curve().is_on_curve(self)
    }

    /// `-P = (-x, y)`.
    pub fn negate(&self) -> Self {
        let p = self.curve.curve().p();
        Self { curve: self.curve, x: modular::neg(&self.x, p), y: self.y.clone() }
    }

    /// Whether the cofactor annihilates this point.
    pub fn is_low_order(&self) -> bool {
        self.curve.curve().is_low_order(self)
    }

    /// `List[Int(curve tag), Dict{'x': BigUint, 'y': BigUint}]`.
    pub fn to_encoded(&self) -> Encoded {
        let len = self.curve.curve().byte_len();
        Encoded::List(vec![
            Encoded::Int(u64::from(self.curve.tag())),
            Encoded::dict([
                (b"x", encode_coordinate(&self.x, len)),
                (b"y", encode_coordinate(&self.y, len)),
            ]),
        ])
    }

    /// Decode and validate.
    pub fn from_encoded(encoded: &Encoded) -> Result<Self, CryptoError> {
        let (curve, fields) = split_tagged(encoded)?;
        let x = decode_coordinate(fields, b"x")?;
        let y = decode_coordinate(fields, b"y")?;
        Self::new(curve, x, y)
    }
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point({}, x={:x}, y={:x})", self.curve, self.x, self.y)
    }
}

pub(crate) fn encode_coordinate(value: &BigUint, len: usize) -> Encoded {
    Encoded::BigUint(modular::to_fixed_be(value, len).unwrap_or_else(|| value.to_bytes_be()))
}

pub(crate) fn decode_coordinate(fields: &Encoded, key: &[u8]) -> Result<BigUint, CryptoError> {
    Ok(modular::from_be(fields.dict_get(key)?.as_big_uint()?))
}

/// Split `List[Int(curve tag), value]`.
pub(crate) fn split_tagged(encoded: &Encoded) -> Result<(CurveId, &Encoded), CryptoError> {
    let items = encoded.as_list_of(2)?;
    let curve = CurveId::from_tag(items[0].as_u8()?)?;
    Ok((curve, &items[1]))
}
