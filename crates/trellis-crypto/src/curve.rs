//! Curve parameter sets and the arithmetic engine.
//!
//! Both curves use the `a = 1` twisted Edwards model
//!
//! ```text
//! x² + y² = 1 + d·x²·y²  (mod p)
//! ```
//!
//! with a non-square `d`, so the unified addition law is complete: it needs no
//! doubling or identity special cases.

use std::{fmt, mem, sync::LazyLock};

use hex_literal::hex;
use num_bigint::{BigUint, RandBigInt};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};

use crate::{
    CryptoError, Point,
    modular::{self, add, mul, sub},
};

/// Stable one-byte curve selector.
///
/// Curves are always selected by tag, never by comparing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum CurveId {
    /// 256-bit prime `p ≡ 3 mod 4`, cofactor 4.
    Mdc = 0x00,
    /// Edwards form of Curve25519 (`p = 2^255 - 19`), cofactor 8.
    Curve25519 = 0x01,
}

impl CurveId {
    /// Every supported curve.
    pub const ALL: [Self; 2] = [Self::Mdc, Self::Curve25519];

    /// Wire tag.
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Parse a wire tag.
    pub fn from_tag(tag: u8) -> Result<Self, CryptoError> {
        match tag {
            0x00 => Ok(Self::Mdc),
            0x01 => Ok(Self::Curve25519),
            other => Err(CryptoError::UnknownCurve(other)),
        }
    }

    /// Parameters and arithmetic for this curve.
    pub fn curve(self) -> &'static Curve {
        match self {
            Self::Mdc => &MDC,
            Self::Curve25519 => &CURVE25519,
        }
    }
}

impl fmt::Display for CurveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mdc => f.write_str("MDC"),
            Self::Curve25519 => f.write_str("Curve25519"),
        }
    }
}

static MDC: LazyLock<Curve> = LazyLock::new(|| {
    Curve::from_params(
        CurveId::Mdc,
        &hex!("f13b68b9d456afb4532f92fdd7a5fd4f086a9037ef07af9ec13710405779ec13"),
        &hex!("571304521965b68a7cdfbfccfb0cb9625f1270f63f21f041ee9309250300cf89"),
        &hex!("b681886a7f903b83d85b421e03cbcf6350d72abb8d2713e2232c25bfee68363b"),
        &hex!("ca6734e1b59c0b0359814dcf6563da421da8bc3d81a93a3a7e73c355bd2864b5"),
        &hex!("3c4eda2e7515abed14cbe4bf75e97f534fb38975faf974bb588552f421b0f7fb"),
        4,
    )
});

// d = 486660 / 486664 and G.y = 4/5: the Edwards curve birationally
// equivalent to the Montgomery curve v² = u³ + 486662u² + u.
static CURVE25519: LazyLock<Curve> = LazyLock::new(|| {
    Curve::from_params(
        CurveId::Curve25519,
        &hex!("7fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffed"),
        &hex!("2dfc9311d490018c7338bf8688861767ff8ff5b2bebe27548a14b235eca6874a"),
        &hex!("159a6849e44c3c7f061b3d570fc4ed5b5d14c8ba4253df49cc7edf80f533ad9b"),
        &hex!("6666666666666666666666666666666666666666666666666666666666666658"),
        &hex!("1000000000000000000000000000000014def9dea2f79cd65812631a5cf5d3ed"),
        8,
    )
});

/// Immutable parameter set `(p, d, G, q, nu, cardinality)` and the operations
/// defined over it.
///
/// Every operation takes and returns owned values; nothing is mutated in
/// place, so a `&'static Curve` can be shared freely between threads.
#[derive(Debug)]
pub struct Curve {
    id: CurveId,
    p: BigUint,
    d: BigUint,
    generator: Point,
    q: BigUint,
    nu: BigUint,
    cardinality: BigUint,
    byte_len: usize,
}

/// Projective `(X : Y : Z)` with `x = X/Z`, `y = Y/Z`.
///
/// Only used inside the ladder so that a scalar multiplication costs a single
/// inversion.
#[derive(Clone)]
struct Projective {
    x: BigUint,
    y: BigUint,
    z: BigUint,
}

impl Projective {
    fn identity() -> Self {
        Self { x: BigUint::zero(), y: BigUint::one(), z: BigUint::one() }
    }

    fn from_affine(point: &Point) -> Self {
        Self { x: point.x().clone(), y: point.y().clone(), z: BigUint::one() }
    }
}

impl Curve {
    fn from_params(
        id: CurveId,
        p: &[u8],
        d: &[u8],
        gx: &[u8],
        gy: &[u8],
        q: &[u8],
        nu: u32,
    ) -> Self {
        let p = BigUint::from_bytes_be(p);
        let q = BigUint::from_bytes_be(q);
        let nu = BigUint::from(nu);
        let cardinality = &q * &nu;
        let byte_len = p.to_bytes_be().len();
        let generator =
            Point::new_unchecked(id, BigUint::from_bytes_be(gx), BigUint::from_bytes_be(gy));

        Self { id, p, d: BigUint::from_bytes_be(d), generator, q, nu, cardinality, byte_len }
    }

    /// Curve tag.
    pub fn id(&self) -> CurveId {
        self.id
    }

    /// Prime modulus `p`.
    pub fn p(&self) -> &BigUint {
        &self.p
    }

    /// Curve coefficient `d`.
    pub fn d(&self) -> &BigUint {
        &self.d
    }

    /// Base point `G` of the prime-order subgroup.
    pub fn generator(&self) -> &Point {
        &self.generator
    }

    /// Prime order `q` of the subgroup generated by `G`.
    pub fn q(&self) -> &BigUint {
        &self.q
    }

    /// Cofactor `nu`.
    pub fn nu(&self) -> &BigUint {
        &self.nu
    }

    /// Full group order `nu · q`.
    pub fn cardinality(&self) -> &BigUint {
        &self.cardinality
    }

    /// Byte size of `p`; the length of every fixed-size coordinate encoding.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Identity `(0, 1)`.
    pub fn identity(&self) -> Point {
        Point::identity(self.id)
    }

    /// Check the curve equation.
    ///
    /// Mandatory for every point decoded from untrusted input. Coordinates
    /// outside `[0, p)` are rejected rather than reduced.
    pub fn is_on_curve(&self, point: &Point) -> bool {
        point.curve() == self.id && self.satisfies(point.x(), point.y())
    }

    pub(crate) fn satisfies(&self, x: &BigUint, y: &BigUint) -> bool {
        let p = &self.p;
        if x >= p || y >= p {
            return false;
        }

        let x2 = mul(x, x, p);
        let y2 = mul(y, y, p);
        let lhs = add(&x2, &y2, p);
        let rhs = add(&BigUint::one(), &mul(&self.d, &mul(&x2, &y2, p), p), p);
        lhs == rhs
    }

    fn check_curve(&self, point: &Point) -> Result<(), CryptoError> {
        if point.curve() == self.id {
            Ok(())
        } else {
            Err(CryptoError::CurveMismatch { expected: self.id, actual: point.curve() })
        }
    }

    /// Unified addition `P1 + P2`.
    pub fn add(&self, p1: &Point, p2: &Point) -> Result<Point, CryptoError> {
        self.check_curve(p1)?;
        self.check_curve(p2)?;

        let p = &self.p;
        let one = BigUint::one();
        let x1x2 = mul(p1.x(), p2.x(), p);
        let y1y2 = mul(p1.y(), p2.y(), p);
        let x1y2 = mul(p1.x(), p2.y(), p);
        let y1x2 = mul(p1.y(), p2.x(), p);
        let t = mul(&self.d, &mul(&x1x2, &y1y2, p), p);

        let x = modular::div(&add(&x1y2, &y1x2, p), &add(&one, &t, p), p)
            .ok_or(CryptoError::NoInverse)?;
        let y = modular::div(&sub(&y1y2, &x1x2, p), &sub(&one, &t, p), p)
            .ok_or(CryptoError::NoInverse)?;

        Ok(Point::new_unchecked(self.id, x, y))
    }

    fn projective_add(&self, a: &Projective, b: &Projective) -> Projective {
        let p = &self.p;
        let zz = mul(&a.z, &b.z, p);
        let zz2 = mul(&zz, &zz, p);
        let xx = mul(&a.x, &b.x, p);
        let yy = mul(&a.y, &b.y, p);
        let e = mul(&self.d, &mul(&xx, &yy, p), p);
        let f = sub(&zz2, &e, p);
        let g = add(&zz2, &e, p);
        let cross = mul(&add(&a.x, &a.y, p), &add(&b.x, &b.y, p), p);
        let cross = sub(&sub(&cross, &xx, p), &yy, p);

        Projective {
            x: mul(&mul(&zz, &f, p), &cross, p),
            y: mul(&mul(&zz, &g, p), &sub(&yy, &xx, p), p),
            z: mul(&f, &g, p),
        }
    }

    fn to_affine(&self, point: &Projective) -> Result<Point, CryptoError> {
        let p = &self.p;
        let z_inv = modular::inv(&point.z, p).ok_or(CryptoError::NoInverse)?;
        Ok(Point::new_unchecked(self.id, mul(&point.x, &z_inv, p), mul(&point.y, &z_inv, p)))
    }

    /// `k · P` with a Montgomery ladder.
    ///
    /// `k` is reduced mod `cardinality`, and the ladder always runs over the
    /// bit length of `cardinality`: every iteration performs one addition and
    /// one doubling whatever the bit, only the buffers receiving the results
    /// swap.
    pub fn scalar_mul(&self, k: &BigUint, point: &Point) -> Result<Point, CryptoError> {
        self.check_curve(point)?;

        let k = k % &self.cardinality;
        let mut r0 = Projective::identity();
        let mut r1 = Projective::from_affine(point);

        for i in (0..self.cardinality.bits()).rev() {
            let bit = k.bit(i);
            let (a, b) = if bit { (&r1, &r0) } else { (&r0, &r1) };
            let sum = self.projective_add(a, b);
            let double = self.projective_add(a, a);
            (r0, r1) = if bit { (sum, double) } else { (double, sum) };
        }

        self.to_affine(&r0)
    }

    /// y-coordinate of `k · P` given only `P.y`.
    ///
    /// Both points sharing a y-coordinate give the same result, since
    /// `k·(-P) = -(k·P)`. Runs the x-only Montgomery ladder on
    /// `u = (1 + y) / (1 - y)`.
    ///
    /// `y = 1` (identity) and `y = -1` (the point of order two, `u = 0`) are
    /// answered directly: differential addition is undefined for them. `None`
    /// when `y` has no image on the Montgomery curve or the result maps back to
    /// no Edwards point, which only happens for a `y` that is not on the curve.
    pub fn scalar_mul_y(&self, k: &BigUint, y: &BigUint) -> Option<BigUint> {
        let p = &self.p;
        let k = k % &self.cardinality;
        let y = y % p;
        let one = BigUint::one();

        if y.is_one() || k.is_zero() {
            return Some(one);
        }
        if y == p - &one {
            return Some(if k.is_even() { one } else { y });
        }

        let u = modular::div(&add(&one, &y, p), &sub(&one, &y, p), p)?;
        // (A + 2) / 4 for the Montgomery coefficient A = 2(1 + d) / (1 - d)
        let a24 = modular::inv(&sub(&one, &self.d, p), p)?;

        let (mut x2, mut z2) = (one.clone(), BigUint::zero());
        let (mut x3, mut z3) = (u.clone(), one.clone());

        for i in (0..self.cardinality.bits()).rev() {
            let bit = k.bit(i);
            if bit {
                mem::swap(&mut x2, &mut x3);
                mem::swap(&mut z2, &mut z3);
            }

            let a = add(&x2, &z2, p);
            let aa = mul(&a, &a, p);
            let b = sub(&x2, &z2, p);
            let bb = mul(&b, &b, p);
            let e = sub(&aa, &bb, p);
            let c = add(&x3, &z3, p);
            let d = sub(&x3, &z3, p);
            let da = mul(&d, &a, p);
            let cb = mul(&c, &b, p);
            let sum = add(&da, &cb, p);
            let diff = sub(&da, &cb, p);

            x3 = mul(&sum, &sum, p);
            z3 = mul(&u, &mul(&diff, &diff, p), p);
            x2 = mul(&aa, &bb, p);
            z2 = mul(&e, &add(&bb, &mul(&a24, &e, p), p), p);

            if bit {
                mem::swap(&mut x2, &mut x3);
                mem::swap(&mut z2, &mut z3);
            }
        }

        if z2.is_zero() {
            return Some(one);
        }
        let u = modular::div(&x2, &z2, p)?;
        modular::div(&sub(&u, &one, p), &add(&u, &one, p), p)
    }

    /// Both points with the given y-coordinate.
    ///
    /// Solves `x² = (1 - y²) / (1 - d·y²)`. The two x-values are additive
    /// inverses (identical when `x = 0`). `None` when `y` is outside `[0, p)`
    /// or no point has this y-coordinate.
    pub fn points_for_y(&self, y: &BigUint) -> Option<(Point, Point)> {
        let p = &self.p;
        if y >= p {
            return None;
        }

        let one = BigUint::one();
        let y2 = mul(y, y, p);
        let x2 = modular::div(&sub(&one, &y2, p), &sub(&one, &mul(&self.d, &y2, p), p), p)?;
        let (x, neg_x) = modular::sqrt(&x2, p)?;

        Some((
            Point::new_unchecked(self.id, x, y.clone()),
            Point::new_unchecked(self.id, neg_x, y.clone()),
        ))
    }

    /// `a · P1 + b · P2`.
    pub fn mul_add(
        &self,
        a: &BigUint,
        p1: &Point,
        b: &BigUint,
        p2: &Point,
    ) -> Result<Point, CryptoError> {
        let left = self.scalar_mul(a, p1)?;
        let right = self.scalar_mul(b, p2)?;
        self.add(&left, &right)
    }

    /// `a · P1 + b · P2` where `P2` is only known by its y-coordinate.
    ///
    /// Returns both candidates, one per x-root of `y2`.
    pub fn mul_add_y(
        &self,
        a: &BigUint,
        p1: &Point,
        b: &BigUint,
        y2: &BigUint,
    ) -> Result<(Point, Point), CryptoError> {
        let (q, _) = self.points_for_y(y2).ok_or(CryptoError::NotOnCurve(self.id))?;
        let left = self.scalar_mul(a, p1)?;
        let right = self.scalar_mul(b, &q)?;

        // b·(-Q) = -(b·Q)
        Ok((self.add(&left, &right)?, self.add(&left, &right.negate())?))
    }

    /// Uniform scalar in `[2, q)`.
    ///
    /// Rejection-samples 0 and 1; terminates after one draw with overwhelming
    /// probability.
    pub fn random_scalar<R: RngCore + CryptoRng + ?Sized>(&self, rng: &mut R) -> BigUint {
        let two = BigUint::from(2u32);
        loop {
            let k = rng.gen_biguint_below(&self.q);
            if k >= two {
                return k;
            }
        }
    }

    /// Random scalar in `[2, q)` together with `scalar · G`.
    pub fn random_scalar_and_point<R: RngCore + CryptoRng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<(BigUint, Point), CryptoError> {
        let k = self.random_scalar(rng);
        let point = self.scalar_mul(&k, &self.generator)?;
        Ok((k, point))
    }

    /// Whether `nu · P` is the identity.
    ///
    /// Points that fail to multiply count as low order.
    pub fn is_low_order(&self, point: &Point) -> bool {
        self.scalar_mul(&self.nu, point).map_or(true, |r| r.is_identity())
    }

    /// Whether `nu · P` is the identity for a point known by its y-coordinate.
    pub fn is_low_order_y(&self, y: &BigUint) -> bool {
        self.scalar_mul_y(&self.nu, y).is_none_or(|r| r.is_one())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn dec(s: &str) -> BigUint {
        BigUint::parse_bytes(s.as_bytes(), 10).unwrap()
    }

    fn curve_strategy() -> impl Strategy<Value = CurveId> {
        prop_oneof![Just(CurveId::Mdc), Just(CurveId::Curve25519)]
    }

    fn scalar_strategy() -> impl Strategy<Value = BigUint> {
        proptest::collection::vec(any::<u8>(), 1..40).prop_map(|b| BigUint::from_bytes_be(&b))
    }

    #[test]
    fn curve25519_parameters_match_the_montgomery_form() {
        let curve = CurveId::Curve25519.curve();
        let p = curve.p();
        assert_eq!(*p, (BigUint::one() << 255u32) - 19u32);
        assert_eq!(curve.d(), &modular::div(&dec("486660"), &dec("486664"), p).unwrap());
        assert_eq!(curve.generator().y(), &modular::div(&dec("4"), &dec("5"), p).unwrap());
        assert_eq!(
            curve.q(),
            &((BigUint::one() << 252u32) + dec("27742317777372353535851937790883648493"))
        );
    }

    #[test]
    fn cardinality_times_generator_is_identity() {
        let curve = CurveId::Curve25519.curve();
        let result = curve.scalar_mul(curve.cardinality(), curve.generator()).unwrap();
        assert_eq!(result, curve.identity());
        assert_eq!(result.x(), &BigUint::zero());
        assert_eq!(result.y(), &BigUint::one());
    }

    #[test]
    fn generator_has_order_q() {
        for id in CurveId::ALL {
            let curve = id.curve();
            assert!(curve.is_on_curve(curve.generator()), "{id}");
            assert!(curve.scalar_mul(curve.q(), curve.generator()).unwrap().is_identity());
            assert!(!curve.is_low_order(curve.generator()));
            assert_eq!(curve.byte_len(), 32);
        }
    }

    #[test]
    fn d_is_not_a_square() {
        for id in CurveId::ALL {
            let curve = id.curve();
            assert!(!modular::is_square(curve.d(), curve.p()), "{id}");
        }
    }

    #[test]
    fn mdc_prime_is_3_mod_4_and_curve25519_is_5_mod_8() {
        assert_eq!(CurveId::Mdc.curve().p() % 4u32, BigUint::from(3u32));
        assert_eq!(CurveId::Curve25519.curve().p() % 8u32, BigUint::from(5u32));
    }

    #[test]
    fn tags_are_stable() {
        assert_eq!(CurveId::Mdc.tag(), 0x00);
        assert_eq!(CurveId::Curve25519.tag(), 0x01);
        assert_eq!(CurveId::from_tag(0x01).unwrap(), CurveId::Curve25519);
        assert_eq!(CurveId::from_tag(0x02), Err(CryptoError::UnknownCurve(0x02)));
    }

    #[test]
    fn adding_points_from_different_curves_fails() {
        let mdc = CurveId::Mdc.curve();
        let other = CurveId::Curve25519.curve().generator();
        assert_eq!(
            mdc.add(mdc.generator(), other),
            Err(CryptoError::CurveMismatch { expected: CurveId::Mdc, actual: CurveId::Curve25519 })
        );
        assert!(mdc.scalar_mul(&BigUint::one(), other).is_err());
    }

    #[test]
    fn order_two_point_is_handled_by_y_only_ladder() {
        for id in CurveId::ALL {
            let curve = id.curve();
            let minus_one = curve.p() - 1u32;
            assert_eq!(
                curve.scalar_mul_y(&BigUint::from(3u32), &minus_one),
                Some(minus_one.clone())
            );
            assert_eq!(curve.scalar_mul_y(&BigUint::from(4u32), &minus_one), Some(BigUint::one()));
            assert!(curve.is_low_order_y(&minus_one));
            assert!(curve.is_low_order_y(&BigUint::one()));
            assert!(curve.is_low_order_y(&BigUint::zero()));
        }
    }

    #[test]
    fn order_eight_point_is_low_order() {
        let curve = CurveId::Curve25519.curve();
        let y = dec("2707385501144840649318225287225658788936804267575313519463743609750303402022");
        let (point, _) = curve.points_for_y(&y).unwrap();
        assert!(curve.is_low_order(&point));
        assert!(curve.is_low_order_y(&y));
        assert!(!curve.scalar_mul(&BigUint::from(4u32), &point).unwrap().is_identity());
        assert_eq!(
            curve.scalar_mul_y(&BigUint::from(5u32), &y),
            Some(curve.scalar_mul(&BigUint::from(5u32), &point).unwrap().y().clone())
        );
    }

    #[test]
    fn y_without_point_is_rejected() {
        let curve = CurveId::Mdc.curve();
        // y = 2 is not the y-coordinate of any MDC point
        let candidates = (2u32..40).map(BigUint::from).find(|y| curve.points_for_y(y).is_none());
        assert!(candidates.is_some());
        assert!(curve.points_for_y(curve.p()).is_none());
    }

    #[test]
    fn random_scalar_is_in_range() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        for id in CurveId::ALL {
            let curve = id.curve();
            let (k, point) = curve.random_scalar_and_point(&mut rng).unwrap();
            assert!(k >= BigUint::from(2u32) && &k < curve.q());
            assert!(curve.is_on_curve(&point));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn scalar_multiples_stay_on_curve(id in curve_strategy(), k in scalar_strategy()) {
            let curve = id.curve();
            let point = curve.scalar_mul(&k, curve.generator()).unwrap();
            prop_assert!(curve.is_on_curve(&point));
        }

        #[test]
        fn scalar_mul_distributes_over_scalar_addition(
            id in curve_strategy(),
            a in scalar_strategy(),
            b in scalar_strategy(),
        ) {
            let curve = id.curve();
            let g = curve.generator();
            let sum = (&a + &b) % curve.q();
            let left = curve.scalar_mul(&sum, g).unwrap();
            let right = curve
                .add(&curve.scalar_mul(&a, g).unwrap(), &curve.scalar_mul(&b, g).unwrap())
                .unwrap();
            prop_assert_eq!(left, right);
        }

        #[test]
        fn addition_is_a_commutative_group_law(
            id in curve_strategy(),
            a in scalar_strategy(),
            b in scalar_strategy(),
            c in scalar_strategy(),
        ) {
            let curve = id.curve();
            let g = curve.generator();
            let pa = curve.scalar_mul(&a, g).unwrap();
            let pb = curve.scalar_mul(&b, g).unwrap();
            let pc = curve.scalar_mul(&c, g).unwrap();

            prop_assert_eq!(curve.add(&pa, &pb).unwrap(), curve.add(&pb, &pa).unwrap());
            prop_assert_eq!(
                curve.add(&curve.add(&pa, &pb).unwrap(), &pc).unwrap(),
                curve.add(&pa, &curve.add(&pb, &pc).unwrap()).unwrap()
            );
            prop_assert_eq!(curve.add(&pa, &curve.identity()).unwrap(), pa.clone());
            prop_assert!(curve.add(&pa, &pa.negate()).unwrap().is_identity());
        }

        #[test]
        fn zero_and_one_are_trivial(id in curve_strategy(), k in scalar_strategy()) {
            let curve = id.curve();
            let point = curve.scalar_mul(&k, curve.generator()).unwrap();
            prop_assert!(curve.scalar_mul(&BigUint::zero(), &point).unwrap().is_identity());
            prop_assert_eq!(curve.scalar_mul(&BigUint::one(), &point).unwrap(), point);
        }

        #[test]
        fn y_only_ladder_matches_full_ladder(
            id in curve_strategy(),
            k in scalar_strategy(),
            m in scalar_strategy(),
        ) {
            let curve = id.curve();
            let point = curve.scalar_mul(&m, curve.generator()).unwrap();
            let expected = curve.scalar_mul(&k, &point).unwrap();
            prop_assert_eq!(curve.scalar_mul_y(&k, point.y()), Some(expected.y().clone()));
        }

        #[test]
        fn points_for_y_recovers_both_roots(id in curve_strategy(), k in scalar_strategy()) {
            let curve = id.curve();
            let point = curve.scalar_mul(&k, curve.generator()).unwrap();
            let (p1, p2) = curve.points_for_y(point.y()).unwrap();

            prop_assert_eq!(p1.y(), point.y());
            prop_assert_eq!(p2.y(), point.y());
            prop_assert!(curve.is_on_curve(&p1) && curve.is_on_curve(&p2));
            prop_assert_eq!(modular::add(p1.x(), p2.x(), curve.p()), BigUint::zero());
            prop_assert!(p1 == point || p2 == point);
        }

        #[test]
        fn mul_add_y_contains_the_full_result(
            id in curve_strategy(),
            a in scalar_strategy(),
            b in scalar_strategy(),
            k in scalar_strategy(),
        ) {
            let curve = id.curve();
            let g = curve.generator();
            let p2 = curve.scalar_mul(&k, g).unwrap();
            let full = curve.mul_add(&a, g, &b, &p2).unwrap();
            let (c1, c2) = curve.mul_add_y(&a, g, &b, p2.y()).unwrap();
            prop_assert!(full == c1 || full == c2);
        }
    }
}
