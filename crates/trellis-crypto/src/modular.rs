//! Modular arithmetic over [`BigUint`].
//!
//! All results are canonical in `[0, m)`. Inputs may be unreduced; every
//! function reduces its operands first, so callers never observe a
//! representation outside the canonical range.

use num_bigint::BigUint;
use num_traits::{One, Zero};

/// `a + b mod m`.
pub fn add(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    (a + b) % m
}

/// `a - b mod m`.
pub fn sub(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    let a = a % m;
    let b = b % m;
    if a >= b { a - b } else { m - (b - a) }
}

/// `a · b mod m`.
pub fn mul(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    (a * b) % m
}

/// `-a mod m`.
pub fn neg(a: &BigUint, m: &BigUint) -> BigUint {
    let a = a % m;
    if a.is_zero() { a } else { m - a }
}

/// `a^e mod m`.
pub fn pow(a: &BigUint, e: &BigUint, m: &BigUint) -> BigUint {
    a.modpow(e, m)
}

/// Multiplicative inverse of `a` mod `m`.
///
/// `None` when `gcd(a, m) != 1`, which for a prime modulus only happens for
/// `a ≡ 0`.
pub fn inv(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let a = a % m;
    if a.is_zero() {
        return None;
    }
    a.modinv(m)
}

/// `a / b mod m`, i.e. `a · b⁻¹`.
pub fn div(a: &BigUint, b: &BigUint, m: &BigUint) -> Option<BigUint> {
    inv(b, m).map(|b_inv| mul(a, &b_inv, m))
}

/// Both square roots of `a` modulo the odd prime `p`.
///
/// The roots are additive inverses of each other (equal when `a ≡ 0`). Returns
/// `None` when `a` is a non-residue. Every candidate is verified by squaring
/// before it is returned.
pub fn sqrt(a: &BigUint, p: &BigUint) -> Option<(BigUint, BigUint)> {
    let a = a % p;
    if a.is_zero() {
        return Some((BigUint::zero(), BigUint::zero()));
    }

    let one = BigUint::one();
    let p_minus_one = p - &one;
    if pow(&a, &(&p_minus_one >> 1u32), p) != one {
        return None;
    }

    let root = match (low_bits(p, 2), low_bits(p, 3)) {
        (3, _) => sqrt_3_mod_4(&a, p),
        (_, 5) => sqrt_5_mod_8(&a, p),
        _ => tonelli_shanks(&a, p)?,
    };

    if mul(&root, &root, p) != a {
        return None;
    }
    let other = neg(&root, p);
    Some((root, other))
}

/// Whether `a` is a quadratic residue (or zero) modulo the odd prime `p`.
pub fn is_square(a: &BigUint, p: &BigUint) -> bool {
    let a = a % p;
    a.is_zero() || pow(&a, &((p - 1u32) >> 1u32), p).is_one()
}

/// Bit `i` of `a` (little-endian bit numbering).
pub fn bit(a: &BigUint, i: u64) -> bool {
    a.bit(i)
}

/// Number of significant bits of `a`.
pub fn bit_len(a: &BigUint) -> u64 {
    a.bits()
}

/// Big-endian encoding of `a` left-padded with zeros to exactly `len` bytes.
///
/// `None` when `a` needs more than `len` bytes.
pub fn to_fixed_be(a: &BigUint, len: usize) -> Option<Vec<u8>> {
    let bytes = a.to_bytes_be();
    if a.is_zero() {
        return Some(vec![0; len]);
    }
    if bytes.len() > len {
        return None;
    }
    let mut out = vec![0; len - bytes.len()];
    out.extend_from_slice(&bytes);
    Some(out)
}

/// Parse a big-endian magnitude.
pub fn from_be(bytes: &[u8]) -> BigUint {
    BigUint::from_bytes_be(bytes)
}

fn low_bits(a: &BigUint, n: u32) -> u32 {
    let mask = (1u32 << n) - 1;
    a.iter_u32_digits().next().map_or(0, |digit| digit & mask)
}

/// `p ≡ 3 (mod 4)`: `a^((p+1)/4)`.
fn sqrt_3_mod_4(a: &BigUint, p: &BigUint) -> BigUint {
    pow(a, &((p + 1u32) >> 2u32), p)
}

/// `p ≡ 5 (mod 8)`: Atkin's method.
fn sqrt_5_mod_8(a: &BigUint, p: &BigUint) -> BigUint {
    let two_a = add(a, a, p);
    let v = pow(&two_a, &((p - 5u32) >> 3u32), p);
    let i = mul(&two_a, &mul(&v, &v, p), p);
    let i_minus_one = sub(&i, &BigUint::one(), p);
    mul(&mul(a, &v, p), &i_minus_one, p)
}

/// Generic odd prime. `a` must be a non-zero residue.
fn tonelli_shanks(a: &BigUint, p: &BigUint) -> Option<BigUint> {
    let one = BigUint::one();
    let p_minus_one = p - &one;

    // p - 1 = q · 2^s with q odd
    let s = p_minus_one.trailing_zeros()?;
    let q = &p_minus_one >> s;

    let mut z = BigUint::from(2u32);
    while is_square(&z, p) {
        z += 1u32;
        if &z >= p {
            return None;
        }
    }

    let mut m = s;
    let mut c = pow(&z, &q, p);
    let mut t = pow(a, &q, p);
    let mut r = pow(a, &((&q + 1u32) >> 1u32), p);

    while !t.is_one() {
        // least i with t^(2^i) == 1
        let mut i = 0;
        let mut t2i = t.clone();
        while !t2i.is_one() {
            t2i = mul(&t2i, &t2i, p);
            i += 1;
            if i == m {
                return None;
            }
        }

        let b = pow(&c, &(BigUint::one() << (m - i - 1)), p);
        m = i;
        c = mul(&b, &b, p);
        t = mul(&t, &c, p);
        r = mul(&r, &b, p);
    }

    Some(r)
}
