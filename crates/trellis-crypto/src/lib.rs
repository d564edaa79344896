//! Trellis cryptographic core.
//!
//! Twisted Edwards-curve arithmetic over arbitrary-precision integers, and the
//! key material built on top of it.
//!
//! # Layers
//!
//! - [`modular`]: canonical modular arithmetic (`[0, m)` results, value
//!   semantics) including square roots for the supported primes
//! - [`Curve`] / [`CurveId`]: the two parameter sets and the arithmetic engine
//!   (validation, addition, Montgomery-ladder scalar multiplication, y-only
//!   multiplication, point recovery, low-order detection)
//! - [`PrivateKey`] / [`PublicKey`]: keys with canonical [`Encoded`] forms and
//!   the compact `[tag] || y` form
//! - [`signature`]: Schnorr signatures used as proofs of consent
//! - [`kem`]: y-coordinate key agreement and sealed boxes
//!
//! # Design
//!
//! Every operation is pure. Randomness is always supplied by the caller as a
//! [`rand::CryptoRng`], so simulations can seed it and production code can
//! back it with the operating system.
//!
//! Mathematical impossibilities (no inverse, no square root) surface as
//! `None` from the arithmetic call that met them. Data decoded from the wire is
//! always validated against the curve equation and rejected when it has low
//! order.
//!
//! [`Encoded`]: trellis_proto::Encoded

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod curve;
mod error;
pub mod kem;
mod keys;
pub mod modular;
mod point;
pub mod signature;

pub use curve::{Curve, CurveId};
pub use error::CryptoError;
pub use keys::{KeyPair, PrivateKey, PublicKey};
pub use point::Point;
pub use signature::Signature;
