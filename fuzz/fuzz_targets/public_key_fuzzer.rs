//! Fuzz target for public key decoding
//!
//! # Invariants
//!
//! - NEVER panic on malformed compact or encoded keys
//! - Every accepted key lies on its curve and is not of low order
//! - Compact form round-trips

#![no_main]

use libfuzzer_sys::fuzz_target;
use trellis_crypto::PublicKey;
use trellis_proto::Encoded;

fuzz_target!(|data: &[u8]| {
    if let Ok(key) = PublicKey::from_compact_bytes(data) {
        let curve = key.curve().curve();
        assert!(!curve.is_low_order_y(key.y()), "accepted a low-order key");
        let again = PublicKey::from_compact_bytes(&key.to_compact_bytes()).expect("round trip");
        assert_eq!(again, key);
    }

    if let Ok(encoded) = Encoded::decode(data) {
        if let Ok(key) = PublicKey::from_encoded(&encoded) {
            if let Some(point) = key.point() {
                assert!(key.curve().curve().is_on_curve(point), "accepted a point off the curve");
            }
        }
    }
});
