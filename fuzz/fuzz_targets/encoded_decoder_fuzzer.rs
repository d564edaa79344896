//! Fuzz target for the [`Encoded`] decoder and the protocol envelope
//!
//! # Strategy
//!
//! - Raw bytes: arbitrary input straight into `Encoded::decode`
//! - Envelopes: the same bytes parsed as a `ProtocolMessage`
//!
//! # Invariants
//!
//! - NEVER panic, whatever the declared lengths or nesting depth
//! - Canonical: a decoded value re-encodes to exactly the input bytes
//! - A decoded envelope re-encodes and decodes to the same envelope

#![no_main]

use libfuzzer_sys::fuzz_target;
use trellis_proto::{Encoded, ProtocolMessage};

fuzz_target!(|data: &[u8]| {
    if let Ok(value) = Encoded::decode(data) {
        let bytes = value.to_bytes().expect("decoded value must re-encode");
        assert_eq!(bytes, data, "encoding is not canonical");
    }

    if let Ok(message) = ProtocolMessage::decode(data) {
        let bytes = message.encode().expect("decoded envelope must re-encode");
        let again = ProtocolMessage::decode(&bytes).expect("re-encoded envelope must decode");
        assert_eq!(again, message);
    }
});
