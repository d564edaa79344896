//! Trellis wire formats.
//!
//! Everything that crosses a device boundary is expressed with the types in
//! this crate:
//!
//! - [`Encoded`]: the self-describing tag-length-value codec used for keys,
//!   identities and protocol envelopes
//! - [`Uid`]: 32-byte identifiers (protocol instances, devices)
//! - [`ProtocolMessage`]: the envelope routed to a protocol instance
//!
//! # Format
//!
//! ```text
//! ┌──────────┬────────────────────┬─────────────────────┐
//! │ tag (u8) │ length (u32, BE)   │ content (length)    │
//! └──────────┴────────────────────┴─────────────────────┘
//! ```
//!
//! Decoding is bounds-checked and depth-limited: malformed input produces an
//! [`EncodingError`], never a panic.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod encoded;
mod error;
mod message;
mod uid;

pub use encoded::{Encoded, EncodedTag, MAX_DEPTH};
pub use error::EncodingError;
pub use message::{ProtocolId, ProtocolMessage};
pub use uid::{UID_SIZE, Uid};
