//! Trellis protocol engine.
//!
//! Sans-IO core that drives multi-step secure protocols (contact deletion,
//! mutual scan trust establishment) between identities and their devices.
//!
//! # Architecture
//!
//! - [`ProtocolEngine`]: routes envelopes to protocol steps, checks the
//!   declared channel kind and sender, runs the step in a backend transaction
//! - [`backend`]: transaction-bound collaborator traits (identity store,
//!   channel dispatcher, freshness store, instance store) and an in-memory
//!   implementation
//! - [`Environment`]: the only entropy source; seeded in simulation
//!
//! The engine never performs I/O. Messages a step emits are posted through
//! the transaction and become visible in the dispatcher once it commits.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backend;
pub mod channel;
pub mod config;
pub mod env;
pub mod error;
pub mod identity;
pub mod notification;
pub mod protocol;

pub use backend::{MemoryBackend, ProtocolBackend};
pub use channel::{ChannelKind, OutgoingMessage, ReceptionChannel, SendChannel};
pub use config::EngineConfig;
pub use env::{EnvRng, Environment, SystemEnv};
pub use error::{BackendError, ProtocolError, StepError};
pub use identity::{ContactDetails, DeviceUid, GroupUid, Identity, OwnedIdentity, TrustOrigin};
pub use notification::ProtocolNotification;
pub use protocol::{DispatchOutcome, InstanceStatus, ProtocolEngine};
