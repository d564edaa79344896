//! Deterministic simulation harness for the Trellis protocol engine.
//!
//! A [`SimWorld`] holds users with one or more devices each. Every device
//! runs its own engine and in-memory backend; the world carries messages
//! between them over a simulated network that can duplicate and reorder.
//!
//! Given the same seed a run makes the same choices (identities, instance
//! uids, delivery order, duplicates), so a failing property replays exactly.
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_harness::{NetworkFaults, SimWorld};
//!
//! let mut world = SimWorld::new(7, NetworkFaults::HOSTILE);
//! let alice = world.add_user("alice", 2)?;
//! let bob = world.add_user("bob", 2)?;
//!
//! world.start_mutual_scan(alice, 0, bob)?;
//! world.run(1_000)?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_env;
pub mod world;

pub use sim_env::SimEnv;
pub use world::{NetworkFaults, SimWorld, Stats, UserId, WorldError};
