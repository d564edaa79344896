//! Engine error types.

use thiserror::Error;
use trellis_crypto::CryptoError;
use trellis_proto::{EncodingError, ProtocolId};

use crate::{backend::FaultPoint, channel::ChannelKind};

/// Failure reported by a collaborator (identity store, channel dispatcher,
/// freshness store, instance store).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Owner identity is not provisioned on this device.
    #[error("unknown owner identity")]
    UnknownOwner,

    /// Identity is not a contact of the owner.
    #[error("contact not found")]
    ContactNotFound,

    /// Identity is already a contact of the owner.
    #[error("contact already exists")]
    ContactAlreadyExists,

    /// Contact deletion refused while the contact is a group member.
    #[error("contact is still a member of a group")]
    ContactStillInAGroup,

    /// Group unknown to the owner.
    #[error("group not found")]
    GroupNotFound,

    /// Concurrent transaction committed a conflicting change.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Collaborator unreachable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Failure injected by a test fault plan.
    #[error("injected fault at {0:?}")]
    Injected(FaultPoint),
}

/// Why a step could not complete. Any `StepError` cancels the instance.
#[derive(Debug, Error)]
pub enum StepError {
    /// A condition the step cannot proceed without does not hold.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Critical collaborator failure.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Signature, key or sealing failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Outgoing message could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl StepError {
    /// Shorthand for [`StepError::Precondition`].
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition(reason.into())
    }
}

/// Errors from engine operations.
///
/// All of these leave the addressed instance untouched: the message is
/// rejected before any step runs. A step failing *during* execution is not an
/// error here, it is reported as a cancelled instance.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Envelope bytes are malformed.
    #[error("malformed envelope: {0}")]
    Decode(#[from] EncodingError),

    /// Payload does not decode as a message of the addressed protocol.
    #[error("malformed payload: {reason}")]
    Payload {
        /// Decoder diagnostic.
        reason: String,
    },

    /// No protocol registered under this id.
    #[error("unknown protocol: {0}")]
    UnknownProtocol(ProtocolId),

    /// Message arrived through a channel kind its step does not accept.
    #[error("step {step} expects {expected}, message arrived via {actual}")]
    UnexpectedChannel {
        /// Step the message resolved to.
        step: &'static str,
        /// Declared channel kind.
        expected: ChannelKind,
        /// Observed channel kind.
        actual: ChannelKind,
    },

    /// Sender is not who the step expects.
    #[error("step {step} rejected sender: {reason}")]
    UnexpectedSender {
        /// Step the message resolved to.
        step: &'static str,
        /// Which check failed.
        reason: &'static str,
    },

    /// Instance already reached a terminal state.
    #[error("instance already terminated")]
    InstanceTerminated,

    /// Instance does not exist.
    #[error("instance not found")]
    InstanceNotFound,

    /// Message needs a running instance and none exists yet.
    ///
    /// Only initial messages create instances. The transport may redeliver
    /// the message once an earlier one has started the instance.
    #[error("no running instance for message {message}")]
    UnknownInstance {
        /// Message id that has no step from the initial state.
        message: u8,
    },

    /// Too many out-of-order messages waiting for this instance.
    #[error("parked message limit reached ({limit})")]
    TooManyParked {
        /// Configured bound.
        limit: usize,
    },

    /// Per-instance lock poisoned by a panicking holder.
    #[error("instance lock poisoned")]
    LockPoisoned,

    /// Collaborator failure outside a step.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Message for a protocol start could not be built.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl ProtocolError {
    /// Returns true if this error is fatal for the message.
    ///
    /// Fatal errors mean the message can never be accepted: retrying the same
    /// bytes yields the same rejection. Transient errors may succeed later.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Decode(_)
            | Self::Payload { .. }
            | Self::UnknownProtocol(_)
            | Self::UnexpectedChannel { .. }
            | Self::UnexpectedSender { .. }
            | Self::InstanceTerminated
            | Self::InstanceNotFound
            | Self::Encoding(_) => true,

            Self::UnknownInstance { .. }
            | Self::TooManyParked { .. }
            | Self::LockPoisoned
            | Self::Backend(_) => false,
        }
    }
}
