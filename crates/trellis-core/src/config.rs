//! Engine configuration.

/// Tunables for [`ProtocolEngine`](crate::ProtocolEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Out-of-order messages kept per instance while waiting for their step.
    ///
    /// Further messages are rejected with
    /// [`ProtocolError::TooManyParked`](crate::ProtocolError::TooManyParked).
    pub max_parked_messages: usize,

    /// Re-run parked messages after every successful transition.
    pub replay_parked: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { max_parked_messages: 16, replay_parked: true }
    }
}
