//! Multi-step protocol machinery.
//!
//! A protocol is a library of [`Step`]s over a per-protocol state enum and a
//! per-protocol message enum. Each step statically declares the state it fires
//! from, the message it accepts, the channel kind the message must arrive
//! through and who may send it. The [`ProtocolEngine`] builds a
//! `(state id, message id) → step` table per protocol once, at construction,
//! and checks every declaration before a step runs.
//!
//! ## States
//!
//! - Initial: implicit, id [`INITIAL_STATE`], never persisted
//! - Intermediate: persisted as CBOR between messages
//! - Finished / Cancelled: terminal, the instance record is deleted and a
//!   tombstone rejects later messages

pub mod contact_deletion;
mod engine;
mod locks;
pub mod mutual_scan;
mod step;

use std::collections::HashMap;

use serde::{Serialize, de::DeserializeOwned};
use trellis_proto::{ProtocolId, ProtocolMessage};

pub use self::{
    engine::{DispatchOutcome, InstanceStatus, ProtocolEngine},
    step::StepContext,
};
use crate::{
    channel::ChannelKind,
    error::{BackendError, StepError},
};

/// State id of the implicit initial state.
pub const INITIAL_STATE: u8 = 0;

/// Persisted state of a protocol.
pub trait ProtocolState: Serialize + DeserializeOwned + Send + 'static {
    /// Discriminant used in the dispatch table. Never [`INITIAL_STATE`].
    fn id(&self) -> u8;

    /// Name for logs and [`InstanceStatus::InProgress`].
    fn name(&self) -> &'static str;
}

/// Message exchanged by a protocol.
pub trait ProtocolPayload: Serialize + DeserializeOwned + Send + 'static {
    /// Message id carried in the envelope.
    fn id(&self) -> u8;
}

/// A named protocol: its ids, types and steps.
pub trait Protocol: Sized + Send + Sync + 'static {
    /// Wire id.
    const ID: ProtocolId;

    /// Name for logs.
    const NAME: &'static str;

    /// Intermediate states.
    type State: ProtocolState;

    /// Messages.
    type Message: ProtocolPayload;

    /// Every step of the protocol.
    fn steps() -> Vec<Step<Self>>;
}

/// Who a step accepts messages from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedSender {
    /// The owner itself: local dispatch or one of its own devices.
    Owner,
    /// A contact, authenticated by the secure channel.
    Contact,
    /// Anyone; the step authenticates the payload itself.
    Unauthenticated,
}

/// What a step returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Next<S> {
    /// Persist `S` and wait for the next message.
    State(S),
    /// Terminal success.
    Finished,
}

/// Step body.
pub type StepFn<P> = fn(
    Option<<P as Protocol>::State>,
    <P as Protocol>::Message,
    &mut StepContext<'_>,
) -> Result<Next<<P as Protocol>::State>, StepError>;

/// Static declaration of one step.
pub struct Step<P: Protocol> {
    /// Name for logs.
    pub name: &'static str,
    /// State the step fires from.
    pub from_state: u8,
    /// Accepted message id.
    pub message: u8,
    /// Channel kind the message must arrive through.
    pub channel: ChannelKind,
    /// Expected sender.
    pub sender: ExpectedSender,
    /// Body.
    pub run: StepFn<P>,
}

impl<P: Protocol> std::fmt::Debug for Step<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("protocol", &P::NAME)
            .field("name", &self.name)
            .field("from_state", &self.from_state)
            .field("message", &self.message)
            .field("channel", &self.channel)
            .field("sender", &self.sender)
            .finish()
    }
}

/// Declarations of a resolved step, without its body.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StepInfo {
    pub index: usize,
    pub name: &'static str,
    pub channel: ChannelKind,
    pub sender: ExpectedSender,
}

/// Result of running an erased step.
#[derive(Debug)]
pub(crate) enum ErasedNext {
    State { id: u8, name: &'static str, bytes: Vec<u8> },
    Finished,
}

/// Why an erased step did not produce a transition.
#[derive(Debug)]
pub(crate) enum RunError {
    /// Payload does not decode; the message is rejected, the instance kept.
    Payload(String),
    /// The step failed; the instance is cancelled.
    Step(StepError),
}

/// Protocol with its types erased, as stored in the engine's registry.
pub(crate) trait ProtocolDriver: Send + Sync {
    fn id(&self) -> ProtocolId;

    fn name(&self) -> &'static str;

    fn resolve(&self, state_id: u8, message_id: u8) -> Option<StepInfo>;

    /// Check that the payload decodes as the envelope's message id.
    fn validate(&self, message: &ProtocolMessage) -> Result<(), String>;

    fn run(
        &self,
        step: usize,
        state: Option<&[u8]>,
        message: &ProtocolMessage,
        ctx: &mut StepContext<'_>,
    ) -> Result<ErasedNext, RunError>;
}

/// Dispatch table of one protocol.
pub(crate) struct Driver<P: Protocol> {
    steps: Vec<Step<P>>,
    table: HashMap<(u8, u8), usize>,
}

impl<P: Protocol> Driver<P> {
    pub(crate) fn new() -> Self {
        let steps = P::steps();
        let mut table = HashMap::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            // one (state, message) pair, one step: the first declaration wins
            table.entry((step.from_state, step.message)).or_insert(index);
        }
        Self { steps, table }
    }

    fn decode(message: &ProtocolMessage) -> Result<P::Message, String> {
        let decoded: P::Message = decode_cbor(&message.payload)?;
        if decoded.id() != message.message_id {
            return Err(format!(
                "payload is message {} but envelope says {}",
                decoded.id(),
                message.message_id
            ));
        }
        Ok(decoded)
    }
}

impl<P: Protocol> ProtocolDriver for Driver<P> {
    fn id(&self) -> ProtocolId {
        P::ID
    }

    fn name(&self) -> &'static str {
        P::NAME
    }

    fn resolve(&self, state_id: u8, message_id: u8) -> Option<StepInfo> {
        let index = *self.table.get(&(state_id, message_id))?;
        let step = self.steps.get(index)?;
        Some(StepInfo { index, name: step.name, channel: step.channel, sender: step.sender })
    }

    fn validate(&self, message: &ProtocolMessage) -> Result<(), String> {
        if !self.steps.iter().any(|s| s.message == message.message_id) {
            return Err(format!("{} has no message {}", P::NAME, message.message_id));
        }
        Self::decode(message).map(drop)
    }

    fn run(
        &self,
        step: usize,
        state: Option<&[u8]>,
        message: &ProtocolMessage,
        ctx: &mut StepContext<'_>,
    ) -> Result<ErasedNext, RunError> {
        let Some(step) = self.steps.get(step) else {
            return Err(RunError::Step(StepError::precondition("step index out of range")));
        };
        let payload = Self::decode(message).map_err(RunError::Payload)?;
        let state = state
            .map(decode_cbor::<P::State>)
            .transpose()
            .map_err(|e| RunError::Step(StepError::Backend(BackendError::Corrupt(e))))?;

        match (step.run)(state, payload, ctx).map_err(RunError::Step)? {
            Next::Finished => Ok(ErasedNext::Finished),
            Next::State(next) => {
                let bytes = encode_cbor(&next).map_err(|e| RunError::Step(StepError::Encoding(e)))?;
                Ok(ErasedNext::State { id: next.id(), name: next.name(), bytes })
            },
        }
    }
}

pub(crate) fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).map_err(|e| e.to_string())?;
    Ok(bytes)
}

pub(crate) fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    ciborium::de::from_reader(bytes).map_err(|e| e.to_string())
}

/// Build the envelope for `message` of protocol `P`.
pub fn envelope<P: Protocol>(
    instance_uid: trellis_proto::Uid,
    message: &P::Message,
) -> Result<ProtocolMessage, String> {
    Ok(ProtocolMessage {
        protocol_id: P::ID,
        instance_uid,
        message_id: message.id(),
        payload: encode_cbor(message)?,
    })
}
