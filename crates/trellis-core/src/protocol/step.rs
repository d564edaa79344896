//! Per-invocation context handed to every step.

use tracing::warn;
use trellis_proto::{ProtocolId, ProtocolMessage, Uid};

use super::{ProtocolPayload, encode_cbor};
use crate::{
    backend::Transaction,
    channel::{OutgoingMessage, ReceptionChannel, SendChannel},
    env::SecureRng,
    error::StepError,
    identity::Identity,
    notification::ProtocolNotification,
};

/// Everything a step may touch.
///
/// All effects go through the instance's transaction, so they commit
/// together with the state transition or not at all. Notifications are
/// returned to the application only after that commit.
pub struct StepContext<'a> {
    owner: &'a Identity,
    protocol: ProtocolId,
    instance: Uid,
    step: &'static str,
    channel: &'a ReceptionChannel,
    txn: &'a mut dyn Transaction,
    rng: &'a mut dyn SecureRng,
    notifications: Vec<ProtocolNotification>,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        owner: &'a Identity,
        protocol: ProtocolId,
        instance: Uid,
        step: &'static str,
        channel: &'a ReceptionChannel,
        txn: &'a mut dyn Transaction,
        rng: &'a mut dyn SecureRng,
    ) -> Self {
        Self { owner, protocol, instance, step, channel, txn, rng, notifications: Vec::new() }
    }

    /// Identity running the instance.
    pub fn owner(&self) -> &'a Identity {
        self.owner
    }

    /// Instance uid.
    pub fn instance_uid(&self) -> Uid {
        self.instance
    }

    /// Channel the current message arrived through.
    pub fn reception_channel(&self) -> &'a ReceptionChannel {
        self.channel
    }

    /// Collaborators, bound to the instance's transaction.
    pub fn backend(&mut self) -> &mut dyn Transaction {
        &mut *self.txn
    }

    /// Entropy for signing and key generation.
    pub fn rng(&mut self) -> &mut dyn SecureRng {
        &mut *self.rng
    }

    /// Emit `message` of this protocol on `channel`.
    ///
    /// Messages leave in the order they are sent, once the transaction
    /// commits.
    pub fn send<M: ProtocolPayload>(
        &mut self,
        channel: SendChannel,
        message: &M,
    ) -> Result<(), StepError> {
        let payload = encode_cbor(message).map_err(StepError::Encoding)?;
        let outgoing = OutgoingMessage {
            owner: self.owner.clone(),
            channel,
            message: ProtocolMessage {
                protocol_id: self.protocol,
                instance_uid: self.instance,
                message_id: message.id(),
                payload,
            },
        };
        self.txn.post(outgoing)?;
        Ok(())
    }

    /// Queue a notification for the application.
    pub fn notify(&mut self, notification: ProtocolNotification) {
        self.notifications.push(notification);
    }

    /// Run an effect whose failure must not cancel the step.
    ///
    /// A failure is logged and `None` returned; the step goes on.
    pub fn best_effort<T>(
        &mut self,
        effect: &'static str,
        f: impl FnOnce(&mut Self) -> Result<T, StepError>,
    ) -> Option<T> {
        match f(self) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    step = self.step,
                    instance = ?self.instance,
                    effect,
                    error = %err,
                    "best-effort effect failed, continuing"
                );
                None
            },
        }
    }

    pub(crate) fn into_notifications(self) -> Vec<ProtocolNotification> {
        self.notifications
    }
}

impl std::fmt::Debug for StepContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("owner", &self.owner)
            .field("protocol", &self.protocol)
            .field("instance", &self.instance)
            .field("step", &self.step)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}
