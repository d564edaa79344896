//! Contact deletion.
//!
//! The owner deletes a contact on one device; the contact and the owner's
//! other devices are told over their secure channels and clean up locally.
//!
//! | Step                                 | Message                       | Channel        |
//! |--------------------------------------|-------------------------------|----------------|
//! | `DeleteContact`                      | `InitiateContactDeletion`     | local          |
//! | `ProcessContactDeletionNotification` | `ContactDeletionNotification` | secure channel |
//! | `ProcessPropagatedContactDeletion`   | `PropagateContactDeletion`    | owned device   |
//!
//! All three fire from the initial state.
//!
//! Every step finishes the instance it runs in.

use serde::{Deserialize, Serialize};
use trellis_proto::ProtocolId;

use super::{
    DispatchOutcome, ExpectedSender, INITIAL_STATE, Next, Protocol, ProtocolEngine,
    ProtocolPayload, ProtocolState, Step, StepContext,
};
use crate::{
    backend::ProtocolBackend,
    channel::{ChannelKind, SendChannel},
    env::Environment,
    error::{ProtocolError, StepError},
    identity::Identity,
    notification::ProtocolNotification,
};

/// Contact deletion protocol.
#[derive(Debug, Clone, Copy)]
pub struct ContactDeletion;

/// Contact deletion has no intermediate state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContactDeletionState {}

impl ProtocolState for ContactDeletionState {
    fn id(&self) -> u8 {
        match *self {}
    }

    fn name(&self) -> &'static str {
        match *self {}
    }
}

/// Messages of the contact deletion protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactDeletionMessage {
    /// Local request to delete `contact`.
    InitiateContactDeletion {
        /// Contact to delete.
        contact: Identity,
    },
    /// Sent to the deleted contact.
    ContactDeletionNotification,
    /// Sent to the owner's other devices.
    PropagateContactDeletion {
        /// Deleted contact.
        contact: Identity,
    },
}

impl ContactDeletionMessage {
    /// Id of [`Self::InitiateContactDeletion`].
    pub const INITIATE: u8 = 0;
    /// Id of [`Self::ContactDeletionNotification`].
    pub const NOTIFICATION: u8 = 1;
    /// Id of [`Self::PropagateContactDeletion`].
    pub const PROPAGATE: u8 = 2;
}

impl ProtocolPayload for ContactDeletionMessage {
    fn id(&self) -> u8 {
        match self {
            Self::InitiateContactDeletion { .. } => Self::INITIATE,
            Self::ContactDeletionNotification => Self::NOTIFICATION,
            Self::PropagateContactDeletion { .. } => Self::PROPAGATE,
        }
    }
}

impl Protocol for ContactDeletion {
    const ID: ProtocolId = ProtocolId(1);
    const NAME: &'static str = "contact deletion";

    type State = ContactDeletionState;
    type Message = ContactDeletionMessage;

    fn steps() -> Vec<Step<Self>> {
        vec![
            Step {
                name: "DeleteContact",
                from_state: INITIAL_STATE,
                message: ContactDeletionMessage::INITIATE,
                channel: ChannelKind::Local,
                sender: ExpectedSender::Owner,
                run: delete_contact,
            },
            Step {
                name: "ProcessContactDeletionNotification",
                from_state: INITIAL_STATE,
                message: ContactDeletionMessage::NOTIFICATION,
                channel: ChannelKind::SecureChannel,
                sender: ExpectedSender::Contact,
                run: process_notification,
            },
            Step {
                name: "ProcessPropagatedContactDeletion",
                from_state: INITIAL_STATE,
                message: ContactDeletionMessage::PROPAGATE,
                channel: ChannelKind::OwnedDevice,
                sender: ExpectedSender::Owner,
                run: process_propagated,
            },
        ]
    }
}

type StepResult = Result<Next<ContactDeletionState>, StepError>;

fn delete_contact(
    _state: Option<ContactDeletionState>,
    message: ContactDeletionMessage,
    ctx: &mut StepContext<'_>,
) -> StepResult {
    let ContactDeletionMessage::InitiateContactDeletion { contact } = message else {
        return Err(StepError::precondition("expected InitiateContactDeletion"));
    };
    let owner = ctx.owner();

    if !ctx.backend().is_contact(owner, &contact)? {
        return Err(StepError::precondition(format!("{contact} is not a contact")));
    }

    if ctx.backend().channel_exists(owner, &contact)? {
        ctx.send(
            SendChannel::AllSecureChannelsWith { contact: contact.clone() },
            &ContactDeletionMessage::ContactDeletionNotification,
        )?;
    }
    if !ctx.backend().other_device_uids(owner)?.is_empty() {
        ctx.send(SendChannel::AllOwnedDevices, &ContactDeletionMessage::PropagateContactDeletion {
            contact: contact.clone(),
        })?;
    }

    forget_contact(ctx, &contact, true)?;
    ctx.notify(ProtocolNotification::ContactDeleted { owner: owner.clone(), contact });
    Ok(Next::Finished)
}

fn process_notification(
    _state: Option<ContactDeletionState>,
    _message: ContactDeletionMessage,
    ctx: &mut StepContext<'_>,
) -> StepResult {
    let Some(contact) = ctx.reception_channel().remote_identity() else {
        return Err(StepError::precondition("notification without a remote identity"));
    };

    forget_contact(ctx, contact, false)?;
    ctx.notify(ProtocolNotification::ContactDeleted {
        owner: ctx.owner().clone(),
        contact: contact.clone(),
    });
    Ok(Next::Finished)
}

fn process_propagated(
    _state: Option<ContactDeletionState>,
    message: ContactDeletionMessage,
    ctx: &mut StepContext<'_>,
) -> StepResult {
    let ContactDeletionMessage::PropagateContactDeletion { contact } = message else {
        return Err(StepError::precondition("expected PropagateContactDeletion"));
    };
    let owner = ctx.owner();

    // already gone on this device
    if !ctx.backend().is_contact(owner, &contact)? {
        return Ok(Next::Finished);
    }

    forget_contact(ctx, &contact, false)?;
    ctx.notify(ProtocolNotification::ContactDeleted { owner: owner.clone(), contact });
    Ok(Next::Finished)
}

/// Tear down channels, delete the contact, then withdraw its pending group
/// invitations. Only the last part is best-effort.
fn forget_contact(
    ctx: &mut StepContext<'_>,
    contact: &Identity,
    fail_if_still_in_a_group: bool,
) -> Result<(), StepError> {
    let owner = ctx.owner();
    let local_device = ctx.backend().current_device_uid(owner)?;
    let devices = ctx.backend().contact_device_uids(owner, contact)?;

    ctx.backend().delete_all_channels(owner, local_device, contact, &devices)?;
    ctx.backend().delete_contact(owner, contact, fail_if_still_in_a_group)?;

    ctx.best_effort("withdraw pending group invitations", |ctx| {
        for group in ctx.backend().pending_group_memberships(owner, contact)? {
            ctx.best_effort("remove pending group member", |ctx| {
                ctx.backend().remove_pending_group_member(owner, group, contact)?;
                Ok(())
            });
        }
        Ok(())
    });
    Ok(())
}

impl<E, B> ProtocolEngine<E, B>
where
    E: Environment,
    B: ProtocolBackend,
{
    /// Delete `contact` on this device and tell everyone concerned.
    pub fn start_contact_deletion(
        &self,
        owner: &Identity,
        contact: &Identity,
    ) -> Result<DispatchOutcome, ProtocolError> {
        self.start::<ContactDeletion>(owner, &ContactDeletionMessage::InitiateContactDeletion {
            contact: contact.clone(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::{Driver, ProtocolDriver, decode_cbor, encode_cbor};

    #[test]
    fn every_message_has_one_step() {
        let driver = Driver::<ContactDeletion>::new();
        for id in [
            ContactDeletionMessage::INITIATE,
            ContactDeletionMessage::NOTIFICATION,
            ContactDeletionMessage::PROPAGATE,
        ] {
            assert!(driver.resolve(INITIAL_STATE, id).is_some(), "no step for message {id}");
        }
        assert!(driver.resolve(1, ContactDeletionMessage::INITIATE).is_none());
    }

    #[test]
    fn notification_step_requires_secure_channel() {
        let driver = Driver::<ContactDeletion>::new();
        let step = driver.resolve(INITIAL_STATE, ContactDeletionMessage::NOTIFICATION).unwrap();
        assert_eq!(step.channel, ChannelKind::SecureChannel);
        assert_eq!(step.sender, ExpectedSender::Contact);
    }

    #[test]
    fn unit_message_survives_cbor() {
        let bytes = encode_cbor(&ContactDeletionMessage::ContactDeletionNotification).unwrap();
        let decoded: ContactDeletionMessage = decode_cbor(&bytes).unwrap();
        assert_eq!(decoded, ContactDeletionMessage::ContactDeletionNotification);
    }
}
