//! Mutual scan trust establishment.
//!
//! Bob shows a code with his identity and his signature over
//! `"mutualScan" || bob || alice`; Alice scans it. Alice sends the signature
//! back to Bob on the asymmetric channel, Bob checks it is his own and fresh,
//! adds Alice and confirms. Each side tells its other devices.
//!
//! ```text
//!   Alice                                  Bob
//!   Initial{bob, sig}  (local)
//!   ── AliceSendsSignatureToBob ────────▶  BobChecksSignatureAndAddsContact
//!   ── AlicePropagatesQuery ─▶ own devs    ── BobPropagatesSignature ─▶ own devs
//!   AliceAddsContact  ◀──────────────────  ── BobSendsConfirmation
//! ```
//!
//! The signature is recorded in the freshness store before Bob does anything
//! else, so a replayed query cancels instead of adding the contact twice.

use std::collections::BTreeSet;

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use trellis_crypto::{CryptoError, Signature, signature};
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
    identity::{ContactDetails, DeviceUid, Identity, OwnedIdentity, TrustOrigin},
    notification::ProtocolNotification,
};

const CONTEXT: &[u8] = b"mutualScan";

/// Bytes Bob signs to invite Alice.
pub fn invitation_payload(bob: &Identity, alice: &Identity) -> Vec<u8> {
    let len = CONTEXT.len() + bob.as_bytes().len() + alice.as_bytes().len();
    let mut payload = Vec::with_capacity(len);
    payload.extend_from_slice(CONTEXT);
    payload.extend_from_slice(bob.as_bytes());
    payload.extend_from_slice(alice.as_bytes());
    payload
}

/// Bob's signature inviting `alice`, as shown in his code.
pub fn sign_invitation<R: RngCore + CryptoRng + ?Sized>(
    bob: &OwnedIdentity,
    alice: &Identity,
    rng: &mut R,
) -> Result<Vec<u8>, CryptoError> {
    let payload = invitation_payload(&bob.identity, alice);
    Ok(signature::sign(&bob.signing.private, &payload, rng)?.as_bytes().to_vec())
}

/// Check that `bob` invited `alice`.
pub fn verify_invitation(
    bob: &Identity,
    alice: &Identity,
    signature: &[u8],
) -> Result<(), CryptoError> {
    let key = bob.signature_key();
    let signature = Signature::from_bytes(key.curve(), signature)?;
    signature::verify(key, &invitation_payload(bob, alice), &signature)
}

/// Mutual scan protocol.
#[derive(Debug, Clone, Copy)]
pub struct MutualScan;

/// Intermediate state of a mutual scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutualScanState {
    /// Alice sent the signature and waits for Bob.
    WaitingForConfirmation {
        /// Scanned identity.
        bob: Identity,
        /// Bob's invitation signature.
        signature: Vec<u8>,
    },
}

impl ProtocolState for MutualScanState {
    fn id(&self) -> u8 {
        match self {
            Self::WaitingForConfirmation { .. } => WAITING_FOR_CONFIRMATION,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::WaitingForConfirmation { .. } => "WaitingForConfirmation",
        }
    }
}

/// Messages of the mutual scan protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutualScanMessage {
    /// Local: Alice scanned Bob's code.
    Initial {
        /// Scanned identity.
        bob: Identity,
        /// Signature from the code.
        signature: Vec<u8>,
    },
    /// Alice to Bob's devices, asymmetric.
    AliceSendsSignatureToBob {
        /// Alice's identity.
        alice: Identity,
        /// Bob's invitation signature.
        signature: Vec<u8>,
        /// Alice's published details.
        details: ContactDetails,
        /// All of Alice's devices.
        device_uids: BTreeSet<DeviceUid>,
    },
    /// Alice to her other devices.
    AlicePropagatesQuery {
        /// Scanned identity.
        bob: Identity,
        /// Bob's invitation signature.
        signature: Vec<u8>,
    },
    /// Bob to his other devices.
    BobPropagatesSignature {
        /// Alice's identity.
        alice: Identity,
        /// Bob's invitation signature.
        signature: Vec<u8>,
        /// Alice's published details.
        details: ContactDetails,
        /// All of Alice's devices.
        device_uids: BTreeSet<DeviceUid>,
    },
    /// Bob to Alice's devices, asymmetric.
    BobSendsConfirmation {
        /// Bob's published details.
        details: ContactDetails,
        /// All of Bob's devices.
        device_uids: BTreeSet<DeviceUid>,
    },
}

impl MutualScanMessage {
    /// Id of [`Self::Initial`].
    pub const INITIAL: u8 = 0;
    /// Id of [`Self::AliceSendsSignatureToBob`].
    pub const ALICE_SENDS_SIGNATURE: u8 = 1;
    /// Id of [`Self::AlicePropagatesQuery`].
    pub const ALICE_PROPAGATES_QUERY: u8 = 2;
    /// Id of [`Self::BobPropagatesSignature`].
    pub const BOB_PROPAGATES_SIGNATURE: u8 = 3;
    /// Id of [`Self::BobSendsConfirmation`].
    pub const BOB_SENDS_CONFIRMATION: u8 = 4;
}

impl ProtocolPayload for MutualScanMessage {
    fn id(&self) -> u8 {
        match self {
            Self::Initial { .. } => Self::INITIAL,
            Self::AliceSendsSignatureToBob { .. } => Self::ALICE_SENDS_SIGNATURE,
            Self::AlicePropagatesQuery { .. } => Self::ALICE_PROPAGATES_QUERY,
            Self::BobPropagatesSignature { .. } => Self::BOB_PROPAGATES_SIGNATURE,
            Self::BobSendsConfirmation { .. } => Self::BOB_SENDS_CONFIRMATION,
        }
    }
}

const WAITING_FOR_CONFIRMATION: u8 = 1;

impl Protocol for MutualScan {
    const ID: ProtocolId = ProtocolId(2);
    const NAME: &'static str = "mutual scan";

    type State = MutualScanState;
    type Message = MutualScanMessage;

    fn steps() -> Vec<Step<Self>> {
        vec![
            Step {
                name: "AliceSendsSignatureToBob",
                from_state: INITIAL_STATE,
                message: MutualScanMessage::INITIAL,
                channel: ChannelKind::Local,
                sender: ExpectedSender::Owner,
                run: alice_sends_signature,
            },
            Step {
                name: "AliceHandlesPropagatedQuery",
                from_state: INITIAL_STATE,
                message: MutualScanMessage::ALICE_PROPAGATES_QUERY,
                channel: ChannelKind::OwnedDevice,
                sender: ExpectedSender::Owner,
                run: alice_handles_propagated_query,
            },
            Step {
                name: "BobChecksSignatureAndAddsContact",
                from_state: INITIAL_STATE,
                message: MutualScanMessage::ALICE_SENDS_SIGNATURE,
                channel: ChannelKind::Asymmetric,
                sender: ExpectedSender::Unauthenticated,
                run: bob_checks_signature,
            },
            Step {
                name: "BobHandlesPropagatedSignature",
                from_state: INITIAL_STATE,
                message: MutualScanMessage::BOB_PROPAGATES_SIGNATURE,
                channel: ChannelKind::OwnedDevice,
                sender: ExpectedSender::Owner,
                run: bob_handles_propagated_signature,
            },
            Step {
                name: "AliceAddsContact",
                from_state: WAITING_FOR_CONFIRMATION,
                message: MutualScanMessage::BOB_SENDS_CONFIRMATION,
                channel: ChannelKind::Asymmetric,
                sender: ExpectedSender::Unauthenticated,
                run: alice_adds_contact,
            },
        ]
    }
}

type StepResult = Result<Next<MutualScanState>, StepError>;

fn unexpected(step: &str) -> StepError {
    StepError::precondition(format!("{step} received an unexpected message"))
}

fn alice_sends_signature(
    _state: Option<MutualScanState>,
    message: MutualScanMessage,
    ctx: &mut StepContext<'_>,
) -> StepResult {
    let MutualScanMessage::Initial { bob, signature } = message else {
        return Err(unexpected("AliceSendsSignatureToBob"));
    };
    let alice = ctx.owner();
    verify_invitation(&bob, alice, &signature)?;

    let details = ctx.backend().owned_details(alice)?;
    let others = ctx.backend().other_device_uids(alice)?;
    let mut device_uids = others.clone();
    device_uids.insert(ctx.backend().current_device_uid(alice)?);

    ctx.send(
        SendChannel::AsymmetricBroadcast { remote: bob.clone() },
        &MutualScanMessage::AliceSendsSignatureToBob {
            alice: alice.clone(),
            signature: signature.clone(),
            details,
            device_uids,
        },
    )?;
    if !others.is_empty() {
        ctx.send(SendChannel::AllOwnedDevices, &MutualScanMessage::AlicePropagatesQuery {
            bob: bob.clone(),
            signature: signature.clone(),
        })?;
    }

    Ok(Next::State(MutualScanState::WaitingForConfirmation { bob, signature }))
}

fn alice_handles_propagated_query(
    _state: Option<MutualScanState>,
    message: MutualScanMessage,
    ctx: &mut StepContext<'_>,
) -> StepResult {
    let MutualScanMessage::AlicePropagatesQuery { bob, signature } = message else {
        return Err(unexpected("AliceHandlesPropagatedQuery"));
    };
    verify_invitation(&bob, ctx.owner(), &signature)?;
    Ok(Next::State(MutualScanState::WaitingForConfirmation { bob, signature }))
}

fn bob_checks_signature(
    _state: Option<MutualScanState>,
    message: MutualScanMessage,
    ctx: &mut StepContext<'_>,
) -> StepResult {
    let MutualScanMessage::AliceSendsSignatureToBob { alice, signature, details, device_uids } =
        message
    else {
        return Err(unexpected("BobChecksSignatureAndAddsContact"));
    };
    let bob = ctx.owner();

    accept_signature(ctx, &alice, &signature)?;
    add_scanned_contact(ctx, &alice, &details, &device_uids)?;

    let others = ctx.backend().other_device_uids(bob)?;
    if !others.is_empty() {
        ctx.send(SendChannel::AllOwnedDevices, &MutualScanMessage::BobPropagatesSignature {
            alice: alice.clone(),
            signature: signature.clone(),
            details,
            device_uids: device_uids.clone(),
        })?;
    }

    let mut own_devices = others;
    own_devices.insert(ctx.backend().current_device_uid(bob)?);
    let own_details = ctx.backend().owned_details(bob)?;
    ctx.send(
        SendChannel::Asymmetric { remote: alice.clone(), devices: device_uids },
        &MutualScanMessage::BobSendsConfirmation { details: own_details, device_uids: own_devices },
    )?;

    ctx.notify(ProtocolNotification::MutualScanContactAdded {
        owner: bob.clone(),
        contact: alice,
        signature,
    });
    Ok(Next::Finished)
}

fn bob_handles_propagated_signature(
    _state: Option<MutualScanState>,
    message: MutualScanMessage,
    ctx: &mut StepContext<'_>,
) -> StepResult {
    let MutualScanMessage::BobPropagatesSignature { alice, signature, details, device_uids } =
        message
    else {
        return Err(unexpected("BobHandlesPropagatedSignature"));
    };

    accept_signature(ctx, &alice, &signature)?;
    add_scanned_contact(ctx, &alice, &details, &device_uids)?;

    ctx.notify(ProtocolNotification::MutualScanContactAdded {
        owner: ctx.owner().clone(),
        contact: alice,
        signature,
    });
    Ok(Next::Finished)
}

fn alice_adds_contact(
    state: Option<MutualScanState>,
    message: MutualScanMessage,
    ctx: &mut StepContext<'_>,
) -> StepResult {
    let Some(MutualScanState::WaitingForConfirmation { bob, signature }) = state else {
        return Err(StepError::precondition(
            "AliceAddsContact fired outside WaitingForConfirmation",
        ));
    };
    let MutualScanMessage::BobSendsConfirmation { details, device_uids } = message else {
        return Err(unexpected("AliceAddsContact"));
    };

    add_scanned_contact(ctx, &bob, &details, &device_uids)?;
    ctx.notify(ProtocolNotification::MutualScanContactAdded {
        owner: ctx.owner().clone(),
        contact: bob,
        signature,
    });
    Ok(Next::Finished)
}

/// Bob's side: the signature must be his own invitation of `alice`, made
/// with the key this device holds, and never seen before. It is recorded
/// before any other effect.
fn accept_signature(
    ctx: &mut StepContext<'_>,
    alice: &Identity,
    signature: &[u8],
) -> Result<(), StepError> {
    let bob = ctx.owner();
    verify_invitation(bob, alice, signature)?;

    let own_key = ctx.backend().signing_key(bob)?.public_key()?;
    if &own_key != bob.signature_key() {
        return Err(StepError::precondition("signing key does not match the owner identity"));
    }

    if ctx.backend().exists(bob, signature)? {
        return Err(StepError::precondition("invitation signature already used"));
    }
    ctx.backend().record(bob, signature)?;
    Ok(())
}

/// Add `contact` unless known, then its devices. Devices are best-effort.
fn add_scanned_contact(
    ctx: &mut StepContext<'_>,
    contact: &Identity,
    details: &ContactDetails,
    device_uids: &BTreeSet<DeviceUid>,
) -> Result<(), StepError> {
    let owner = ctx.owner();
    if !ctx.backend().is_contact(owner, contact)? {
        ctx.backend().add_contact(owner, contact, details, TrustOrigin::MutualScan)?;
    }
    for device in device_uids {
        ctx.best_effort("add contact device", |ctx| {
            ctx.backend().add_device(owner, contact, *device)?;
            Ok(())
        });
    }
    Ok(())
}

impl<E, B> ProtocolEngine<E, B>
where
    E: Environment,
    B: ProtocolBackend,
{
    /// Alice scanned Bob's code: start a mutual scan on this device.
    pub fn start_mutual_scan(
        &self,
        owner: &Identity,
        bob: &Identity,
        signature: &[u8],
    ) -> Result<DispatchOutcome, ProtocolError> {
        self.start::<MutualScan>(owner, &MutualScanMessage::Initial {
            bob: bob.clone(),
            signature: signature.to_vec(),
        })
    }
}
