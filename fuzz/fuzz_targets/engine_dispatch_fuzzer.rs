//! Fuzz target for [`ProtocolEngine`] dispatch
//!
//! Drive one device's engine with arbitrary sequences of envelopes, channels
//! and aborts.
//!
//! # Strategy
//!
//! - Well-formed payloads of both protocols on the wrong channel, from the
//!   wrong sender, out of order and for a handful of instance uids
//! - Envelope ids that disagree with their payload
//! - Raw bytes through `dispatch`
//!
//! # Invariants
//!
//! - NEVER panic
//! - A terminated instance accepts nothing afterwards
//! - Rejected messages leave the backend exactly as it was
//! - Parked messages per instance never exceed the configured bound
//! - A message with no running instance is never parked
//! - Nothing is posted without a committed step

#![no_main]

use std::{collections::BTreeSet, sync::OnceLock};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use trellis_core::{
    ContactDetails, EngineConfig, Identity, MemoryBackend, OwnedIdentity, ProtocolEngine,
    ProtocolError, ReceptionChannel,
    backend::InstanceKey,
    protocol::{
        Protocol, envelope,
        contact_deletion::{ContactDeletion, ContactDeletionMessage},
        mutual_scan::{MutualScan, MutualScanMessage, sign_invitation},
    },
};
use trellis_crypto::CurveId;
use trellis_harness::SimEnv;
use trellis_proto::{ProtocolId, ProtocolMessage, Uid};

const MAX_PARKED: usize = 4;

struct Cast {
    owner: OwnedIdentity,
    contact: OwnedIdentity,
    stranger: OwnedIdentity,
    invitation: Vec<u8>,
}

/// Identities are expensive to generate: build them once per process.
fn cast() -> &'static Cast {
    static CAST: OnceLock<Cast> = OnceLock::new();
    CAST.get_or_init(|| {
        let mut rng = ChaCha20Rng::seed_from_u64(0xf022);
        let owner = OwnedIdentity::generate("o", CurveId::Curve25519, &mut rng).expect("owner");
        let contact = OwnedIdentity::generate("c", CurveId::Curve25519, &mut rng).expect("contact");
        let stranger =
            OwnedIdentity::generate("s", CurveId::Curve25519, &mut rng).expect("stranger");
        let invitation =
            sign_invitation(&contact, &owner.identity, &mut rng).expect("invitation");
        Cast { owner, contact, stranger, invitation }
    })
}

fn uid(n: u8) -> Uid {
    Uid::from_bytes([n; 32])
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Who {
    Contact,
    Stranger,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Channel {
    Local,
    Secure(Who),
    OwnedDevice { known: bool },
    Asymmetric,
}

#[derive(Debug, Clone, Arbitrary)]
enum Payload {
    Initiate(Who),
    Notification,
    Propagate(Who),
    ScanInitial { valid: bool },
    AliceSends(Who),
    AlicePropagates,
    BobPropagates(Who),
    BobConfirms,
    Raw { protocol: u8, message_id: u8, payload: Vec<u8> },
}

#[derive(Debug, Clone, Arbitrary)]
enum Event {
    Deliver { instance: u8, channel: Channel, payload: Payload, bad_id: bool },
    Bytes { channel: Channel, bytes: Vec<u8> },
    Abort { scan: bool, instance: u8 },
}

fn identity(who: Who) -> Identity {
    match who {
        Who::Contact => cast().contact.identity.clone(),
        Who::Stranger => cast().stranger.identity.clone(),
    }
}

fn channel(channel: Channel) -> ReceptionChannel {
    match channel {
        Channel::Local => ReceptionChannel::Local,
        Channel::Secure(who) => {
            ReceptionChannel::SecureChannel { remote: identity(who), remote_device: uid(2) }
        },
        Channel::OwnedDevice { known } => {
            ReceptionChannel::OwnedDevice { remote_device: if known { uid(3) } else { uid(9) } }
        },
        Channel::Asymmetric => ReceptionChannel::Asymmetric,
    }
}

fn message(instance: Uid, payload: Payload) -> Option<ProtocolMessage> {
    let c = cast();
    let devices: BTreeSet<Uid> = [uid(2)].into_iter().collect();
    let built = match payload {
        Payload::Initiate(who) => envelope::<ContactDeletion>(
            instance,
            &ContactDeletionMessage::InitiateContactDeletion { contact: identity(who) },
        ),
        Payload::Notification => envelope::<ContactDeletion>(
            instance,
            &ContactDeletionMessage::ContactDeletionNotification,
        ),
        Payload::Propagate(who) => envelope::<ContactDeletion>(
            instance,
            &ContactDeletionMessage::PropagateContactDeletion { contact: identity(who) },
        ),
        Payload::ScanInitial { valid } => {
            let mut signature = c.invitation.clone();
            if !valid {
                signature[0] ^= 1;
            }
            envelope::<MutualScan>(instance, &MutualScanMessage::Initial {
                bob: c.contact.identity.clone(),
                signature,
            })
        },
        Payload::AliceSends(who) => envelope::<MutualScan>(
            instance,
            &MutualScanMessage::AliceSendsSignatureToBob {
                alice: identity(who),
                signature: c.invitation.clone(),
                details: ContactDetails::named("alice"),
                device_uids: devices,
            },
        ),
        Payload::AlicePropagates => envelope::<MutualScan>(
            instance,
            &MutualScanMessage::AlicePropagatesQuery {
                bob: c.contact.identity.clone(),
                signature: c.invitation.clone(),
            },
        ),
        Payload::BobPropagates(who) => envelope::<MutualScan>(
            instance,
            &MutualScanMessage::BobPropagatesSignature {
                alice: identity(who),
                signature: c.invitation.clone(),
                details: ContactDetails::named("alice"),
                device_uids: devices,
            },
        ),
        Payload::BobConfirms => envelope::<MutualScan>(
            instance,
            &MutualScanMessage::BobSendsConfirmation {
                details: ContactDetails::named("bob"),
                device_uids: devices,
            },
        ),
        Payload::Raw { protocol, message_id, payload } => Ok(ProtocolMessage {
            protocol_id: ProtocolId(u16::from(protocol % 4)),
            instance_uid: instance,
            message_id,
            payload,
        }),
    };
    built.ok()
}

/// Everything a rejected message must leave untouched.
fn snapshot(backend: &MemoryBackend, owner: &Identity) -> (u64, usize, Vec<Identity>) {
    (backend.commit_count(), backend.outbox_len(), backend.contacts(owner))
}

fuzz_target!(|events: Vec<Event>| {
    let c = cast();
    let owner = c.owner.identity.clone();

    let backend = MemoryBackend::new();
    backend.register_owner(&c.owner, ContactDetails::named("owner"), uid(1));
    backend.add_owned_device(&owner, uid(3)).expect("owned device");
    backend
        .add_contact(&owner, &c.contact.identity, ContactDetails::named("contact"), [uid(2)])
        .expect("contact");
    backend.open_channel(&owner, &c.contact.identity, uid(2)).expect("channel");

    let config = EngineConfig { max_parked_messages: MAX_PARKED, ..EngineConfig::default() };
    let engine = ProtocolEngine::new(SimEnv::with_seed(0), backend.clone(), config);

    for event in events.into_iter().take(64) {
        let before = snapshot(&backend, &owner);
        let (ch, message) = match event {
            Event::Deliver { instance, channel, payload, bad_id } => {
                let Some(mut message) = message(uid(instance % 4), payload) else {
                    continue;
                };
                if bad_id {
                    message.message_id = message.message_id.wrapping_add(1);
                }
                (channel, message)
            },
            Event::Bytes { channel: ch, bytes } => {
                if engine.dispatch(&owner, channel(ch), &bytes).is_err() {
                    assert_eq!(snapshot(&backend, &owner), before, "rejected bytes changed state");
                }
                continue;
            },
            Event::Abort { scan, instance } => {
                let protocol = if scan { MutualScan::ID } else { ContactDeletion::ID };
                let _ = engine.abort(&owner, protocol, uid(instance % 4));
                continue;
            },
        };

        let key = InstanceKey {
            owner: owner.clone(),
            protocol: message.protocol_id,
            uid: message.instance_uid,
        };
        let was_terminated = backend.is_terminated(&key);

        let result = engine.deliver(&owner, channel(ch), message);
        if result.is_err() {
            assert_eq!(snapshot(&backend, &owner), before, "rejection changed state");
        }
        if was_terminated {
            assert!(result.is_err(), "terminated instance accepted a message");
            assert!(backend.is_terminated(&key), "tombstone disappeared");
        }
        if matches!(result, Err(ProtocolError::UnknownInstance { .. })) {
            assert_eq!(backend.parked_count(&key), 0, "orphan message was parked");
        }
        assert!(backend.parked_count(&key) <= MAX_PARKED);
    }
});
