//! Mutual scan protocol tests
//!
//! Each device runs its own engine and backend; messages are routed by hand
//! from one device's outbox to another's `deliver`. Covers:
//! - The full exchange between single-device Alice and Bob
//! - Replays of Alice's query (same and fresh instance uid)
//! - Forged or misdirected signatures
//! - A confirmation that overtakes the propagated query on Alice's second
//!   device is refused until the query has started the instance

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use trellis_core::{
    ContactDetails, EngineConfig, InstanceStatus, MemoryBackend, OutgoingMessage, OwnedIdentity,
    ProtocolEngine, ProtocolError, ProtocolNotification, ReceptionChannel, SendChannel, SystemEnv,
    TrustOrigin,
    identity::DeviceUid,
    protocol::{
        envelope,
        mutual_scan::{MutualScan, MutualScanMessage, sign_invitation},
    },
};
use trellis_crypto::CurveId;
use trellis_proto::Uid;

fn uid(n: u8) -> Uid {
    Uid::from_bytes([n; 32])
}

struct Device {
    backend: MemoryBackend,
    engine: ProtocolEngine<SystemEnv, MemoryBackend>,
}

impl Device {
    fn new(owner: &OwnedIdentity, name: &str, current: DeviceUid, others: &[DeviceUid]) -> Self {
        let backend = MemoryBackend::new();
        backend.register_owner(owner, ContactDetails::named(name), current);
        for device in others {
            backend.add_owned_device(&owner.identity, *device).unwrap();
        }
        let engine =
            ProtocolEngine::new(SystemEnv::new(), backend.clone(), EngineConfig::default());
        Self { backend, engine }
    }

    fn sent(&self) -> Vec<OutgoingMessage> {
        self.backend.drain_outbox()
    }
}

struct Setup {
    rng: ChaCha20Rng,
    alice: OwnedIdentity,
    bob: OwnedIdentity,
}

fn generate(server: &str, rng: &mut ChaCha20Rng) -> OwnedIdentity {
    OwnedIdentity::generate(server, CurveId::Curve25519, rng).unwrap()
}

fn setup(seed: u64) -> Setup {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let alice = generate("https://a.example", &mut rng);
    let bob = generate("https://b.example", &mut rng);
    Setup { rng, alice, bob }
}

fn only(mut sent: Vec<OutgoingMessage>) -> OutgoingMessage {
    assert_eq!(sent.len(), 1, "expected a single outgoing message, got {sent:?}");
    sent.remove(0)
}

#[test]
fn full_exchange_adds_both_contacts() {
    let mut s = setup(1);
    let alice_dev = Device::new(&s.alice, "alice", uid(1), &[]);
    let bob_dev = Device::new(&s.bob, "bob", uid(2), &[]);
    let signature = sign_invitation(&s.bob, &s.alice.identity, &mut s.rng).unwrap();

    let started =
        alice_dev.engine.start_mutual_scan(&s.alice.identity, &s.bob.identity, &signature).unwrap();
    assert_eq!(started.status, InstanceStatus::InProgress { state: "WaitingForConfirmation" });
    assert!(started.notifications.is_empty());

    let query = only(alice_dev.sent());
    assert_eq!(query.channel, SendChannel::AsymmetricBroadcast { remote: s.bob.identity.clone() });
    assert_eq!(query.message.message_id, MutualScanMessage::ALICE_SENDS_SIGNATURE);
    assert_eq!(query.message.instance_uid, started.instance);

    let at_bob = bob_dev
        .engine
        .deliver(&s.bob.identity, ReceptionChannel::Asymmetric, query.message)
        .unwrap();
    assert_eq!(at_bob.status, InstanceStatus::Finished);
    assert_eq!(at_bob.notifications, vec![ProtocolNotification::MutualScanContactAdded {
        owner: s.bob.identity.clone(),
        contact: s.alice.identity.clone(),
        signature: signature.clone(),
    }]);
    assert!(bob_dev.backend.has_signature(&s.bob.identity, &signature));
    assert_eq!(
        bob_dev.backend.contact_details(&s.bob.identity, &s.alice.identity),
        Some((ContactDetails::named("alice"), TrustOrigin::MutualScan))
    );
    assert_eq!(
        bob_dev.backend.contact_devices(&s.bob.identity, &s.alice.identity),
        [uid(1)].into_iter().collect()
    );

    let confirmation = only(bob_dev.sent());
    assert_eq!(confirmation.channel, SendChannel::Asymmetric {
        remote: s.alice.identity.clone(),
        devices: [uid(1)].into_iter().collect(),
    });
    assert_eq!(confirmation.message.message_id, MutualScanMessage::BOB_SENDS_CONFIRMATION);

    let at_alice = alice_dev
        .engine
        .deliver(&s.alice.identity, ReceptionChannel::Asymmetric, confirmation.message)
        .unwrap();
    assert_eq!(at_alice.status, InstanceStatus::Finished);
    assert_eq!(at_alice.notifications, vec![ProtocolNotification::MutualScanContactAdded {
        owner: s.alice.identity.clone(),
        contact: s.bob.identity.clone(),
        signature,
    }]);
    assert_eq!(
        alice_dev.backend.contact_details(&s.alice.identity, &s.bob.identity),
        Some((ContactDetails::named("bob"), TrustOrigin::MutualScan))
    );
    assert_eq!(
        alice_dev.backend.contact_devices(&s.alice.identity, &s.bob.identity),
        [uid(2)].into_iter().collect()
    );

    assert!(alice_dev.sent().is_empty());
    assert_eq!(alice_dev.backend.instance_count(), 0);
    assert_eq!(bob_dev.backend.instance_count(), 0);
}

#[test]
fn replayed_query_adds_the_contact_once() {
    let mut s = setup(2);
    let alice_dev = Device::new(&s.alice, "alice", uid(1), &[]);
    let bob_dev = Device::new(&s.bob, "bob", uid(2), &[]);
    let signature = sign_invitation(&s.bob, &s.alice.identity, &mut s.rng).unwrap();

    alice_dev.engine.start_mutual_scan(&s.alice.identity, &s.bob.identity, &signature).unwrap();
    let query = only(alice_dev.sent()).message;

    let first = bob_dev
        .engine
        .deliver(&s.bob.identity, ReceptionChannel::Asymmetric, query.clone())
        .unwrap();
    assert_eq!(first.notifications.len(), 1);
    assert_eq!(bob_dev.sent().len(), 1);

    // same instance: tombstoned
    let same = bob_dev.engine.deliver(&s.bob.identity, ReceptionChannel::Asymmetric, query.clone());
    assert!(matches!(same, Err(ProtocolError::InstanceTerminated)));

    // fresh instance carrying the same signature: the freshness check cancels it
    let mut fresh = query;
    fresh.instance_uid = uid(99);
    let again =
        bob_dev.engine.deliver(&s.bob.identity, ReceptionChannel::Asymmetric, fresh).unwrap();
    assert!(matches!(again.status, InstanceStatus::Cancelled { .. }));
    assert!(again.notifications.is_empty());

    assert!(bob_dev.sent().is_empty(), "no second confirmation");
    assert_eq!(bob_dev.backend.contacts(&s.bob.identity), vec![s.alice.identity.clone()]);
}

#[test]
fn forged_invitation_is_refused_by_alice() {
    let mut s = setup(3);
    let eve = generate("https://e.example", &mut s.rng);
    let alice_dev = Device::new(&s.alice, "alice", uid(1), &[]);

    // Bob invited Eve, not Alice
    let signature = sign_invitation(&s.bob, &eve.identity, &mut s.rng).unwrap();
    let outcome =
        alice_dev.engine.start_mutual_scan(&s.alice.identity, &s.bob.identity, &signature).unwrap();

    assert!(matches!(outcome.status, InstanceStatus::Cancelled { .. }));
    assert_eq!(alice_dev.backend.outbox_len(), 0);
    assert_eq!(alice_dev.backend.instance_count(), 0);
}

#[test]
fn bob_rejects_signature_meant_for_someone_else() {
    let mut s = setup(4);
    let eve = generate("https://e.example", &mut s.rng);
    let bob_dev = Device::new(&s.bob, "bob", uid(2), &[]);

    // Eve relays the signature Bob made for Alice under her own identity
    let signature = sign_invitation(&s.bob, &s.alice.identity, &mut s.rng).unwrap();
    let message = envelope::<MutualScan>(uid(7), &MutualScanMessage::AliceSendsSignatureToBob {
        alice: eve.identity.clone(),
        signature: signature.clone(),
        details: ContactDetails::named("eve"),
        device_uids: [uid(5)].into_iter().collect(),
    })
    .unwrap();

    let outcome =
        bob_dev.engine.deliver(&s.bob.identity, ReceptionChannel::Asymmetric, message).unwrap();

    assert!(matches!(outcome.status, InstanceStatus::Cancelled { .. }));
    assert!(!bob_dev.backend.is_contact(&s.bob.identity, &eve.identity));
    assert!(!bob_dev.backend.has_signature(&s.bob.identity, &signature));
    assert_eq!(bob_dev.backend.outbox_len(), 0);
}

#[test]
fn query_over_a_secure_channel_is_rejected() {
    let mut s = setup(5);
    let alice_dev = Device::new(&s.alice, "alice", uid(1), &[]);
    let bob_dev = Device::new(&s.bob, "bob", uid(2), &[]);
    let signature = sign_invitation(&s.bob, &s.alice.identity, &mut s.rng).unwrap();

    alice_dev.engine.start_mutual_scan(&s.alice.identity, &s.bob.identity, &signature).unwrap();
    let query = only(alice_dev.sent()).message;

    let channel =
        ReceptionChannel::SecureChannel { remote: s.alice.identity.clone(), remote_device: uid(1) };
    let err = bob_dev.engine.deliver(&s.bob.identity, channel, query.clone()).unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedChannel { .. }));
    assert!(err.is_fatal());

    // the instance was not touched: the proper delivery still works
    assert!(!bob_dev.backend.has_signature(&s.bob.identity, &signature));
    let outcome =
        bob_dev.engine.deliver(&s.bob.identity, ReceptionChannel::Asymmetric, query).unwrap();
    assert_eq!(outcome.status, InstanceStatus::Finished);
}

#[test]
fn multi_device_exchange_reaches_every_device() {
    let mut s = setup(6);
    let alice_1 = Device::new(&s.alice, "alice", uid(1), &[uid(3)]);
    let alice_3 = Device::new(&s.alice, "alice", uid(3), &[uid(1)]);
    let bob_2 = Device::new(&s.bob, "bob", uid(2), &[uid(4)]);
    let bob_4 = Device::new(&s.bob, "bob", uid(4), &[uid(2)]);
    let signature = sign_invitation(&s.bob, &s.alice.identity, &mut s.rng).unwrap();

    alice_1.engine.start_mutual_scan(&s.alice.identity, &s.bob.identity, &signature).unwrap();
    let mut from_alice = alice_1.sent();
    assert_eq!(from_alice.len(), 2);
    let propagated_query = from_alice.pop().unwrap();
    let query = from_alice.pop().unwrap();
    assert_eq!(propagated_query.channel, SendChannel::AllOwnedDevices);
    assert_eq!(query.message.instance_uid, propagated_query.message.instance_uid);

    // Bob's first device handles the query
    let at_bob = bob_2
        .engine
        .deliver(&s.bob.identity, ReceptionChannel::Asymmetric, query.message.clone())
        .unwrap();
    assert_eq!(at_bob.status, InstanceStatus::Finished);
    let from_bob = bob_2.sent();
    assert_eq!(from_bob.len(), 2);
    assert_eq!(from_bob[0].channel, SendChannel::AllOwnedDevices);
    let confirmation = from_bob[1].clone();
    assert_eq!(confirmation.channel, SendChannel::Asymmetric {
        remote: s.alice.identity.clone(),
        devices: [uid(1), uid(3)].into_iter().collect(),
    });

    // Bob's second device learns from the propagation
    let at_bob_4 = bob_4
        .engine
        .deliver(
            &s.bob.identity,
            ReceptionChannel::OwnedDevice { remote_device: uid(2) },
            from_bob[0].message.clone(),
        )
        .unwrap();
    assert_eq!(at_bob_4.status, InstanceStatus::Finished);
    assert!(bob_4.backend.is_contact(&s.bob.identity, &s.alice.identity));
    assert!(bob_4.backend.has_signature(&s.bob.identity, &signature));

    // the broadcast query also reached it, but that instance already finished there
    let dup = bob_4.engine.deliver(&s.bob.identity, ReceptionChannel::Asymmetric, query.message);
    assert!(matches!(dup, Err(ProtocolError::InstanceTerminated)));

    // Alice's second device gets the confirmation before her own propagation
    let early = alice_3
        .engine
        .deliver(&s.alice.identity, ReceptionChannel::Asymmetric, confirmation.message.clone())
        .unwrap_err();
    assert!(matches!(early, ProtocolError::UnknownInstance { .. }));
    assert!(!early.is_fatal());
    assert!(!alice_3.backend.is_contact(&s.alice.identity, &s.bob.identity));
    assert_eq!(alice_3.backend.commit_count(), 0);

    let caught_up = alice_3
        .engine
        .deliver(
            &s.alice.identity,
            ReceptionChannel::OwnedDevice { remote_device: uid(1) },
            propagated_query.message,
        )
        .unwrap();
    assert_eq!(caught_up.status, InstanceStatus::InProgress { state: "WaitingForConfirmation" });

    // redelivered by the transport once the instance runs
    let redelivered = alice_3
        .engine
        .deliver(&s.alice.identity, ReceptionChannel::Asymmetric, confirmation.message.clone())
        .unwrap();
    assert_eq!(redelivered.status, InstanceStatus::Finished);
    assert_eq!(redelivered.notifications, vec![ProtocolNotification::MutualScanContactAdded {
        owner: s.alice.identity.clone(),
        contact: s.bob.identity.clone(),
        signature: signature.clone(),
    }]);
    assert_eq!(
        alice_3.backend.contact_devices(&s.alice.identity, &s.bob.identity),
        [uid(2), uid(4)].into_iter().collect()
    );

    let at_alice_1 = alice_1
        .engine
        .deliver(&s.alice.identity, ReceptionChannel::Asymmetric, confirmation.message)
        .unwrap();
    assert_eq!(at_alice_1.status, InstanceStatus::Finished);
    assert!(alice_1.backend.is_contact(&s.alice.identity, &s.bob.identity));
}

#[test]
fn propagated_query_from_a_foreign_device_is_rejected() {
    let mut s = setup(7);
    let alice_1 = Device::new(&s.alice, "alice", uid(1), &[uid(3)]);
    let alice_3 = Device::new(&s.alice, "alice", uid(3), &[uid(1)]);
    let signature = sign_invitation(&s.bob, &s.alice.identity, &mut s.rng).unwrap();

    alice_1.engine.start_mutual_scan(&s.alice.identity, &s.bob.identity, &signature).unwrap();
    let propagated = alice_1.sent().pop().unwrap();

    let err = alice_3
        .engine
        .deliver(
            &s.alice.identity,
            ReceptionChannel::OwnedDevice { remote_device: uid(42) },
            propagated.message,
        )
        .unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedSender { .. }));
    assert_eq!(alice_3.backend.instance_count(), 0);
}
