//! Contact deletion protocol tests
//!
//! These exercise the three steps against the in-memory backend:
//! - Local deletion emits exactly the expected messages, in order
//! - Critical failures cancel with nothing committed
//! - Best-effort failures are logged and the step still finishes
//! - Channel kind and sender are enforced before any step runs

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use trellis_core::{
    ChannelKind, ContactDetails, EngineConfig, InstanceStatus, MemoryBackend, OwnedIdentity,
    ProtocolEngine, ProtocolError, ProtocolNotification, ReceptionChannel, SendChannel, SystemEnv,
    backend::{FaultPoint, InstanceKey},
    protocol::{
        Protocol, envelope,
        contact_deletion::{ContactDeletion, ContactDeletionMessage},
    },
};
use trellis_crypto::CurveId;
use trellis_proto::Uid;

fn uid(n: u8) -> Uid {
    Uid::from_bytes([n; 32])
}

struct Setup {
    alice: OwnedIdentity,
    bob: OwnedIdentity,
    backend: MemoryBackend,
    engine: ProtocolEngine<SystemEnv, MemoryBackend>,
}

/// Alice on device 1, with Bob (device 2) as a contact.
fn generate(server: &str, rng: &mut ChaCha20Rng) -> OwnedIdentity {
    OwnedIdentity::generate(server, CurveId::Curve25519, rng).unwrap()
}

fn setup(seed: u64) -> Setup {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let alice = generate("https://a.example", &mut rng);
    let bob = generate("https://b.example", &mut rng);

    let backend = MemoryBackend::new();
    backend.register_owner(&alice, ContactDetails::named("alice"), uid(1));
    backend
        .add_contact(&alice.identity, &bob.identity, ContactDetails::named("bob"), [uid(2)])
        .unwrap();

    let engine = ProtocolEngine::new(SystemEnv::new(), backend.clone(), EngineConfig::default());
    Setup { alice, bob, backend, engine }
}

#[test]
fn deleting_a_contact_notifies_only_the_contact() {
    let s = setup(1);
    s.backend.open_channel(&s.alice.identity, &s.bob.identity, uid(2)).unwrap();

    let outcome = s.engine.start_contact_deletion(&s.alice.identity, &s.bob.identity).unwrap();

    assert_eq!(outcome.status, InstanceStatus::Finished);
    assert_eq!(outcome.notifications, vec![ProtocolNotification::ContactDeleted {
        owner: s.alice.identity.clone(),
        contact: s.bob.identity.clone(),
    }]);

    let sent = s.backend.drain_outbox();
    assert_eq!(sent.len(), 1, "exactly one message leaves the device");
    assert_eq!(sent[0].channel, SendChannel::AllSecureChannelsWith {
        contact: s.bob.identity.clone()
    });
    assert_eq!(sent[0].message.message_id, ContactDeletionMessage::NOTIFICATION);
    assert_eq!(sent[0].message.instance_uid, outcome.instance);

    assert!(!s.backend.is_contact(&s.alice.identity, &s.bob.identity));
    assert!(!s.backend.channel_exists(&s.alice.identity, &s.bob.identity));
    assert_eq!(s.backend.instance_count(), 0);
}

#[test]
fn deletion_is_propagated_after_the_notification() {
    let s = setup(2);
    s.backend.open_channel(&s.alice.identity, &s.bob.identity, uid(2)).unwrap();
    s.backend.add_owned_device(&s.alice.identity, uid(3)).unwrap();

    s.engine.start_contact_deletion(&s.alice.identity, &s.bob.identity).unwrap();

    let channels: Vec<_> = s.backend.drain_outbox().into_iter().map(|m| m.channel).collect();
    assert_eq!(channels, vec![
        SendChannel::AllSecureChannelsWith { contact: s.bob.identity.clone() },
        SendChannel::AllOwnedDevices,
    ]);
}

#[test]
fn no_channel_means_no_notification() {
    let s = setup(3);
    let outcome = s.engine.start_contact_deletion(&s.alice.identity, &s.bob.identity).unwrap();

    assert_eq!(outcome.status, InstanceStatus::Finished);
    assert_eq!(s.backend.outbox_len(), 0);
    assert!(!s.backend.is_contact(&s.alice.identity, &s.bob.identity));
}

#[test]
fn deleting_a_stranger_cancels() {
    let s = setup(4);
    let mut rng = ChaCha20Rng::seed_from_u64(40);
    let carol = generate("c", &mut rng);

    let outcome = s.engine.start_contact_deletion(&s.alice.identity, &carol.identity).unwrap();
    assert!(matches!(outcome.status, InstanceStatus::Cancelled { .. }));
    assert!(outcome.notifications.is_empty());
    assert!(s.backend.is_contact(&s.alice.identity, &s.bob.identity));
}

#[test]
fn group_member_deletion_cancels_without_side_effects() {
    let s = setup(5);
    s.backend.open_channel(&s.alice.identity, &s.bob.identity, uid(2)).unwrap();
    s.backend.add_group(&s.alice.identity, uid(9), &[s.bob.identity.clone()], &[]).unwrap();

    let outcome = s.engine.start_contact_deletion(&s.alice.identity, &s.bob.identity).unwrap();

    let reason = match outcome.status.clone() {
        InstanceStatus::Cancelled { reason } => reason,
        other => unreachable!("expected cancellation, got {other:?}"),
    };
    assert!(reason.contains("still a member of a group"), "{reason}");

    // the notification was posted before the failure, but never committed
    assert_eq!(s.backend.outbox_len(), 0);
    assert!(s.backend.is_contact(&s.alice.identity, &s.bob.identity));
    assert!(s.backend.channel_exists(&s.alice.identity, &s.bob.identity));

    let key = InstanceKey {
        owner: s.alice.identity.clone(),
        protocol: ContactDeletion::ID,
        uid: outcome.instance,
    };
    assert!(s.backend.is_terminated(&key));
}

#[test]
fn pending_invitations_are_withdrawn() {
    let s = setup(6);
    s.backend.add_group(&s.alice.identity, uid(9), &[], &[s.bob.identity.clone()]).unwrap();

    s.engine.start_contact_deletion(&s.alice.identity, &s.bob.identity).unwrap();
    assert!(s.backend.pending_members(&s.alice.identity, uid(9)).is_empty());
}

#[test]
fn best_effort_failure_still_finishes() {
    let s = setup(7);
    s.backend.open_channel(&s.alice.identity, &s.bob.identity, uid(2)).unwrap();
    s.backend.add_group(&s.alice.identity, uid(9), &[], &[s.bob.identity.clone()]).unwrap();
    s.backend.inject_fault(FaultPoint::PendingGroupMemberships);

    let outcome = s.engine.start_contact_deletion(&s.alice.identity, &s.bob.identity).unwrap();

    assert_eq!(outcome.status, InstanceStatus::Finished);
    assert_eq!(outcome.notifications.len(), 1);
    assert_eq!(s.backend.outbox_len(), 1);
    assert!(!s.backend.is_contact(&s.alice.identity, &s.bob.identity));
    // cleanup failed, invitation still pending
    assert_eq!(s.backend.pending_members(&s.alice.identity, uid(9)).len(), 1);
}

#[test]
fn critical_backend_failure_cancels() {
    let s = setup(8);
    s.backend.open_channel(&s.alice.identity, &s.bob.identity, uid(2)).unwrap();
    s.backend.inject_fault(FaultPoint::DeleteChannels);

    let outcome = s.engine.start_contact_deletion(&s.alice.identity, &s.bob.identity).unwrap();

    assert!(matches!(outcome.status, InstanceStatus::Cancelled { .. }));
    assert_eq!(s.backend.outbox_len(), 0);
    assert!(s.backend.is_contact(&s.alice.identity, &s.bob.identity));
}

#[test]
fn failed_commit_leaves_the_instance_untouched() {
    let s = setup(9);
    s.backend.inject_fault(FaultPoint::Commit);

    let initiate =
        ContactDeletionMessage::InitiateContactDeletion { contact: s.bob.identity.clone() };
    let message = envelope::<ContactDeletion>(uid(50), &initiate).unwrap();

    let err = s
        .engine
        .deliver(&s.alice.identity, ReceptionChannel::Local, message.clone())
        .unwrap_err();
    assert!(matches!(err, ProtocolError::Backend(_)));
    assert!(!err.is_fatal());
    assert!(s.backend.is_contact(&s.alice.identity, &s.bob.identity));

    s.backend.clear_faults();
    let outcome = s.engine.deliver(&s.alice.identity, ReceptionChannel::Local, message).unwrap();
    assert_eq!(outcome.status, InstanceStatus::Finished);
}

/// Bob's device, with Alice as a contact.
fn bob_side(s: &Setup) -> (MemoryBackend, ProtocolEngine<SystemEnv, MemoryBackend>) {
    let backend = MemoryBackend::new();
    backend.register_owner(&s.bob, ContactDetails::named("bob"), uid(2));
    backend
        .add_contact(&s.bob.identity, &s.alice.identity, ContactDetails::named("alice"), [uid(1)])
        .unwrap();
    backend.open_channel(&s.bob.identity, &s.alice.identity, uid(1)).unwrap();
    let engine = ProtocolEngine::new(SystemEnv::new(), backend.clone(), EngineConfig::default());
    (backend, engine)
}

#[test]
fn contact_processes_the_notification() {
    let s = setup(10);
    s.backend.open_channel(&s.alice.identity, &s.bob.identity, uid(2)).unwrap();
    let (bob_backend, bob_engine) = bob_side(&s);

    s.engine.start_contact_deletion(&s.alice.identity, &s.bob.identity).unwrap();
    let sent = s.backend.drain_outbox();
    let bytes = sent[0].message.encode().unwrap();

    let channel =
        ReceptionChannel::SecureChannel { remote: s.alice.identity.clone(), remote_device: uid(1) };
    let outcome = bob_engine.dispatch(&s.bob.identity, channel, &bytes).unwrap();

    assert_eq!(outcome.status, InstanceStatus::Finished);
    assert!(!bob_backend.is_contact(&s.bob.identity, &s.alice.identity));
    assert!(!bob_backend.channel_exists(&s.bob.identity, &s.alice.identity));
    assert_eq!(bob_backend.outbox_len(), 0);
}

#[test]
fn notification_through_wrong_channel_is_rejected() {
    let s = setup(11);
    let (bob_backend, bob_engine) = bob_side(&s);
    let message =
        envelope::<ContactDeletion>(uid(60), &ContactDeletionMessage::ContactDeletionNotification)
            .unwrap();

    let from_self = ReceptionChannel::OwnedDevice { remote_device: uid(7) };
    for channel in [ReceptionChannel::Local, from_self] {
        let err = bob_engine.deliver(&s.bob.identity, channel, message.clone()).unwrap_err();
        assert!(
            matches!(err, ProtocolError::UnexpectedChannel {
                expected: ChannelKind::SecureChannel,
                ..
            }),
            "{err}"
        );
        assert!(err.is_fatal());
    }

    // nothing ran and nothing was terminated
    assert!(bob_backend.is_contact(&s.bob.identity, &s.alice.identity));
    let channel =
        ReceptionChannel::SecureChannel { remote: s.alice.identity.clone(), remote_device: uid(1) };
    let outcome = bob_engine.deliver(&s.bob.identity, channel, message).unwrap();
    assert_eq!(outcome.status, InstanceStatus::Finished);
}

#[test]
fn notification_from_a_stranger_is_rejected() {
    let s = setup(12);
    let (bob_backend, bob_engine) = bob_side(&s);
    let mut rng = ChaCha20Rng::seed_from_u64(120);
    let mallory = generate("m", &mut rng);

    let message =
        envelope::<ContactDeletion>(uid(61), &ContactDeletionMessage::ContactDeletionNotification)
            .unwrap();
    let channel =
        ReceptionChannel::SecureChannel { remote: mallory.identity.clone(), remote_device: uid(5) };

    let err = bob_engine.deliver(&s.bob.identity, channel, message).unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedSender { .. }));
    assert!(bob_backend.is_contact(&s.bob.identity, &s.alice.identity));
}

#[test]
fn other_device_applies_propagated_deletion() {
    let s = setup(13);
    s.backend.add_owned_device(&s.alice.identity, uid(3)).unwrap();
    s.engine.start_contact_deletion(&s.alice.identity, &s.bob.identity).unwrap();
    let propagated = s.backend.drain_outbox().pop().unwrap();
    assert_eq!(propagated.channel, SendChannel::AllOwnedDevices);

    // Alice's second device
    let second = MemoryBackend::new();
    second.register_owner(&s.alice, ContactDetails::named("alice"), uid(3));
    second.add_owned_device(&s.alice.identity, uid(1)).unwrap();
    second
        .add_contact(&s.alice.identity, &s.bob.identity, ContactDetails::named("bob"), [uid(2)])
        .unwrap();
    let engine = ProtocolEngine::new(SystemEnv::new(), second.clone(), EngineConfig::default());

    // from a device that is not Alice's
    let err = engine
        .deliver(
            &s.alice.identity,
            ReceptionChannel::OwnedDevice { remote_device: uid(99) },
            propagated.message.clone(),
        )
        .unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedSender { .. }));

    let outcome = engine
        .deliver(
            &s.alice.identity,
            ReceptionChannel::OwnedDevice { remote_device: uid(1) },
            propagated.message,
        )
        .unwrap();
    assert_eq!(outcome.status, InstanceStatus::Finished);
    assert!(!second.is_contact(&s.alice.identity, &s.bob.identity));
    assert_eq!(second.outbox_len(), 0);
}
