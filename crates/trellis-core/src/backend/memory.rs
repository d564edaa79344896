//! In-memory backend.
//!
//! A transaction works on a private snapshot of the shared state and logs
//! every mutation it stages. Commit replays the log onto the live state under
//! one lock, after checking that no concurrent commit recorded the same
//! signature or contact in the meantime.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::debug;
use trellis_crypto::PrivateKey;

use super::{
    ChannelDispatcher, FaultPoint, FreshnessStore, IdentityStore, InstanceKey, InstanceRecord,
    InstanceStore, ParkedMessage, ProtocolBackend, Transaction,
};
use crate::{
    channel::OutgoingMessage,
    error::BackendError,
    identity::{ContactDetails, DeviceUid, GroupUid, Identity, OwnedIdentity, TrustOrigin},
};

#[derive(Debug, Clone)]
struct ContactRecord {
    details: ContactDetails,
    trust_origin: TrustOrigin,
    devices: BTreeSet<DeviceUid>,
}

#[derive(Debug, Clone, Default)]
struct GroupRecord {
    members: BTreeSet<Identity>,
    pending: BTreeSet<Identity>,
}

#[derive(Debug, Clone)]
struct OwnerRecord {
    signing_key: PrivateKey,
    details: ContactDetails,
    current_device: DeviceUid,
    other_devices: BTreeSet<DeviceUid>,
    contacts: BTreeMap<Identity, ContactRecord>,
    groups: BTreeMap<GroupUid, GroupRecord>,
}

/// Channel between `owner`'s `local` device and `remote`'s `remote_device`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ChannelKey {
    owner: Identity,
    local: DeviceUid,
    remote: Identity,
    remote_device: DeviceUid,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    owners: BTreeMap<Identity, OwnerRecord>,
    channels: BTreeSet<ChannelKey>,
    signatures: BTreeSet<(Identity, Vec<u8>)>,
    instances: BTreeMap<InstanceKey, InstanceRecord>,
    parked: BTreeMap<InstanceKey, Vec<ParkedMessage>>,
    terminated: BTreeSet<InstanceKey>,
    faults: BTreeSet<FaultPoint>,
}

#[derive(Debug, Default)]
struct Shared {
    state: MemoryState,
    outbox: Vec<OutgoingMessage>,
    commits: u64,
}

/// Staged mutation.
#[derive(Debug, Clone)]
enum Op {
    AddContact { owner: Identity, contact: Identity, details: ContactDetails, origin: TrustOrigin },
    DeleteContact { owner: Identity, contact: Identity },
    AddDevice { owner: Identity, contact: Identity, device: DeviceUid },
    RemovePendingMember { owner: Identity, group: GroupUid, contact: Identity },
    Post(OutgoingMessage),
    DeleteChannels {
        owner: Identity,
        local: DeviceUid,
        contact: Identity,
        devices: BTreeSet<DeviceUid>,
    },
    RecordSignature { owner: Identity, signature: Vec<u8> },
    SaveInstance(InstanceRecord),
    DeleteInstance(InstanceKey),
    Park(InstanceKey, ParkedMessage),
    TakeParked(InstanceKey),
}

impl MemoryState {
    fn owner(&self, owner: &Identity) -> Result<&OwnerRecord, BackendError> {
        self.owners.get(owner).ok_or(BackendError::UnknownOwner)
    }

    fn owner_mut(&mut self, owner: &Identity) -> Result<&mut OwnerRecord, BackendError> {
        self.owners.get_mut(owner).ok_or(BackendError::UnknownOwner)
    }

    fn contact(
        &self,
        owner: &Identity,
        contact: &Identity,
    ) -> Result<&ContactRecord, BackendError> {
        self.owner(owner)?.contacts.get(contact).ok_or(BackendError::ContactNotFound)
    }

    /// Apply a validated op. Posts are not state and are ignored here.
    fn apply(&mut self, op: &Op) {
        match op {
            Op::AddContact { owner, contact, details, origin } => {
                if let Some(record) = self.owners.get_mut(owner) {
                    record.contacts.entry(contact.clone()).or_insert_with(|| ContactRecord {
                        details: details.clone(),
                        trust_origin: *origin,
                        devices: BTreeSet::new(),
                    });
                }
            },
            Op::DeleteContact { owner, contact } => {
                // group rosters are left alone; pending invitations are
                // withdrawn explicitly by the caller
                if let Some(record) = self.owners.get_mut(owner) {
                    record.contacts.remove(contact);
                }
            },
            Op::AddDevice { owner, contact, device } => {
                if let Some(record) =
                    self.owners.get_mut(owner).and_then(|o| o.contacts.get_mut(contact))
                {
                    record.devices.insert(*device);
                }
            },
            Op::RemovePendingMember { owner, group, contact } => {
                if let Some(group) =
                    self.owners.get_mut(owner).and_then(|o| o.groups.get_mut(group))
                {
                    group.pending.remove(contact);
                }
            },
            Op::Post(_) => {},
            Op::DeleteChannels { owner, local, contact, devices } => {
                self.channels.retain(|c| {
                    !(&c.owner == owner
                        && &c.local == local
                        && &c.remote == contact
                        && devices.contains(&c.remote_device))
                });
            },
            Op::RecordSignature { owner, signature } => {
                self.signatures.insert((owner.clone(), signature.clone()));
            },
            Op::SaveInstance(record) => {
                self.instances.insert(record.key.clone(), record.clone());
            },
            Op::DeleteInstance(key) => {
                self.instances.remove(key);
                self.parked.remove(key);
                self.terminated.insert(key.clone());
            },
            Op::Park(key, message) => {
                self.parked.entry(key.clone()).or_default().push(message.clone());
            },
            Op::TakeParked(key) => {
                self.parked.remove(key);
            },
        }
    }

    /// Detect ops invalidated by a commit that landed after the snapshot.
    fn conflict(&self, op: &Op) -> Option<String> {
        match op {
            Op::RecordSignature { owner, signature }
                if self.signatures.contains(&(owner.clone(), signature.clone())) =>
            {
                Some(format!("signature already recorded for {owner}"))
            },
            Op::AddContact { owner, contact, .. }
                if self.owners.get(owner).is_some_and(|o| o.contacts.contains_key(contact)) =>
            {
                Some(format!("{contact} already added by {owner}"))
            },
            _ => None,
        }
    }
}

/// Thread-safe in-memory [`ProtocolBackend`].
///
/// Cloning yields another handle to the same state, so tests can keep one
/// handle for inspection while the engine owns another.
///
/// Every finished, cancelled or aborted instance leaves a tombstone, and
/// nothing removes one on its own: the set grows by one key per terminated
/// instance until [`prune_terminated`](Self::prune_terminated) is called.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryBackend {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // state is only mutated by whole-commit replays, so it stays usable
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Provision an identity whose current device is `device`.
    pub fn register_owner(
        &self,
        owned: &OwnedIdentity,
        details: ContactDetails,
        device: DeviceUid,
    ) {
        let record = OwnerRecord {
            signing_key: owned.signing.private.clone(),
            details,
            current_device: device,
            other_devices: BTreeSet::new(),
            contacts: BTreeMap::new(),
            groups: BTreeMap::new(),
        };
        self.lock().state.owners.insert(owned.identity.clone(), record);
    }

    /// Declare another device of `owner`.
    pub fn add_owned_device(
        &self,
        owner: &Identity,
        device: DeviceUid,
    ) -> Result<(), BackendError> {
        let mut shared = self.lock();
        let record = shared.state.owner_mut(owner)?;
        if record.current_device != device {
            record.other_devices.insert(device);
        }
        Ok(())
    }

    /// Add a contact directly, outside any protocol.
    pub fn add_contact(
        &self,
        owner: &Identity,
        contact: &Identity,
        details: ContactDetails,
        devices: impl IntoIterator<Item = DeviceUid>,
    ) -> Result<(), BackendError> {
        let mut shared = self.lock();
        let record = shared.state.owner_mut(owner)?;
        if record.contacts.contains_key(contact) {
            return Err(BackendError::ContactAlreadyExists);
        }
        record.contacts.insert(contact.clone(), ContactRecord {
            details,
            trust_origin: TrustOrigin::Direct,
            devices: devices.into_iter().collect(),
        });
        Ok(())
    }

    /// Open a confirmed secure channel from the owner's current device.
    pub fn open_channel(
        &self,
        owner: &Identity,
        remote: &Identity,
        remote_device: DeviceUid,
    ) -> Result<(), BackendError> {
        let mut shared = self.lock();
        let local = shared.state.owner(owner)?.current_device;
        shared.state.channels.insert(ChannelKey {
            owner: owner.clone(),
            local,
            remote: remote.clone(),
            remote_device,
        });
        Ok(())
    }

    /// Create a group with full and pending members.
    pub fn add_group(
        &self,
        owner: &Identity,
        group: GroupUid,
        members: &[Identity],
        pending: &[Identity],
    ) -> Result<(), BackendError> {
        let mut shared = self.lock();
        let record = shared.state.owner_mut(owner)?;
        record.groups.insert(group, GroupRecord {
            members: members.iter().cloned().collect(),
            pending: pending.iter().cloned().collect(),
        });
        Ok(())
    }

    /// Whether `contact` is a committed contact of `owner`.
    pub fn is_contact(&self, owner: &Identity, contact: &Identity) -> bool {
        self.lock().state.contact(owner, contact).is_ok()
    }

    /// Committed contacts of `owner`.
    pub fn contacts(&self, owner: &Identity) -> Vec<Identity> {
        self.lock()
            .state
            .owners
            .get(owner)
            .map(|o| o.contacts.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Details and trust origin of a committed contact.
    pub fn contact_details(
        &self,
        owner: &Identity,
        contact: &Identity,
    ) -> Option<(ContactDetails, TrustOrigin)> {
        self.lock()
            .state
            .contact(owner, contact)
            .ok()
            .map(|c| (c.details.clone(), c.trust_origin))
    }

    /// Devices of a committed contact.
    pub fn contact_devices(&self, owner: &Identity, contact: &Identity) -> BTreeSet<DeviceUid> {
        self.lock().state.contact(owner, contact).map(|c| c.devices.clone()).unwrap_or_default()
    }

    /// Whether a committed channel with `remote` exists.
    pub fn channel_exists(&self, owner: &Identity, remote: &Identity) -> bool {
        self.lock().state.channels.iter().any(|c| &c.owner == owner && &c.remote == remote)
    }

    /// Pending members of a group.
    pub fn pending_members(&self, owner: &Identity, group: GroupUid) -> BTreeSet<Identity> {
        self.lock()
            .state
            .owners
            .get(owner)
            .and_then(|o| o.groups.get(&group))
            .map(|g| g.pending.clone())
            .unwrap_or_default()
    }

    /// Whether `signature` was committed to the freshness store.
    pub fn has_signature(&self, owner: &Identity, signature: &[u8]) -> bool {
        self.lock().state.signatures.contains(&(owner.clone(), signature.to_vec()))
    }

    /// Remove and return committed posts, in commit order.
    pub fn drain_outbox(&self) -> Vec<OutgoingMessage> {
        std::mem::take(&mut self.lock().outbox)
    }

    /// Committed posts not yet drained.
    pub fn outbox_len(&self) -> usize {
        self.lock().outbox.len()
    }

    /// Non-terminal instances currently stored.
    pub fn instance_count(&self) -> usize {
        self.lock().state.instances.len()
    }

    /// Committed record of an instance.
    pub fn instance(&self, key: &InstanceKey) -> Option<InstanceRecord> {
        self.lock().state.instances.get(key).cloned()
    }

    /// Messages parked for an instance.
    pub fn parked_count(&self, key: &InstanceKey) -> usize {
        self.lock().state.parked.get(key).map_or(0, Vec::len)
    }

    /// Whether the instance left a tombstone.
    pub fn is_terminated(&self, key: &InstanceKey) -> bool {
        self.lock().state.terminated.contains(key)
    }

    /// Tombstones currently kept.
    pub fn terminated_count(&self) -> usize {
        self.lock().state.terminated.len()
    }

    /// Drop the tombstones `prune` selects and return how many went.
    ///
    /// A pruned key counts as never seen: a late message for it is handled
    /// like one for a fresh instance. Only prune instances whose messages can
    /// no longer be in transit.
    pub fn prune_terminated(&self, mut prune: impl FnMut(&InstanceKey) -> bool) -> usize {
        let mut shared = self.lock();
        let before = shared.state.terminated.len();
        shared.state.terminated.retain(|key| !prune(key));
        let pruned = before - shared.state.terminated.len();
        if pruned > 0 {
            debug!(pruned, "pruned instance tombstones");
        }
        pruned
    }

    /// Successful commits so far.
    pub fn commit_count(&self) -> u64 {
        self.lock().commits
    }

    /// Make `point` fail until [`clear_faults`](Self::clear_faults).
    ///
    /// Transactions see the fault set as of their `begin`.
    pub fn inject_fault(&self, point: FaultPoint) {
        self.lock().state.faults.insert(point);
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        self.lock().state.faults.clear();
    }
}

impl ProtocolBackend for MemoryBackend {
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, BackendError> {
        let shared = self.lock();
        if shared.state.faults.contains(&FaultPoint::Begin) {
            return Err(BackendError::Injected(FaultPoint::Begin));
        }
        Ok(Box::new(MemoryTransaction {
            backend: self,
            view: shared.state.clone(),
            ops: Vec::new(),
        }))
    }
}

struct MemoryTransaction<'a> {
    backend: &'a MemoryBackend,
    view: MemoryState,
    ops: Vec<Op>,
}

impl MemoryTransaction<'_> {
    fn check(&self, point: FaultPoint) -> Result<(), BackendError> {
        if self.view.faults.contains(&point) {
            return Err(BackendError::Injected(point));
        }
        Ok(())
    }

    fn stage(&mut self, op: Op) {
        self.view.apply(&op);
        self.ops.push(op);
    }
}

impl IdentityStore for MemoryTransaction<'_> {
    fn is_contact(&self, owner: &Identity, contact: &Identity) -> Result<bool, BackendError> {
        Ok(self.view.owner(owner)?.contacts.contains_key(contact))
    }

    fn add_contact(
        &mut self,
        owner: &Identity,
        contact: &Identity,
        details: &ContactDetails,
        trust_origin: TrustOrigin,
    ) -> Result<(), BackendError> {
        self.check(FaultPoint::AddContact)?;
        if self.is_contact(owner, contact)? {
            return Err(BackendError::ContactAlreadyExists);
        }
        self.stage(Op::AddContact {
            owner: owner.clone(),
            contact: contact.clone(),
            details: details.clone(),
            origin: trust_origin,
        });
        Ok(())
    }

    fn delete_contact(
        &mut self,
        owner: &Identity,
        contact: &Identity,
        fail_if_still_in_a_group: bool,
    ) -> Result<(), BackendError> {
        self.check(FaultPoint::DeleteContact)?;
        self.view.contact(owner, contact)?;
        if fail_if_still_in_a_group
            && self.view.owner(owner)?.groups.values().any(|g| g.members.contains(contact))
        {
            return Err(BackendError::ContactStillInAGroup);
        }
        self.stage(Op::DeleteContact { owner: owner.clone(), contact: contact.clone() });
        Ok(())
    }

    fn add_device(
        &mut self,
        owner: &Identity,
        contact: &Identity,
        device: DeviceUid,
    ) -> Result<(), BackendError> {
        self.check(FaultPoint::AddDevice)?;
        if self.view.contact(owner, contact)?.devices.contains(&device) {
            return Ok(());
        }
        self.stage(Op::AddDevice { owner: owner.clone(), contact: contact.clone(), device });
        Ok(())
    }

    fn contact_device_uids(
        &self,
        owner: &Identity,
        contact: &Identity,
    ) -> Result<BTreeSet<DeviceUid>, BackendError> {
        Ok(self.view.contact(owner, contact)?.devices.clone())
    }

    fn current_device_uid(&self, owner: &Identity) -> Result<DeviceUid, BackendError> {
        Ok(self.view.owner(owner)?.current_device)
    }

    fn other_device_uids(&self, owner: &Identity) -> Result<BTreeSet<DeviceUid>, BackendError> {
        Ok(self.view.owner(owner)?.other_devices.clone())
    }

    fn owned_details(&self, owner: &Identity) -> Result<ContactDetails, BackendError> {
        Ok(self.view.owner(owner)?.details.clone())
    }

    fn signing_key(&self, owner: &Identity) -> Result<PrivateKey, BackendError> {
        Ok(self.view.owner(owner)?.signing_key.clone())
    }

    fn pending_group_memberships(
        &self,
        owner: &Identity,
        contact: &Identity,
    ) -> Result<Vec<GroupUid>, BackendError> {
        self.check(FaultPoint::PendingGroupMemberships)?;
        Ok(self
            .view
            .owner(owner)?
            .groups
            .iter()
            .filter(|(_, g)| g.pending.contains(contact))
            .map(|(uid, _)| *uid)
            .collect())
    }

    fn remove_pending_group_member(
        &mut self,
        owner: &Identity,
        group: GroupUid,
        contact: &Identity,
    ) -> Result<(), BackendError> {
        self.check(FaultPoint::RemovePendingGroupMember)?;
        if !self.view.owner(owner)?.groups.contains_key(&group) {
            return Err(BackendError::GroupNotFound);
        }
        self.stage(Op::RemovePendingMember {
            owner: owner.clone(),
            group,
            contact: contact.clone(),
        });
        Ok(())
    }
}

impl ChannelDispatcher for MemoryTransaction<'_> {
    fn post(&mut self, message: OutgoingMessage) -> Result<(), BackendError> {
        self.check(FaultPoint::Post)?;
        self.view.owner(&message.owner)?;
        self.stage(Op::Post(message));
        Ok(())
    }

    fn delete_all_channels(
        &mut self,
        owner: &Identity,
        local_device: DeviceUid,
        contact: &Identity,
        devices: &BTreeSet<DeviceUid>,
    ) -> Result<(), BackendError> {
        self.check(FaultPoint::DeleteChannels)?;
        self.view.owner(owner)?;
        self.stage(Op::DeleteChannels {
            owner: owner.clone(),
            local: local_device,
            contact: contact.clone(),
            devices: devices.clone(),
        });
        Ok(())
    }

    fn channel_exists(&self, owner: &Identity, remote: &Identity) -> Result<bool, BackendError> {
        Ok(self.view.channels.iter().any(|c| &c.owner == owner && &c.remote == remote))
    }
}

impl FreshnessStore for MemoryTransaction<'_> {
    fn exists(&self, owner: &Identity, signature: &[u8]) -> Result<bool, BackendError> {
        Ok(self.view.signatures.contains(&(owner.clone(), signature.to_vec())))
    }

    fn record(&mut self, owner: &Identity, signature: &[u8]) -> Result<(), BackendError> {
        self.check(FaultPoint::RecordSignature)?;
        if self.exists(owner, signature)? {
            return Err(BackendError::Conflict(format!("signature already recorded for {owner}")));
        }
        self.stage(Op::RecordSignature { owner: owner.clone(), signature: signature.to_vec() });
        Ok(())
    }
}

impl InstanceStore for MemoryTransaction<'_> {
    fn load(&self, key: &InstanceKey) -> Result<Option<InstanceRecord>, BackendError> {
        Ok(self.view.instances.get(key).cloned())
    }

    fn save(&mut self, record: InstanceRecord) -> Result<(), BackendError> {
        self.check(FaultPoint::SaveInstance)?;
        self.stage(Op::SaveInstance(record));
        Ok(())
    }

    fn delete(&mut self, key: &InstanceKey) -> Result<(), BackendError> {
        self.stage(Op::DeleteInstance(key.clone()));
        Ok(())
    }

    fn is_terminated(&self, key: &InstanceKey) -> Result<bool, BackendError> {
        Ok(self.view.terminated.contains(key))
    }

    fn park(&mut self, key: &InstanceKey, message: ParkedMessage) -> Result<(), BackendError> {
        self.stage(Op::Park(key.clone(), message));
        Ok(())
    }

    fn parked_count(&self, key: &InstanceKey) -> Result<usize, BackendError> {
        Ok(self.view.parked.get(key).map_or(0, Vec::len))
    }

    fn take_parked(&mut self, key: &InstanceKey) -> Result<Vec<ParkedMessage>, BackendError> {
        let parked = self.view.parked.get(key).cloned().unwrap_or_default();
        if !parked.is_empty() {
            self.stage(Op::TakeParked(key.clone()));
        }
        Ok(parked)
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn commit(self: Box<Self>) -> Result<(), BackendError> {
        self.check(FaultPoint::Commit)?;

        let mut shared = self.backend.lock();
        if let Some(reason) = self.ops.iter().find_map(|op| shared.state.conflict(op)) {
            return Err(BackendError::Conflict(reason));
        }

        let mut posted = 0usize;
        for op in &self.ops {
            if let Op::Post(message) = op {
                shared.outbox.push(message.clone());
                posted += 1;
            } else {
                shared.state.apply(op);
            }
        }
        shared.commits += 1;

        debug!(ops = self.ops.len(), posted, "memory backend commit");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;
    use trellis_crypto::CurveId;
    use trellis_proto::Uid;

    use super::*;

    struct Fixture {
        backend: MemoryBackend,
        alice: Identity,
        bob: Identity,
    }

    fn device(n: u8) -> DeviceUid {
        Uid::from_bytes([n; 32])
    }

    fn fixture() -> Fixture {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let alice = OwnedIdentity::generate("s", CurveId::Curve25519, &mut rng).unwrap();
        let bob = OwnedIdentity::generate("s", CurveId::Curve25519, &mut rng).unwrap();

        let backend = MemoryBackend::new();
        backend.register_owner(&alice, ContactDetails::named("alice"), device(1));
        Fixture { backend, alice: alice.identity, bob: bob.identity }
    }

    #[test]
    fn staged_writes_are_invisible_until_commit() {
        let f = fixture();
        let mut txn = f.backend.begin().unwrap();
        txn.add_contact(&f.alice, &f.bob, &ContactDetails::named("bob"), TrustOrigin::MutualScan)
            .unwrap();

        assert!(txn.is_contact(&f.alice, &f.bob).unwrap());
        assert!(!f.backend.is_contact(&f.alice, &f.bob));

        txn.commit().unwrap();
        assert!(f.backend.is_contact(&f.alice, &f.bob));
        assert_eq!(
            f.backend.contact_details(&f.alice, &f.bob).map(|(_, origin)| origin),
            Some(TrustOrigin::MutualScan)
        );
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let f = fixture();
        f.backend.add_contact(&f.alice, &f.bob, ContactDetails::named("bob"), [device(2)]).unwrap();

        {
            let mut txn = f.backend.begin().unwrap();
            txn.delete_contact(&f.alice, &f.bob, true).unwrap();
            txn.post(OutgoingMessage {
                owner: f.alice.clone(),
                channel: crate::channel::SendChannel::AllOwnedDevices,
                message: trellis_proto::ProtocolMessage {
                    protocol_id: trellis_proto::ProtocolId(1),
                    instance_uid: Uid::from_bytes([0; 32]),
                    message_id: 0,
                    payload: Vec::new(),
                },
            })
            .unwrap();
        }

        assert!(f.backend.is_contact(&f.alice, &f.bob));
        assert_eq!(f.backend.outbox_len(), 0);
        assert_eq!(f.backend.commit_count(), 0);
    }

    #[test]
    fn group_members_cannot_be_deleted_strictly() {
        let f = fixture();
        f.backend.add_contact(&f.alice, &f.bob, ContactDetails::named("bob"), []).unwrap();
        f.backend.add_group(&f.alice, Uid::from_bytes([9; 32]), &[f.bob.clone()], &[]).unwrap();

        let mut txn = f.backend.begin().unwrap();
        assert_eq!(
            txn.delete_contact(&f.alice, &f.bob, true),
            Err(BackendError::ContactStillInAGroup)
        );
        txn.delete_contact(&f.alice, &f.bob, false).unwrap();
        txn.commit().unwrap();
        assert!(!f.backend.is_contact(&f.alice, &f.bob));
    }

    #[test]
    fn concurrent_signature_records_conflict() {
        let f = fixture();
        let mut first = f.backend.begin().unwrap();
        let mut second = f.backend.begin().unwrap();
        first.record(&f.alice, b"sig").unwrap();
        second.record(&f.alice, b"sig").unwrap();

        first.commit().unwrap();
        assert!(matches!(second.commit(), Err(BackendError::Conflict(_))));
        assert!(f.backend.has_signature(&f.alice, b"sig"));
    }

    #[test]
    fn deleting_an_instance_leaves_a_tombstone() {
        let f = fixture();
        let key = InstanceKey {
            owner: f.alice.clone(),
            protocol: trellis_proto::ProtocolId(2),
            uid: Uid::from_bytes([3; 32]),
        };
        let parked = ParkedMessage {
            channel: crate::channel::ReceptionChannel::Asymmetric,
            message: trellis_proto::ProtocolMessage {
                protocol_id: key.protocol,
                instance_uid: key.uid,
                message_id: 4,
                payload: vec![1],
            },
        };

        let mut txn = f.backend.begin().unwrap();
        txn.save(InstanceRecord { key: key.clone(), state_id: 1, state: vec![0xa0] }).unwrap();
        txn.park(&key, parked).unwrap();
        txn.commit().unwrap();
        assert_eq!(f.backend.parked_count(&key), 1);

        let mut txn = f.backend.begin().unwrap();
        txn.delete(&key).unwrap();
        txn.commit().unwrap();

        assert!(f.backend.is_terminated(&key));
        assert_eq!(f.backend.parked_count(&key), 0);
        assert!(f.backend.instance(&key).is_none());
    }

    #[test]
    fn pruning_forgets_selected_tombstones() {
        let f = fixture();
        let key = |n: u8| InstanceKey {
            owner: f.alice.clone(),
            protocol: trellis_proto::ProtocolId(1),
            uid: Uid::from_bytes([n; 32]),
        };

        let mut txn = f.backend.begin().unwrap();
        for n in 0..4 {
            txn.delete(&key(n)).unwrap();
        }
        txn.commit().unwrap();
        assert_eq!(f.backend.terminated_count(), 4);

        let pruned = f.backend.prune_terminated(|k| k.uid.as_bytes()[0] < 3);
        assert_eq!(pruned, 3);
        assert_eq!(f.backend.terminated_count(), 1);
        assert!(!f.backend.is_terminated(&key(0)));
        assert!(f.backend.is_terminated(&key(3)));
        assert_eq!(f.backend.prune_terminated(|_| false), 0);
    }

    #[test]
    fn injected_faults_fail_their_operation() {
        let f = fixture();
        f.backend.inject_fault(FaultPoint::AddContact);

        let mut txn = f.backend.begin().unwrap();
        assert_eq!(
            txn.add_contact(&f.alice, &f.bob, &ContactDetails::default(), TrustOrigin::Direct),
            Err(BackendError::Injected(FaultPoint::AddContact))
        );
        drop(txn);

        f.backend.inject_fault(FaultPoint::Begin);
        assert!(f.backend.begin().is_err());
        f.backend.clear_faults();
        assert!(f.backend.begin().is_ok());
    }

    #[test]
    fn unknown_owner_is_reported() {
        let f = fixture();
        let txn = f.backend.begin().unwrap();
        assert_eq!(txn.current_device_uid(&f.bob), Err(BackendError::UnknownOwner));
    }
}
