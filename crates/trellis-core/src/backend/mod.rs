//! Collaborator interfaces the engine runs against.
//!
//! The engine never touches storage or the network directly. Every step runs
//! inside a [`Transaction`] opened on a [`ProtocolBackend`]; reads see the
//! transaction's own staged writes, and nothing (contacts, channel deletions,
//! posted messages, freshness records, instance state) becomes visible to
//! anyone else until [`Transaction::commit`] succeeds. Dropping a transaction
//! without committing discards every staged change.
//!
//! ## Invariants
//!
//! - Atomicity: a transaction's effects apply all together or not at all
//! - Ordering: posted messages leave the dispatcher in insertion order
//! - Append-only freshness: a recorded signature is never forgotten

mod memory;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use trellis_crypto::PrivateKey;
use trellis_proto::{ProtocolId, ProtocolMessage, Uid};

pub use self::memory::MemoryBackend;
use crate::{
    channel::{OutgoingMessage, ReceptionChannel},
    error::BackendError,
    identity::{ContactDetails, DeviceUid, GroupUid, Identity, TrustOrigin},
};

/// Backend operation a test can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FaultPoint {
    /// Opening a transaction.
    Begin,
    /// Committing a transaction.
    Commit,
    /// [`IdentityStore::add_contact`].
    AddContact,
    /// [`IdentityStore::delete_contact`].
    DeleteContact,
    /// [`IdentityStore::add_device`].
    AddDevice,
    /// [`IdentityStore::pending_group_memberships`].
    PendingGroupMemberships,
    /// [`IdentityStore::remove_pending_group_member`].
    RemovePendingGroupMember,
    /// [`ChannelDispatcher::post`].
    Post,
    /// [`ChannelDispatcher::delete_all_channels`].
    DeleteChannels,
    /// [`FreshnessStore::record`].
    RecordSignature,
    /// [`InstanceStore::save`].
    SaveInstance,
}

/// Contacts, devices and the owner's own key material.
pub trait IdentityStore {
    /// Whether `contact` is a contact of `owner`.
    fn is_contact(&self, owner: &Identity, contact: &Identity) -> Result<bool, BackendError>;

    /// Add `contact`. Fails with [`BackendError::ContactAlreadyExists`].
    fn add_contact(
        &mut self,
        owner: &Identity,
        contact: &Identity,
        details: &ContactDetails,
        trust_origin: TrustOrigin,
    ) -> Result<(), BackendError>;

    /// Remove `contact` and its devices.
    ///
    /// With `fail_if_still_in_a_group`, a contact that is still a member of
    /// any of the owner's groups is kept and
    /// [`BackendError::ContactStillInAGroup`] is returned.
    fn delete_contact(
        &mut self,
        owner: &Identity,
        contact: &Identity,
        fail_if_still_in_a_group: bool,
    ) -> Result<(), BackendError>;

    /// Attach a device to `contact`. Adding a known device is a no-op.
    fn add_device(
        &mut self,
        owner: &Identity,
        contact: &Identity,
        device: DeviceUid,
    ) -> Result<(), BackendError>;

    /// Devices known for `contact`.
    fn contact_device_uids(
        &self,
        owner: &Identity,
        contact: &Identity,
    ) -> Result<BTreeSet<DeviceUid>, BackendError>;

    /// Device this backend runs on.
    fn current_device_uid(&self, owner: &Identity) -> Result<DeviceUid, BackendError>;

    /// The owner's devices other than the current one.
    fn other_device_uids(&self, owner: &Identity) -> Result<BTreeSet<DeviceUid>, BackendError>;

    /// Details the owner publishes about itself.
    fn owned_details(&self, owner: &Identity) -> Result<ContactDetails, BackendError>;

    /// The owner's signing key.
    fn signing_key(&self, owner: &Identity) -> Result<PrivateKey, BackendError>;

    /// Groups where `contact` is invited but has not joined yet.
    fn pending_group_memberships(
        &self,
        owner: &Identity,
        contact: &Identity,
    ) -> Result<Vec<GroupUid>, BackendError>;

    /// Withdraw a pending invitation.
    fn remove_pending_group_member(
        &mut self,
        owner: &Identity,
        group: GroupUid,
        contact: &Identity,
    ) -> Result<(), BackendError>;
}

/// Outgoing traffic and the secure channels behind it.
pub trait ChannelDispatcher {
    /// Queue a message for delivery after commit.
    fn post(&mut self, message: OutgoingMessage) -> Result<(), BackendError>;

    /// Tear down every channel between `local_device` and `contact`'s
    /// `devices`.
    fn delete_all_channels(
        &mut self,
        owner: &Identity,
        local_device: DeviceUid,
        contact: &Identity,
        devices: &BTreeSet<DeviceUid>,
    ) -> Result<(), BackendError>;

    /// Whether any confirmed secure channel with `remote` exists.
    fn channel_exists(&self, owner: &Identity, remote: &Identity) -> Result<bool, BackendError>;
}

/// Signatures already accepted, per owner.
pub trait FreshnessStore {
    /// Whether `signature` was already accepted by `owner`.
    fn exists(&self, owner: &Identity, signature: &[u8]) -> Result<bool, BackendError>;

    /// Remember `signature`. Recording twice is a conflict at commit.
    fn record(&mut self, owner: &Identity, signature: &[u8]) -> Result<(), BackendError>;
}

/// Addresses one protocol instance of one owner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceKey {
    /// Identity running the instance.
    pub owner: Identity,
    /// Protocol the instance belongs to.
    pub protocol: ProtocolId,
    /// Instance uid, shared by all participants.
    pub uid: Uid,
}

/// Persisted state of a non-terminal instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    /// Instance address.
    pub key: InstanceKey,
    /// State discriminant, never 0 (reserved for the implicit initial state).
    pub state_id: u8,
    /// CBOR-encoded state.
    pub state: Vec<u8>,
}

/// Message that arrived before its step became reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkedMessage {
    /// Channel it arrived through.
    pub channel: ReceptionChannel,
    /// Envelope.
    pub message: ProtocolMessage,
}

/// Protocol instance records, parked messages and tombstones.
pub trait InstanceStore {
    /// Current record, `None` when the instance is in its initial state.
    fn load(&self, key: &InstanceKey) -> Result<Option<InstanceRecord>, BackendError>;

    /// Insert or replace the record.
    fn save(&mut self, record: InstanceRecord) -> Result<(), BackendError>;

    /// Terminate the instance: drop its record and parked messages and leave
    /// a tombstone.
    fn delete(&mut self, key: &InstanceKey) -> Result<(), BackendError>;

    /// Whether the instance already reached a terminal state.
    fn is_terminated(&self, key: &InstanceKey) -> Result<bool, BackendError>;

    /// Queue an out-of-order message.
    fn park(&mut self, key: &InstanceKey, message: ParkedMessage) -> Result<(), BackendError>;

    /// Number of queued messages.
    fn parked_count(&self, key: &InstanceKey) -> Result<usize, BackendError>;

    /// Remove and return the queued messages, oldest first.
    fn take_parked(&mut self, key: &InstanceKey) -> Result<Vec<ParkedMessage>, BackendError>;
}

/// All collaborators bound to one unit of work.
pub trait Transaction: IdentityStore + ChannelDispatcher + FreshnessStore + InstanceStore {
    /// Make every staged change visible at once.
    fn commit(self: Box<Self>) -> Result<(), BackendError>;
}

/// Source of transactions. Shared by every thread driving the engine.
pub trait ProtocolBackend: Send + Sync {
    /// Open a transaction.
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, BackendError>;
}
