//! Simulated world - users, their devices and the network between them.
//!
//! Every device runs its own [`ProtocolEngine`] over its own
//! [`MemoryBackend`]. After each delivery the device's outbox is drained and
//! every [`OutgoingMessage`] is expanded into one packet per receiving
//! device:
//!
//! | Send channel              | Receivers                          | Arrives as       |
//! |---------------------------|------------------------------------|------------------|
//! | `Local`                   | the sending device                 | `Local`          |
//! | `AllSecureChannelsWith`   | every device of the contact        | `SecureChannel`  |
//! | `AllOwnedDevices`         | the owner's other devices          | `OwnedDevice`    |
//! | `AsymmetricBroadcast`     | every device of the remote         | `Asymmetric`     |
//! | `Asymmetric`              | the listed devices of the remote   | `Asymmetric`     |
//!
//! Asymmetric packets are sealed to the recipient's encryption key and opened
//! on arrival. The network may duplicate packets and deliver them in any
//! order; both decisions come from the world's seeded generator.
//!
//! A packet that arrives before the message that starts its instance is
//! rejected as transient ([`ProtocolError::UnknownInstance`]). The network
//! holds it back and redelivers it once everything else has been delivered,
//! for as long as the previous round changed some device.

use std::collections::{BTreeMap, VecDeque};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use tracing::{debug, info, warn};
use trellis_core::{
    BackendError, ContactDetails, DeviceUid, DispatchOutcome, Environment, Identity,
    InstanceStatus, MemoryBackend, OutgoingMessage, OwnedIdentity, ProtocolEngine, ProtocolError,
    ProtocolNotification, ReceptionChannel, SendChannel,
    backend::FaultPoint,
    config::EngineConfig,
    protocol::mutual_scan::sign_invitation,
};
use trellis_crypto::{CryptoError, CurveId, kem};
use trellis_proto::EncodingError;

use crate::sim_env::SimEnv;

/// Index of a user in the world.
pub type UserId = usize;

/// Errors from driving the world. Protocol rejections are not errors: they
/// are counted in [`Stats`].
#[derive(Debug, Error)]
pub enum WorldError {
    /// No user with this index.
    #[error("no such user: {0}")]
    UnknownUser(UserId),

    /// User has no device with this index.
    #[error("user {user} has no device {device}")]
    UnknownDevice {
        /// User index.
        user: UserId,
        /// Device index.
        device: usize,
    },

    /// Key generation, signing or sealing failed.
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    /// Setting up a backend failed.
    #[error("backend: {0}")]
    Backend(#[from] BackendError),

    /// A locally started protocol was rejected.
    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    /// An outgoing envelope could not be encoded.
    #[error("encoding: {0}")]
    Encoding(#[from] EncodingError),

    /// Packets were still in flight after the delivery budget.
    #[error("network not quiescent after {0} deliveries")]
    NotQuiescent(usize),
}

/// Network misbehaviour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkFaults {
    /// Probability that a packet is sent twice.
    pub duplicate_rate: f64,
    /// Deliver a random in-flight packet instead of the oldest.
    pub reorder: bool,
}

impl NetworkFaults {
    /// In-order, exactly-once delivery.
    pub const NONE: Self = Self { duplicate_rate: 0.0, reorder: false };

    /// Duplicates a quarter of the packets and reorders freely.
    pub const HOSTILE: Self = Self { duplicate_rate: 0.25, reorder: true };
}

impl Default for NetworkFaults {
    fn default() -> Self {
        Self::NONE
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Packets the engine accepted (stepped, parked or cancelled).
    pub delivered: usize,
    /// Packets the engine rejected, or that failed to open.
    pub rejected: usize,
    /// Extra copies injected by the network.
    pub duplicated: usize,
    /// Deliveries that cancelled an instance.
    pub cancelled: usize,
    /// Packets held back because their instance did not exist yet.
    pub deferred: usize,
}

#[derive(Debug)]
struct SimDevice {
    uid: DeviceUid,
    backend: MemoryBackend,
    engine: ProtocolEngine<SimEnv, MemoryBackend>,
    notifications: Vec<ProtocolNotification>,
}

#[derive(Debug)]
struct SimUser {
    name: String,
    owned: OwnedIdentity,
    devices: Vec<SimDevice>,
}

#[derive(Debug, Clone)]
enum Body {
    Plain(Vec<u8>),
    Sealed(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Packet {
    user: UserId,
    device: usize,
    channel: ReceptionChannel,
    body: Body,
}

/// Receiver of one expanded [`OutgoingMessage`].
struct Route {
    user: UserId,
    device: usize,
    channel: ReceptionChannel,
    seal_to: Option<Identity>,
}

/// Deterministic multi-user, multi-device world.
#[derive(Debug)]
pub struct SimWorld {
    env: SimEnv,
    rng: ChaCha20Rng,
    faults: NetworkFaults,
    config: EngineConfig,
    users: Vec<SimUser>,
    by_identity: BTreeMap<Identity, UserId>,
    in_flight: VecDeque<Packet>,
    deferred: Vec<Packet>,
    progressed: bool,
    stats: Stats,
}

impl SimWorld {
    /// Empty world. Everything random derives from `seed`.
    pub fn new(seed: u64, faults: NetworkFaults) -> Self {
        Self::with_config(seed, faults, EngineConfig::default())
    }

    /// Empty world whose engines use `config`.
    pub fn with_config(seed: u64, faults: NetworkFaults, config: EngineConfig) -> Self {
        info!(seed, ?faults, "creating simulated world");
        Self {
            env: SimEnv::with_seed(seed),
            rng: ChaCha20Rng::seed_from_u64(seed.rotate_left(32) ^ 0x5eed),
            faults,
            config,
            users: Vec::new(),
            by_identity: BTreeMap::new(),
            in_flight: VecDeque::new(),
            deferred: Vec::new(),
            progressed: false,
            stats: Stats::default(),
        }
    }

    /// Add a user with `devices` devices (at least one).
    pub fn add_user(&mut self, name: &str, devices: usize) -> Result<UserId, WorldError> {
        let server = format!("https://{name}.example");
        let owned = OwnedIdentity::generate(server, CurveId::Curve25519, &mut self.rng)?;
        let uids: Vec<DeviceUid> = (0..devices.max(1)).map(|_| self.env.random_uid()).collect();

        let mut sim_devices = Vec::with_capacity(uids.len());
        for &uid in &uids {
            let backend = MemoryBackend::new();
            backend.register_owner(&owned, ContactDetails::named(name), uid);
            for &other in &uids {
                backend.add_owned_device(&owned.identity, other)?;
            }
            let engine =
                ProtocolEngine::new(self.env.clone(), backend.clone(), self.config.clone());
            sim_devices.push(SimDevice { uid, backend, engine, notifications: Vec::new() });
        }

        let id = self.users.len();
        debug!(user = id, name, identity = %owned.identity, devices = uids.len(), "added user");
        self.by_identity.insert(owned.identity.clone(), id);
        self.users.push(SimUser { name: name.to_string(), owned, devices: sim_devices });
        Ok(id)
    }

    /// Make `a` and `b` contacts on all their devices, with a secure channel
    /// between every pair of devices.
    pub fn connect(&mut self, a: UserId, b: UserId) -> Result<(), WorldError> {
        self.befriend(a, b)?;
        self.befriend(b, a)
    }

    fn befriend(&self, owner: UserId, contact: UserId) -> Result<(), WorldError> {
        let owner = self.user(owner)?;
        let contact = self.user(contact)?;
        let contact_devices: Vec<DeviceUid> = contact.devices.iter().map(|d| d.uid).collect();

        for device in &owner.devices {
            device.backend.add_contact(
                &owner.owned.identity,
                &contact.owned.identity,
                ContactDetails::named(&contact.name),
                contact_devices.iter().copied(),
            )?;
            for &remote_device in &contact_devices {
                device.backend.open_channel(
                    &owner.owned.identity,
                    &contact.owned.identity,
                    remote_device,
                )?;
            }
        }
        Ok(())
    }

    /// Public identity of a user.
    pub fn identity(&self, user: UserId) -> Result<&Identity, WorldError> {
        Ok(&self.user(user)?.owned.identity)
    }

    /// Number of devices of a user.
    pub fn device_count(&self, user: UserId) -> Result<usize, WorldError> {
        Ok(self.user(user)?.devices.len())
    }

    /// Backend of one device, for inspection and fault injection.
    pub fn backend(&self, user: UserId, device: usize) -> Result<&MemoryBackend, WorldError> {
        Ok(&self.device(user, device)?.backend)
    }

    /// Notifications committed on one device, in order.
    pub fn notifications(
        &self,
        user: UserId,
        device: usize,
    ) -> Result<&[ProtocolNotification], WorldError> {
        Ok(&self.device(user, device)?.notifications)
    }

    /// Make `point` fail on one device.
    pub fn inject_fault(
        &self,
        user: UserId,
        device: usize,
        point: FaultPoint,
    ) -> Result<(), WorldError> {
        self.device(user, device)?.backend.inject_fault(point);
        Ok(())
    }

    /// Delivery counters so far.
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Packets waiting to be delivered, held back ones included.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len() + self.deferred.len()
    }

    /// Bob's invitation signature for Alice, as his code would show it.
    pub fn invitation(&mut self, bob: UserId, alice: UserId) -> Result<Vec<u8>, WorldError> {
        let alice = self.user(alice)?.owned.identity.clone();
        let bob = &self.users.get(bob).ok_or(WorldError::UnknownUser(bob))?.owned;
        Ok(sign_invitation(bob, &alice, &mut self.rng)?)
    }

    /// Alice scans Bob's code on one of her devices.
    pub fn start_mutual_scan(
        &mut self,
        alice: UserId,
        device: usize,
        bob: UserId,
    ) -> Result<DispatchOutcome, WorldError> {
        let signature = self.invitation(bob, alice)?;
        self.start_mutual_scan_with(alice, device, bob, &signature)
    }

    /// Alice scans a code for Bob carrying `signature`.
    pub fn start_mutual_scan_with(
        &mut self,
        alice: UserId,
        device: usize,
        bob: UserId,
        signature: &[u8],
    ) -> Result<DispatchOutcome, WorldError> {
        let bob = self.identity(bob)?.clone();
        let owner = self.identity(alice)?.clone();
        let outcome =
            self.device(alice, device)?.engine.start_mutual_scan(&owner, &bob, signature)?;
        self.record(alice, device, &outcome)?;
        Ok(outcome)
    }

    /// `owner` deletes `contact` on one device.
    pub fn start_contact_deletion(
        &mut self,
        owner: UserId,
        device: usize,
        contact: UserId,
    ) -> Result<DispatchOutcome, WorldError> {
        let contact = self.identity(contact)?.clone();
        let identity = self.identity(owner)?.clone();
        let outcome =
            self.device(owner, device)?.engine.start_contact_deletion(&identity, &contact)?;
        self.record(owner, device, &outcome)?;
        Ok(outcome)
    }

    /// Deliver one packet. Returns `false` when nothing is in flight.
    pub fn step(&mut self) -> Result<bool, WorldError> {
        if self.in_flight.is_empty() {
            self.redeliver_deferred();
        }
        let index = if self.faults.reorder && self.in_flight.len() > 1 {
            self.rng.gen_range(0..self.in_flight.len())
        } else {
            0
        };
        let Some(packet) = self.in_flight.remove(index) else {
            return Ok(false);
        };
        self.deliver(packet)?;
        Ok(true)
    }

    /// Deliver until nothing is in flight.
    ///
    /// # Errors
    ///
    /// `WorldError::NotQuiescent` if packets remain after `max_deliveries`.
    pub fn run(&mut self, max_deliveries: usize) -> Result<usize, WorldError> {
        let mut deliveries = 0;
        while self.step()? {
            deliveries += 1;
            if deliveries >= max_deliveries && self.in_flight() > 0 {
                return Err(WorldError::NotQuiescent(deliveries));
            }
        }
        debug!(deliveries, stats = ?self.stats, "world quiescent");
        Ok(deliveries)
    }

    /// Put held back packets on the network again, or drop them when the
    /// last round changed nothing they could be waiting for.
    fn redeliver_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        if self.progressed {
            debug!(packets = self.deferred.len(), "redelivering held back packets");
            self.progressed = false;
            self.in_flight.extend(self.deferred.drain(..));
        } else {
            warn!(packets = self.deferred.len(), "dropping packets whose instance never started");
            self.stats.rejected += self.deferred.len();
            self.deferred.clear();
        }
    }

    fn deliver(&mut self, packet: Packet) -> Result<(), WorldError> {
        let (user, device) = (packet.user, packet.device);
        let bytes = match &packet.body {
            Body::Plain(bytes) => bytes.clone(),
            Body::Sealed(sealed) => {
                match kem::open(&self.user(user)?.owned.encryption.private, sealed) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        warn!(user, device, error = %err, "dropping packet that does not open");
                        self.stats.rejected += 1;
                        return Ok(());
                    },
                }
            },
        };

        let owner = self.identity(user)?.clone();
        let engine = &self.device(user, device)?.engine;
        let result = engine.dispatch(&owner, packet.channel.clone(), &bytes);
        match result {
            Ok(outcome) => {
                self.stats.delivered += 1;
                self.record(user, device, &outcome)?;
            },
            Err(ProtocolError::UnknownInstance { message }) => {
                debug!(user, device, message, "holding back packet until its instance starts");
                self.stats.deferred += 1;
                self.deferred.push(packet);
            },
            Err(err) => {
                debug!(user, device, error = %err, fatal = err.is_fatal(), "packet rejected");
                self.stats.rejected += 1;
            },
        }
        Ok(())
    }

    /// Keep the outcome's notifications and put the device's outbox on the
    /// network.
    fn record(
        &mut self,
        user: UserId,
        device: usize,
        outcome: &DispatchOutcome,
    ) -> Result<(), WorldError> {
        if matches!(outcome.status, InstanceStatus::Cancelled { .. }) {
            self.stats.cancelled += 1;
        }
        self.progressed = true;
        let sim_device = self
            .users
            .get_mut(user)
            .and_then(|u| u.devices.get_mut(device))
            .ok_or(WorldError::UnknownDevice { user, device })?;
        sim_device.notifications.extend(outcome.notifications.iter().cloned());
        let outbox = sim_device.backend.drain_outbox();

        for message in outbox {
            let bytes = message.message.encode()?;
            for route in self.routes(user, device, &message)? {
                let body = match &route.seal_to {
                    Some(remote) => {
                        Body::Sealed(kem::seal(remote.encryption_key(), &bytes, &mut self.rng)?)
                    },
                    None => Body::Plain(bytes.clone()),
                };
                self.send(Packet {
                    user: route.user,
                    device: route.device,
                    channel: route.channel,
                    body,
                });
            }
        }
        Ok(())
    }

    fn send(&mut self, packet: Packet) {
        if self.faults.duplicate_rate > 0.0 && self.rng.gen_bool(self.faults.duplicate_rate) {
            self.stats.duplicated += 1;
            self.in_flight.push_back(packet.clone());
        }
        self.in_flight.push_back(packet);
    }

    fn routes(
        &self,
        user: UserId,
        device: usize,
        message: &OutgoingMessage,
    ) -> Result<Vec<Route>, WorldError> {
        let sender = self.user(user)?;
        let sender_uid = self.device(user, device)?.uid;

        let routes = match &message.channel {
            SendChannel::Local => {
                vec![Route { user, device, channel: ReceptionChannel::Local, seal_to: None }]
            },
            SendChannel::AllSecureChannelsWith { contact } => {
                let Some(&target) = self.by_identity.get(contact) else {
                    warn!(%contact, "no route to unknown contact");
                    return Ok(Vec::new());
                };
                (0..self.device_count(target)?)
                    .map(|device| Route {
                        user: target,
                        device,
                        channel: ReceptionChannel::SecureChannel {
                            remote: sender.owned.identity.clone(),
                            remote_device: sender_uid,
                        },
                        seal_to: None,
                    })
                    .collect()
            },
            SendChannel::AllOwnedDevices => (0..sender.devices.len())
                .filter(|&other| other != device)
                .map(|other| Route {
                    user,
                    device: other,
                    channel: ReceptionChannel::OwnedDevice { remote_device: sender_uid },
                    seal_to: None,
                })
                .collect(),
            SendChannel::AsymmetricBroadcast { remote } => self.asymmetric(remote, |_| true),
            SendChannel::Asymmetric { remote, devices } => {
                self.asymmetric(remote, |uid| devices.contains(uid))
            },
        };
        Ok(routes)
    }

    fn asymmetric(&self, remote: &Identity, accept: impl Fn(&DeviceUid) -> bool) -> Vec<Route> {
        let Some(&target) = self.by_identity.get(remote) else {
            warn!(%remote, "no route to unknown identity");
            return Vec::new();
        };
        self.users[target]
            .devices
            .iter()
            .enumerate()
            .filter(|(_, d)| accept(&d.uid))
            .map(|(device, _)| Route {
                user: target,
                device,
                channel: ReceptionChannel::Asymmetric,
                seal_to: Some(remote.clone()),
            })
            .collect()
    }

    fn user(&self, user: UserId) -> Result<&SimUser, WorldError> {
        self.users.get(user).ok_or(WorldError::UnknownUser(user))
    }

    fn device(&self, user: UserId, device: usize) -> Result<&SimDevice, WorldError> {
        self.user(user)?.devices.get(device).ok_or(WorldError::UnknownDevice { user, device })
    }
}
