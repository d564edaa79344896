//! Protocol engine
//!
//! Routes incoming messages to the step they address and runs it inside a
//! backend transaction.
//!
//! ## Dispatch
//!
//! 1. Decode the envelope (malformed bytes are logged and dropped)
//! 2. Lock the instance `(owner, protocol, uid)`
//! 3. Begin a transaction, load the state (`Initial` when none)
//! 4. Resolve the step for `(state id, message id)`. With no instance only
//!    initial messages are accepted; a running instance parks a message
//!    whose step is not reachable yet
//! 5. Check the channel kind and the sender
//! 6. Run the step, persist or delete the state, commit
//! 7. Replay parked messages against the new state
//!
//! A failing step never commits anything: its transaction is dropped and the
//! instance is cancelled in a fresh one.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};
use trellis_proto::{ProtocolId, ProtocolMessage, Uid};

use super::{
    Driver, ErasedNext, ExpectedSender, INITIAL_STATE, Protocol, ProtocolDriver, RunError,
    StepContext, StepInfo, contact_deletion::ContactDeletion, envelope, locks::InstanceLocks,
    mutual_scan::MutualScan,
};
use crate::{
    backend::{InstanceKey, InstanceRecord, ParkedMessage, ProtocolBackend, Transaction},
    channel::ReceptionChannel,
    config::EngineConfig,
    env::{EnvRng, Environment},
    error::ProtocolError,
    identity::Identity,
    notification::ProtocolNotification,
};

/// Where an instance stands after a message was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceStatus {
    /// No step accepts the message yet; it waits for the instance to move.
    Parked,
    /// Waiting for the next message in `state`.
    InProgress {
        /// State name.
        state: &'static str,
    },
    /// Terminated successfully.
    Finished,
    /// Terminated by a failing step. Nothing the step did was committed.
    Cancelled {
        /// Step failure.
        reason: String,
    },
}

impl InstanceStatus {
    /// Finished or cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled { .. })
    }
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Protocol addressed.
    pub protocol: ProtocolId,
    /// Instance addressed.
    pub instance: Uid,
    /// Status after the message (and any replayed parked messages).
    pub status: InstanceStatus,
    /// Committed notifications, in order.
    pub notifications: Vec<ProtocolNotification>,
}

impl DispatchOutcome {
    fn new(key: &InstanceKey, status: InstanceStatus) -> Self {
        Self { protocol: key.protocol, instance: key.uid, status, notifications: Vec::new() }
    }
}

/// Sans-IO protocol engine.
///
/// `Send + Sync`: share it between threads behind an `Arc`. Messages for one
/// instance are serialized, unrelated instances run in parallel.
pub struct ProtocolEngine<E, B>
where
    E: Environment,
    B: ProtocolBackend,
{
    env: E,
    backend: B,
    config: EngineConfig,
    protocols: BTreeMap<ProtocolId, Box<dyn ProtocolDriver>>,
    locks: InstanceLocks,
}

impl<E, B> ProtocolEngine<E, B>
where
    E: Environment,
    B: ProtocolBackend,
{
    /// Engine with the built-in protocols registered.
    pub fn new(env: E, backend: B, config: EngineConfig) -> Self {
        let mut engine = Self {
            env,
            backend,
            config,
            protocols: BTreeMap::new(),
            locks: InstanceLocks::default(),
        };
        engine.register::<ContactDeletion>();
        engine.register::<MutualScan>();
        engine
    }

    fn register<P: Protocol>(&mut self) {
        let driver: Box<dyn ProtocolDriver> = Box::new(Driver::<P>::new());
        debug!(protocol = %driver.id(), name = driver.name(), "registered protocol");
        self.protocols.insert(P::ID, driver);
    }

    /// Backend the engine runs against.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registered protocol ids.
    pub fn protocols(&self) -> impl Iterator<Item = ProtocolId> + '_ {
        self.protocols.keys().copied()
    }

    /// Instances with a message currently being handled.
    pub fn active_instances(&self) -> usize {
        self.locks.active()
    }

    /// Decode an envelope and handle it.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Decode` if the bytes are not an envelope
    /// - any error of [`deliver`](Self::deliver)
    pub fn dispatch(
        &self,
        owner: &Identity,
        channel: ReceptionChannel,
        bytes: &[u8],
    ) -> Result<DispatchOutcome, ProtocolError> {
        let message = ProtocolMessage::decode(bytes).map_err(|err| {
            warn!(%owner, channel = %channel.kind(), error = %err, "dropping malformed envelope");
            ProtocolError::Decode(err)
        })?;
        self.deliver(owner, channel, message)
    }

    /// Handle a decoded envelope.
    ///
    /// A step that fails is not an error here: the instance is cancelled and
    /// reported as [`InstanceStatus::Cancelled`].
    ///
    /// # Errors
    ///
    /// Rejections that leave the instance untouched: unknown protocol, bad
    /// payload, non-initial message without an instance, wrong channel or
    /// sender, terminated instance, parking limit, backend failure outside
    /// the step.
    pub fn deliver(
        &self,
        owner: &Identity,
        channel: ReceptionChannel,
        message: ProtocolMessage,
    ) -> Result<DispatchOutcome, ProtocolError> {
        let Some(driver) = self.protocols.get(&message.protocol_id) else {
            warn!(%owner, protocol = %message.protocol_id, "dropping message for unknown protocol");
            return Err(ProtocolError::UnknownProtocol(message.protocol_id));
        };

        let key = InstanceKey {
            owner: owner.clone(),
            protocol: message.protocol_id,
            uid: message.instance_uid,
        };

        self.locks.with(&key, || {
            let mut outcome = self.step(driver.as_ref(), &key, &channel, &message)?;
            if self.config.replay_parked {
                self.replay_parked(driver.as_ref(), &key, &mut outcome)?;
            }
            Ok(outcome)
        })
    }

    /// Delete a running instance and its parked messages.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InstanceTerminated` if the instance already ended
    /// - `ProtocolError::InstanceNotFound` if nothing is stored for it
    pub fn abort(
        &self,
        owner: &Identity,
        protocol: ProtocolId,
        uid: Uid,
    ) -> Result<(), ProtocolError> {
        let key = InstanceKey { owner: owner.clone(), protocol, uid };
        self.locks.with(&key, || {
            let mut txn = self.backend.begin()?;
            if txn.is_terminated(&key)? {
                return Err(ProtocolError::InstanceTerminated);
            }
            if txn.load(&key)?.is_none() && txn.parked_count(&key)? == 0 {
                return Err(ProtocolError::InstanceNotFound);
            }
            txn.delete(&key)?;
            txn.commit()?;
            info!(%owner, %protocol, instance = ?uid, "instance aborted");
            Ok(())
        })
    }

    /// Start a protocol on this device with a fresh instance uid.
    pub fn start<P: Protocol>(
        &self,
        owner: &Identity,
        message: &P::Message,
    ) -> Result<DispatchOutcome, ProtocolError> {
        let uid = self.env.random_uid();
        let message = envelope::<P>(uid, message).map_err(ProtocolError::Encoding)?;
        debug!(%owner, protocol = P::NAME, instance = ?uid, "starting protocol");
        self.deliver(owner, ReceptionChannel::Local, message)
    }

    fn step(
        &self,
        driver: &dyn ProtocolDriver,
        key: &InstanceKey,
        channel: &ReceptionChannel,
        message: &ProtocolMessage,
    ) -> Result<DispatchOutcome, ProtocolError> {
        let mut txn = self.backend.begin()?;
        if txn.is_terminated(key)? {
            debug!(instance = ?key.uid, "message for terminated instance");
            return Err(ProtocolError::InstanceTerminated);
        }

        let record = txn.load(key)?;
        let state_id = record.as_ref().map_or(INITIAL_STATE, |r| r.state_id);

        let Some(step) = driver.resolve(state_id, message.message_id) else {
            if record.is_none() {
                return Err(Self::orphan(driver, key, message));
            }
            return self.park(driver, key, channel, message, txn);
        };

        self.check_channel(step, channel)?;
        self.check_sender(step, key, channel, &*txn)?;

        let mut rng = EnvRng::new(self.env.clone());
        let mut ctx = StepContext::new(
            &key.owner,
            key.protocol,
            key.uid,
            step.name,
            channel,
            &mut *txn,
            &mut rng,
        );
        let result =
            driver.run(step.index, record.as_ref().map(|r| r.state.as_slice()), message, &mut ctx);
        let notifications = ctx.into_notifications();

        let next = match result {
            Ok(next) => next,
            Err(RunError::Payload(reason)) => {
                warn!(step = step.name, %reason, "dropping message with malformed payload");
                return Err(ProtocolError::Payload { reason });
            },
            Err(RunError::Step(err)) => {
                drop(txn);
                warn!(
                    protocol = driver.name(),
                    step = step.name,
                    instance = ?key.uid,
                    error = %err,
                    "step failed, cancelling instance"
                );
                self.cancel(key)?;
                return Ok(DispatchOutcome::new(key, InstanceStatus::Cancelled {
                    reason: err.to_string(),
                }));
            },
        };

        let status = match next {
            ErasedNext::State { id, name, bytes } => {
                txn.save(InstanceRecord { key: key.clone(), state_id: id, state: bytes })?;
                InstanceStatus::InProgress { state: name }
            },
            ErasedNext::Finished => {
                txn.delete(key)?;
                InstanceStatus::Finished
            },
        };
        txn.commit()?;

        info!(
            protocol = driver.name(),
            step = step.name,
            instance = ?key.uid,
            status = ?status,
            "step committed"
        );

        let mut outcome = DispatchOutcome::new(key, status);
        outcome.notifications = notifications;
        Ok(outcome)
    }

    /// Rejection for a message that needs an instance nobody started.
    fn orphan(
        driver: &dyn ProtocolDriver,
        key: &InstanceKey,
        message: &ProtocolMessage,
    ) -> ProtocolError {
        if let Err(reason) = driver.validate(message) {
            warn!(protocol = driver.name(), %reason, "dropping unroutable message");
            return ProtocolError::Payload { reason };
        }
        debug!(
            protocol = driver.name(),
            instance = ?key.uid,
            message = message.message_id,
            "no running instance for non-initial message"
        );
        ProtocolError::UnknownInstance { message: message.message_id }
    }

    fn park(
        &self,
        driver: &dyn ProtocolDriver,
        key: &InstanceKey,
        channel: &ReceptionChannel,
        message: &ProtocolMessage,
        mut txn: Box<dyn Transaction + '_>,
    ) -> Result<DispatchOutcome, ProtocolError> {
        if let Err(reason) = driver.validate(message) {
            warn!(protocol = driver.name(), %reason, "dropping unroutable message");
            return Err(ProtocolError::Payload { reason });
        }

        let limit = self.config.max_parked_messages;
        if txn.parked_count(key)? >= limit {
            warn!(instance = ?key.uid, limit, "parked message limit reached");
            return Err(ProtocolError::TooManyParked { limit });
        }

        txn.park(key, ParkedMessage { channel: channel.clone(), message: message.clone() })?;
        txn.commit()?;
        debug!(
            protocol = driver.name(),
            instance = ?key.uid,
            message = message.message_id,
            "message parked until its step is reachable"
        );
        Ok(DispatchOutcome::new(key, InstanceStatus::Parked))
    }

    fn check_channel(
        &self,
        step: StepInfo,
        channel: &ReceptionChannel,
    ) -> Result<(), ProtocolError> {
        if channel.kind() == step.channel {
            return Ok(());
        }
        warn!(
            step = step.name,
            expected = %step.channel,
            actual = %channel.kind(),
            "wrong channel"
        );
        Err(ProtocolError::UnexpectedChannel {
            step: step.name,
            expected: step.channel,
            actual: channel.kind(),
        })
    }

    fn check_sender(
        &self,
        step: StepInfo,
        key: &InstanceKey,
        channel: &ReceptionChannel,
        txn: &dyn Transaction,
    ) -> Result<(), ProtocolError> {
        let rejected = match (step.sender, channel) {
            (ExpectedSender::Unauthenticated, _)
            | (ExpectedSender::Owner, ReceptionChannel::Local) => None,
            (ExpectedSender::Owner, ReceptionChannel::OwnedDevice { remote_device }) => {
                let ours = txn.other_device_uids(&key.owner)?;
                (!ours.contains(remote_device)).then_some("device is not one of the owner's")
            },
            (ExpectedSender::Contact, ReceptionChannel::SecureChannel { remote, .. }) => {
                (!txn.is_contact(&key.owner, remote)?).then_some("sender is not a contact")
            },
            (ExpectedSender::Owner, _) => Some("sender is not the owner"),
            (ExpectedSender::Contact, _) => Some("sender is not authenticated"),
        };

        match rejected {
            None => Ok(()),
            Some(reason) => {
                warn!(step = step.name, reason, "unexpected sender");
                Err(ProtocolError::UnexpectedSender { step: step.name, reason })
            },
        }
    }

    fn cancel(&self, key: &InstanceKey) -> Result<(), ProtocolError> {
        let mut txn = self.backend.begin()?;
        txn.delete(key)?;
        txn.commit()?;
        Ok(())
    }

    fn replay_parked(
        &self,
        driver: &dyn ProtocolDriver,
        key: &InstanceKey,
        outcome: &mut DispatchOutcome,
    ) -> Result<(), ProtocolError> {
        loop {
            if !matches!(outcome.status, InstanceStatus::InProgress { .. }) {
                return Ok(());
            }

            let parked = {
                let mut txn = self.backend.begin()?;
                let parked = txn.take_parked(key)?;
                if parked.is_empty() {
                    return Ok(());
                }
                txn.commit()?;
                parked
            };

            let mut progressed = false;
            for ParkedMessage { channel, message } in parked {
                match self.step(driver, key, &channel, &message) {
                    Ok(next) => {
                        if next.status != InstanceStatus::Parked {
                            progressed = true;
                            outcome.status = next.status;
                        }
                        outcome.notifications.extend(next.notifications);
                    },
                    Err(err) => {
                        warn!(instance = ?key.uid, error = %err, "dropping parked message");
                    },
                }
            }

            if !progressed {
                return Ok(());
            }
        }
    }
}

impl<E, B> std::fmt::Debug for ProtocolEngine<E, B>
where
    E: Environment,
    B: ProtocolBackend,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("protocols", &self.protocols.keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
