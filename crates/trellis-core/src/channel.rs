//! Channel kinds: how a message may arrive and where it is sent.
//!
//! A step declares the [`ChannelKind`] its message must arrive through. The
//! engine compares it with the [`ReceptionChannel`] reported by the transport
//! before anything runs, so a message relayed through the wrong kind of
//! channel never reaches the step.

use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};
use trellis_proto::ProtocolMessage;

use crate::identity::{DeviceUid, Identity};

/// Delivery-path requirement declared by a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Dispatched locally by the owner's own device.
    Local,
    /// Confirmed secure channel with a remote identity.
    SecureChannel,
    /// Secure channel with one of the owner's other devices.
    OwnedDevice,
    /// Anonymous sealed box; the sender is not authenticated.
    Asymmetric,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Local => "local",
            Self::SecureChannel => "secure channel",
            Self::OwnedDevice => "owned device",
            Self::Asymmetric => "asymmetric",
        };
        f.write_str(name)
    }
}

/// Channel a message actually arrived through, as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceptionChannel {
    /// Produced on this device.
    Local,
    /// Secure channel with `remote`'s device `remote_device`.
    SecureChannel {
        /// Authenticated remote identity.
        remote: Identity,
        /// Sending device.
        remote_device: DeviceUid,
    },
    /// Secure channel with another device of the owner.
    OwnedDevice {
        /// Sending device.
        remote_device: DeviceUid,
    },
    /// Opened sealed box of unknown origin.
    Asymmetric,
}

impl ReceptionChannel {
    /// Kind of this channel.
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Local => ChannelKind::Local,
            Self::SecureChannel { .. } => ChannelKind::SecureChannel,
            Self::OwnedDevice { .. } => ChannelKind::OwnedDevice,
            Self::Asymmetric => ChannelKind::Asymmetric,
        }
    }

    /// Authenticated remote identity, for secure channels.
    pub fn remote_identity(&self) -> Option<&Identity> {
        match self {
            Self::SecureChannel { remote, .. } => Some(remote),
            _ => None,
        }
    }
}

/// Where an emitted message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendChannel {
    /// Back into the local engine.
    Local,
    /// Every confirmed secure channel with `contact`'s devices.
    AllSecureChannelsWith {
        /// Recipient.
        contact: Identity,
    },
    /// Every other device of the owner.
    AllOwnedDevices,
    /// Sealed boxes to every device of `remote`.
    AsymmetricBroadcast {
        /// Recipient.
        remote: Identity,
    },
    /// Sealed boxes to the listed devices of `remote`.
    Asymmetric {
        /// Recipient.
        remote: Identity,
        /// Recipient devices.
        devices: BTreeSet<DeviceUid>,
    },
}

impl SendChannel {
    /// Kind the recipient will observe.
    pub fn reception_kind(&self) -> ChannelKind {
        match self {
            Self::Local => ChannelKind::Local,
            Self::AllSecureChannelsWith { .. } => ChannelKind::SecureChannel,
            Self::AllOwnedDevices => ChannelKind::OwnedDevice,
            Self::AsymmetricBroadcast { .. } | Self::Asymmetric { .. } => ChannelKind::Asymmetric,
        }
    }
}

/// Message handed to the channel dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Identity sending the message.
    pub owner: Identity,
    /// Destination.
    pub channel: SendChannel,
    /// Envelope.
    pub message: ProtocolMessage,
}
