//! Notifications produced for the application layer.
//!
//! Returned by the engine only once the transition that produced them has
//! committed, so the application never reacts to a rolled-back change.

use crate::identity::Identity;

/// User-visible effect of a committed transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolNotification {
    /// A contact was added by a completed mutual scan.
    MutualScanContactAdded {
        /// Identity that now trusts `contact`.
        owner: Identity,
        /// New contact.
        contact: Identity,
        /// Signature accepted as proof of consent.
        signature: Vec<u8>,
    },

    /// A contact was deleted, locally or by the remote side.
    ContactDeleted {
        /// Identity that lost the contact.
        owner: Identity,
        /// Removed contact.
        contact: Identity,
    },
}

impl ProtocolNotification {
    /// Owner the notification is addressed to.
    pub fn owner(&self) -> &Identity {
        match self {
            Self::MutualScanContactAdded { owner, .. } | Self::ContactDeleted { owner, .. } => {
                owner
            },
        }
    }
}
