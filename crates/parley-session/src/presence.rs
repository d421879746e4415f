//! Presence ledger: who is in the chat right now.
//!
//! Two lists, never merged: `current_chat` holds our own confirmed
//! announcements (the server echoing us back), `other_sides` holds
//! every other peer. The aggregate status is derived from
//! `other_sides` alone.

use tracing::debug;

use parley_shared::protocol::ConnectionFrame;
use parley_shared::types::{AggregateStatus, PeerConnection, UserId};

/// What one observed presence frame changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceOutcome {
    /// The server echoed our own join back; we are provably in the
    /// chat for the first time.
    SelfConfirmed,
    /// A peer we had not seen before (or had seen leave) is present.
    NewPeer(PeerConnection),
    /// A known peer disconnected and was dropped from the ledger.
    Removed,
    /// Nothing changed (repeat announcement, unknown leaver).
    NoOp,
}

pub struct PresenceLedger {
    local_user_id: UserId,
    current_chat: Vec<PeerConnection>,
    other_sides: Vec<PeerConnection>,
}

impl PresenceLedger {
    pub fn new(local_user_id: UserId) -> Self {
        Self {
            local_user_id,
            current_chat: Vec::new(),
            other_sides: Vec::new(),
        }
    }

    /// Fold one presence frame into the ledger.
    ///
    /// Re-announcements from known present peers are idempotent: the
    /// stored entry is left untouched, so a `StayingAlive` heartbeat
    /// never looks like a new join.
    pub fn observe(&mut self, frame: &ConnectionFrame) -> PresenceOutcome {
        let peer = PeerConnection {
            user_id: frame.user_id.clone(),
            user_name: frame.user_name.clone(),
            public_key: frame.public_key.clone(),
            status: frame.status,
        };

        if frame.user_id == self.local_user_id {
            let known = self.current_chat.iter().any(|p| p.user_id == frame.user_id);
            return match (frame.status.is_present(), known) {
                (true, false) => {
                    self.current_chat.push(peer);
                    PresenceOutcome::SelfConfirmed
                }
                (false, true) => {
                    self.current_chat.retain(|p| p.user_id != frame.user_id);
                    PresenceOutcome::Removed
                }
                _ => PresenceOutcome::NoOp,
            };
        }

        let known = self.other_sides.iter().any(|p| p.user_id == frame.user_id);
        match (frame.status.is_present(), known) {
            (true, false) => {
                debug!(peer = %frame.user_id, status = ?frame.status, "peer joined");
                self.other_sides.push(peer.clone());
                PresenceOutcome::NewPeer(peer)
            }
            (false, true) => {
                debug!(peer = %frame.user_id, "peer left");
                self.remove(&frame.user_id);
                PresenceOutcome::Removed
            }
            _ => PresenceOutcome::NoOp,
        }
    }

    /// Drop one peer from the ledger; unknown ids are a no-op.
    pub fn remove(&mut self, user_id: &UserId) {
        self.other_sides.retain(|p| &p.user_id != user_id);
    }

    pub fn find_peer(&self, user_id: &UserId) -> Option<&PeerConnection> {
        self.other_sides.iter().find(|p| &p.user_id == user_id)
    }

    pub fn other_sides(&self) -> &[PeerConnection] {
        &self.other_sides
    }

    pub fn current_chat(&self) -> &[PeerConnection] {
        &self.current_chat
    }

    /// Active iff at least one other peer is present.
    pub fn aggregate_status(&self) -> AggregateStatus {
        if self.other_sides.iter().any(|p| p.status.is_present()) {
            AggregateStatus::Active
        } else {
            AggregateStatus::Inactive
        }
    }

    pub fn clear(&mut self) {
        self.current_chat.clear();
        self.other_sides.clear();
    }
}
