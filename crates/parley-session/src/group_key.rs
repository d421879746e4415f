//! Group key lifecycle: creation, pairwise distribution, and
//! last-writer-wins conflict resolution.
//!
//! Every session that believes it is first creates its own key, so two
//! peers joining simultaneously each hold a different one. Conflicts
//! resolve deterministically on the key's creation timestamp: newest
//! wins, and on an exact tie the key from the lexicographically
//! smaller user id wins. Both sides run the same comparison, so they
//! converge without further rounds.

use chrono::NaiveDateTime;
use tracing::{debug, info};

use parley_shared::crypto::{self, PublicKey, SymmetricKey};
use parley_shared::protocol::{self, GroupKeyFrame};
use parley_shared::types::PeerConnection;

use crate::error::SessionError;
use crate::identity::Identity;

/// The group key together with the timestamp that orders it against
/// competing keys.
#[derive(Debug, Clone)]
pub struct GroupSecret {
    pub key: SymmetricKey,
    pub creation_date: NaiveDateTime,
}

/// What receiving one GroupKey frame did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyReceipt {
    /// The received key replaced (or became) our current key.
    Installed,
    /// Our key is newer; the sender is stale and needs ours.
    KeptNewer,
    /// We cannot verify the sender (unknown public key); re-announce
    /// presence so the exchange restarts cleanly.
    NeedsResync,
    /// Frame was not addressed to us, or carried our own key back.
    Ignored,
}

#[derive(Default)]
pub struct GroupKeyManager {
    current: Option<GroupSecret>,
}

impl GroupKeyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&GroupSecret> {
        self.current.as_ref()
    }

    pub fn current_key(&self) -> Option<&SymmetricKey> {
        self.current.as_ref().map(|s| &s.key)
    }

    /// Create a fresh group key stamped with the current time.
    pub fn create_new(&mut self) -> &GroupSecret {
        let secret = GroupSecret {
            key: crypto::generate_group_key(),
            creation_date: protocol::now_seconds(),
        };
        info!(created_at = %secret.creation_date, "created new group key");
        self.current.insert(secret)
    }

    /// Encrypt the current key for one peer under the pairwise ECDH
    /// key, ready to send.
    pub fn distribute_to(
        &self,
        identity: &Identity,
        peer: &PeerConnection,
    ) -> Result<GroupKeyFrame, SessionError> {
        let secret = self.current.as_ref().ok_or(SessionError::MissingGroupKey)?;

        let peer_public = crypto::import_public_key(&peer.public_key)?;
        let pairwise = crypto::derive_shared_key(identity.private_key(), &peer_public);

        let raw = crypto::export_symmetric_raw(&secret.key);
        let (ciphertext, nonce) = crypto::encrypt(&pairwise, &raw)?;

        Ok(GroupKeyFrame {
            encrypted_key: protocol::encode_b64(&ciphertext),
            iv: protocol::encode_b64(&nonce),
            creation_date: secret.creation_date,
            for_user_id: peer.user_id.clone(),
            from_user_id: identity.user_id.clone(),
        })
    }

    /// Fold one received GroupKey frame into our state.
    ///
    /// `sender_public` is the sender's key from the presence ledger;
    /// `None` means we have never seen the sender announce itself, in
    /// which case the only safe move is a presence resync.
    pub fn receive(
        &mut self,
        identity: &Identity,
        frame: &GroupKeyFrame,
        sender_public: Option<&PublicKey>,
    ) -> Result<KeyReceipt, SessionError> {
        if frame.for_user_id != identity.user_id {
            return Ok(KeyReceipt::Ignored);
        }

        if let Some(current) = &self.current {
            match frame.creation_date.cmp(&current.creation_date) {
                std::cmp::Ordering::Less => return Ok(KeyReceipt::KeptNewer),
                std::cmp::Ordering::Equal => {
                    // Same timestamp: the smaller user id's key wins.
                    if frame.from_user_id == identity.user_id {
                        return Ok(KeyReceipt::Ignored);
                    }
                    if identity.user_id < frame.from_user_id {
                        return Ok(KeyReceipt::KeptNewer);
                    }
                }
                std::cmp::Ordering::Greater => {}
            }
        }

        let Some(sender_public) = sender_public else {
            debug!(from = %frame.from_user_id, "group key from unannounced peer");
            return Ok(KeyReceipt::NeedsResync);
        };

        let pairwise = crypto::derive_shared_key(identity.private_key(), sender_public);
        let ciphertext = protocol::decode_b64(&frame.encrypted_key, "encrypted_key")?;
        let nonce = protocol::decode_b64(&frame.iv, "iv")?;
        let raw = crypto::decrypt(&pairwise, &ciphertext, &nonce)?;
        let key = crypto::import_symmetric_raw(&raw)?;

        info!(from = %frame.from_user_id, created_at = %frame.creation_date, "installed group key");
        self.current = Some(GroupSecret {
            key,
            creation_date: frame.creation_date,
        });
        Ok(KeyReceipt::Installed)
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
