//! The local user's session identity.
//!
//! Created lazily on the first connect and destroyed on disconnect;
//! the private key is exclusively owned by this process and is never
//! serialized or transmitted.

use parley_shared::crypto::{self, KeyPair, PortablePublicKey, PrivateKey, PublicKey};
use parley_shared::types::UserId;

#[derive(Clone)]
pub struct Identity {
    pub user_id: UserId,
    pub user_name: String,
    key_pair: KeyPair,
}

impl Identity {
    /// Create an identity with a freshly generated ECDH keypair.
    pub fn new(user_id: UserId, user_name: impl Into<String>) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            key_pair: crypto::generate_keypair(),
        }
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.key_pair.private
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.key_pair.public
    }

    /// The JWK form of our public key, as announced in presence frames.
    pub fn portable_public_key(&self) -> PortablePublicKey {
        crypto::export_public_key(&self.key_pair.public)
    }
}
