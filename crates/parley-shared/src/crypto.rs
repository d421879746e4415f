//! Cryptographic primitives for the group-key exchange.
//!
//! Asymmetric side: ECDH over NIST P-384, used exclusively for key
//! derivation. Symmetric side: AES-256-GCM with a fresh random 96-bit
//! nonce per encryption. Public keys travel between peers as JWK (the
//! portable form every peer can import); the group key itself travels
//! as raw bytes, encrypted under a pairwise-derived key.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use p384::ecdh::diffie_hellman;
use p384::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p384::{EncodedPoint, FieldBytes, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::{FIELD_ELEMENT_SIZE, JWK_CRV, JWK_KTY, NONCE_SIZE, SYMMETRIC_KEY_SIZE};
use crate::error::CryptoError;

/// ECDH private key. Exclusively owned by the local session, never
/// serialized or transmitted.
#[derive(Clone)]
pub struct PrivateKey(SecretKey);

/// ECDH public key, shared with peers in portable (JWK) form.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(p384::PublicKey);

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey(P-384)")
    }
}

/// An ECDH keypair bound to one session.
#[derive(Clone)]
pub struct KeyPair {
    pub private: PrivateKey,
    pub public: PublicKey,
}

/// AES-256-GCM key. Either a pairwise key derived via ECDH or the
/// shared group key.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey(..)")
    }
}

/// JWK form of a P-384 public key, the wire format for key exchange.
///
/// `key_ops` is kept explicitly empty: Chrome (2024+) rejects imports
/// when the member is absent, so every peer ships it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortablePublicKey {
    pub crv: String,
    pub ext: bool,
    pub key_ops: Vec<String>,
    pub kty: String,
    pub x: String,
    pub y: String,
}

/// Generate a fresh P-384 keypair usable only for key derivation.
pub fn generate_keypair() -> KeyPair {
    let secret = SecretKey::random(&mut OsRng);
    let public = PublicKey(secret.public_key());
    KeyPair {
        private: PrivateKey(secret),
        public,
    }
}

/// Derive the pairwise symmetric key from our private key and a peer's
/// public key.
///
/// ECDH symmetry guarantees both directions produce the identical key,
/// so the same derivation encrypts a group key for a peer and decrypts
/// one received from them. The AES-256 key is the leading 32 bytes of
/// the raw shared secret, matching WebCrypto's `ECDH -> AES-GCM 256`
/// derivation.
pub fn derive_shared_key(private: &PrivateKey, peer_public: &PublicKey) -> SymmetricKey {
    let shared = diffie_hellman(private.0.to_nonzero_scalar(), peer_public.0.as_affine());
    let raw = shared.raw_secret_bytes();
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    key.copy_from_slice(&raw[..SYMMETRIC_KEY_SIZE]);
    SymmetricKey(key)
}

/// Generate a fresh random group key.
///
/// Self-derivation from a throwaway keypair: the keypair is dropped on
/// return, leaving only the symmetric key.
pub fn generate_group_key() -> SymmetricKey {
    let throwaway = generate_keypair();
    derive_shared_key(&throwaway.private, &throwaway.public)
}

/// Encrypt with a fresh random 96-bit nonce. Returns the ciphertext
/// (authentication tag included) and the nonce used.
pub fn encrypt(
    key: &SymmetricKey,
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_SIZE]), CryptoError> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    let cipher = Aes256Gcm::new((&key.0).into());
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok((ciphertext, nonce_bytes))
}

/// Decrypt a ciphertext produced by [`encrypt`]. Fails (never panics)
/// on tag mismatch or malformed input.
pub fn decrypt(
    key: &SymmetricKey,
    ciphertext: &[u8],
    nonce: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::InvalidNonceLength {
            expected: NONCE_SIZE,
            got: nonce.len(),
        });
    }

    let cipher = Aes256Gcm::new((&key.0).into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Export a public key to its portable JWK form.
pub fn export_public_key(public: &PublicKey) -> PortablePublicKey {
    let point = public.0.to_encoded_point(false);
    // Uncompressed SEC1 points always carry both coordinates.
    let x = point.x().map(|b| URL_SAFE_NO_PAD.encode(b)).unwrap_or_default();
    let y = point.y().map(|b| URL_SAFE_NO_PAD.encode(b)).unwrap_or_default();

    PortablePublicKey {
        crv: JWK_CRV.to_string(),
        ext: true,
        key_ops: Vec::new(),
        kty: JWK_KTY.to_string(),
        x,
        y,
    }
}

/// Import a peer's public key from its portable JWK form.
pub fn import_public_key(portable: &PortablePublicKey) -> Result<PublicKey, CryptoError> {
    if portable.kty != JWK_KTY || portable.crv != JWK_CRV {
        return Err(CryptoError::InvalidKey(format!(
            "unsupported JWK parameters: kty={}, crv={}",
            portable.kty, portable.crv
        )));
    }

    let x = decode_coordinate(&portable.x)?;
    let y = decode_coordinate(&portable.y)?;

    let point = EncodedPoint::from_affine_coordinates(
        FieldBytes::from_slice(&x),
        FieldBytes::from_slice(&y),
        false,
    );

    Option::<p384::PublicKey>::from(p384::PublicKey::from_encoded_point(&point))
        .map(PublicKey)
        .ok_or_else(|| CryptoError::InvalidKey("point is not on the curve".to_string()))
}

fn decode_coordinate(encoded: &str) -> Result<[u8; FIELD_ELEMENT_SIZE], CryptoError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidKey(format!("bad coordinate encoding: {e}")))?;
    if bytes.len() != FIELD_ELEMENT_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "bad coordinate length: expected {FIELD_ELEMENT_SIZE}, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; FIELD_ELEMENT_SIZE];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Export a symmetric key as raw bytes, for transporting the group key
/// (encrypted) inside a GroupKey record.
pub fn export_symmetric_raw(key: &SymmetricKey) -> [u8; SYMMETRIC_KEY_SIZE] {
    key.0
}

/// Import a symmetric key from raw bytes.
pub fn import_symmetric_raw(raw: &[u8]) -> Result<SymmetricKey, CryptoError> {
    if raw.len() != SYMMETRIC_KEY_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "bad symmetric key length: expected {SYMMETRIC_KEY_SIZE}, got {}",
            raw.len()
        )));
    }
    let mut key = [0u8; SYMMETRIC_KEY_SIZE];
    key.copy_from_slice(raw);
    Ok(SymmetricKey(key))
}
