//! Channel crypto for the PTT transport.
//!
//! Signatures: Ed25519 over the plaintext frame, strict verification.
//! Encryption: XChaCha20-Poly1305 with a symmetric key derived per channel
//! via HKDF-SHA256 (salt = network secret, ikm = channel id bytes).
//! Sealed layout: `[24B nonce][ciphertext + 16B tag]`.
use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::{ChannelId, Identity, PeerIdentity, TransportError};

/// HKDF info string for domain separation.
const HKDF_INFO: &[u8] = b"wave-ptt-channel-key-v1";

/// XChaCha20 extended nonce length.
pub const NONCE_LEN: usize = 24;

/// Poly1305 authentication tag length.
pub const TAG_LEN: usize = 16;

/// Ed25519 signature length.
pub const SIGNATURE_LEN: usize = 64;

/// Symmetric key for one channel.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelKey([u8; 32]);

impl ChannelKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChannelKey(..)")
    }
}

/// Crypto operations the transport (and the discovery beacon) depend on.
///
/// In production: [`MeshCrypto`]. Swappable so hardware-backed keys or
/// test doubles can be plugged in.
pub trait CryptoProvider: Send + Sync + 'static {
    /// Sign `message` with the local identity.
    fn sign(&self, identity: &Identity, message: &[u8]) -> [u8; SIGNATURE_LEN];

    /// Verify `signature` over `message` against `signer`.
    fn verify(
        &self,
        signer: &PeerIdentity,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), TransportError>;

    /// Derive the symmetric key for a channel.
    fn derive_channel_key(&self, channel: &ChannelId) -> ChannelKey;

    /// Encrypt with a channel key. Output is `[nonce][ciphertext]`.
    fn encrypt(&self, key: &ChannelKey, plaintext: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Decrypt `[nonce][ciphertext]` with a channel key.
    fn decrypt(&self, key: &ChannelKey, sealed: &[u8]) -> Result<Vec<u8>, TransportError>;
}

/// Default provider: ed25519-dalek + XChaCha20-Poly1305 + HKDF-SHA256.
#[derive(Debug, Clone, Default)]
pub struct MeshCrypto {
    network_secret: Vec<u8>,
}

impl MeshCrypto {
    /// Provider without a network secret (keys depend on the channel id only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider that mixes a shared network secret into every channel key.
    pub fn with_network_secret(secret: impl AsRef<[u8]>) -> Self {
        Self {
            network_secret: secret.as_ref().to_vec(),
        }
    }
}

impl CryptoProvider for MeshCrypto {
    fn sign(&self, identity: &Identity, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        identity.sign(message)
    }

    fn verify(
        &self,
        signer: &PeerIdentity,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), TransportError> {
        let sig_bytes: [u8; SIGNATURE_LEN] = signature
            .try_into()
            .map_err(|_| TransportError::InvalidSignature)?;
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(signer.as_bytes())
            .map_err(|_| TransportError::InvalidSignature)?;
        let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        verifying_key
            .verify_strict(message, &signature)
            .map_err(|_| TransportError::InvalidSignature)
    }

    fn derive_channel_key(&self, channel: &ChannelId) -> ChannelKey {
        let salt = if self.network_secret.is_empty() {
            None
        } else {
            Some(self.network_secret.as_slice())
        };
        let hkdf = Hkdf::<Sha256>::new(salt, channel.as_bytes());
        let mut key = [0u8; 32];
        hkdf.expand(HKDF_INFO, &mut key)
            .expect("HKDF-SHA256 expand to 32 bytes always succeeds");
        ChannelKey(key)
    }

    fn encrypt(&self, key: &ChannelKey, plaintext: &[u8]) -> Result<Vec<u8>, TransportError> {
        use chacha20poly1305::aead::rand_core::{OsRng, RngCore};

        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

        // Random 24-byte nonce (safe for random generation with XChaCha20)
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from(nonce_bytes);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| TransportError::Crypto(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, key: &ChannelKey, sealed: &[u8]) -> Result<Vec<u8>, TransportError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(TransportError::MalformedFrame {
                reason: "sealed datagram shorter than nonce + tag",
            });
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
        let nonce = XNonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| TransportError::Crypto("decryption failed: authentication error".into()))
    }
}
