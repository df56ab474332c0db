use std::fmt;

use ed25519_dalek::{Signer, SigningKey};

use crate::{PeerIdentity, TransportError};

/// Local keypair: Ed25519 signing key plus the public [`PeerIdentity`].
///
/// Stable for the session. The 32-byte seed is the only secret and is
/// what gets persisted.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    public: PeerIdentity,
}

impl Identity {
    /// Generate a fresh identity from OS randomness.
    pub fn generate() -> Self {
        use chacha20poly1305::aead::rand_core::{OsRng, RngCore};
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    /// Rebuild an identity from its 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let public = PeerIdentity::from_bytes(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            public,
        }
    }

    /// Parse a hex-encoded seed (as written by `wave-node keygen`).
    pub fn from_hex_seed(hex_seed: &str) -> Result<Self, TransportError> {
        let bytes = hex::decode(hex_seed.trim())
            .map_err(|e| TransportError::Config(format!("identity seed is not hex: {e}")))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TransportError::Config("identity seed must be 32 bytes".into()))?;
        Ok(Self::from_seed(&seed))
    }

    /// The 32-byte secret seed.
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Hex-encoded seed.
    pub fn to_hex_seed(&self) -> String {
        hex::encode(self.seed())
    }

    /// Public identity.
    pub fn public(&self) -> PeerIdentity {
        self.public
    }

    /// Ed25519 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}
