//! # Key Management
//!
//! Ed25519 keys for every signing party in the pipeline: students signing
//! self-service challenges, validators approving sessions, and the platform
//! signer that submits ledger transactions.
//!
//! ## Security considerations
//!
//! - Secret keys are zeroized on drop by ed25519-dalek.
//! - Fresh keys come from `OsRng`.
//! - Key bytes are never logged. `Debug` only ever shows the public half.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid signature bytes: expected 64 bytes")]
    InvalidSignature,
}

/// An Ed25519 signing keypair.
///
/// Deliberately not `Serialize`. Exporting a secret is an explicit call to
/// [`secret_key_bytes`](Self::secret_key_bytes), never a side effect of
/// putting a struct into JSON.
///
/// ```
/// use accredit_protocol::crypto::Keypair;
///
/// let kp = Keypair::generate();
/// let sig = kp.sign(b"approve session");
/// assert!(kp.public_key().verify(b"approve session", &sig));
/// ```
pub struct Keypair {
    signing_key: SigningKey,
}

/// The public half of a [`Keypair`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: [u8; 32],
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    bytes: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Keypair
// ---------------------------------------------------------------------------

impl Keypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Tests and devnet fixtures only.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load a keypair from a hex-encoded secret key, as written by `accredit-node init`.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Sign a message. Deterministic per (key, message).
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }

    /// Raw secret key material. Handle with care.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl Clone for Keypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypair(pub={})", self.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

impl PublicKey {
    /// Parse a public key, rejecting bytes that are not a valid curve point.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Verify a signature. Any malformed input is simply `false`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Some(sig) = signature.to_dalek() else {
            return false;
        };
        verifying_key.verify(message, &sig).is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::try_from_slice(&bytes)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

impl Signature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn to_dalek(&self) -> Option<DalekSignature> {
        let arr: [u8; 64] = self.bytes.as_slice().try_into().ok()?;
        Some(DalekSignature::from_bytes(&arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s).map_err(|_| KeyError::InvalidSignature)?;
        if bytes.len() != 64 {
            return Err(KeyError::InvalidSignature);
        }
        Ok(Self { bytes })
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex_str = self.to_hex();
        match hex_str.get(..8) {
            Some(head) => write!(f, "Signature({head}..)"),
            None => write!(f, "Signature({hex_str})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let kp = Keypair::generate();
        let sig = kp.sign(b"approve");
        assert!(kp.public_key().verify(b"approve", &sig));
        assert!(!kp.public_key().verify(b"reject", &sig));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let kp1 = Keypair::generate();
        let kp2 = Keypair::generate();
        let sig = kp1.sign(b"message");
        assert!(!kp2.public_key().verify(b"message", &sig));
    }

    #[test]
    fn deterministic_from_seed() {
        let kp1 = Keypair::from_seed(&[7u8; 32]);
        let kp2 = Keypair::from_seed(&[7u8; 32]);
        assert_eq!(kp1.public_key(), kp2.public_key());
        assert_eq!(kp1.sign(b"m").as_bytes(), kp2.sign(b"m").as_bytes());
    }

    #[test]
    fn test_hex_roundtrips() {
        let kp = Keypair::generate();
        let restored = Keypair::from_hex(&hex::encode(kp.secret_key_bytes())).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());

        let pk = PublicKey::from_hex(&kp.public_key().to_hex()).unwrap();
        assert_eq!(pk, kp.public_key());

        let sig = kp.sign(b"x");
        assert_eq!(Signature::from_hex(&sig.to_hex()).unwrap(), sig);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(Keypair::from_hex("deadbeef").is_err());
        assert!(PublicKey::try_from_slice(&[0u8; 16]).is_err());
        assert!(Signature::from_hex("abcd").is_err());
    }

    #[test]
    fn truncated_signature_fails_closed() {
        let kp = Keypair::generate();
        let sig = Signature { bytes: vec![0u8; 10] };
        assert!(!kp.public_key().verify(b"m", &sig));
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = Keypair::from_seed(&[9u8; 32]);
        let debug_str = format!("{:?}", kp);
        assert!(debug_str.starts_with("Keypair(pub="));
        assert!(!debug_str.contains(&hex::encode(kp.secret_key_bytes())));
    }
}
