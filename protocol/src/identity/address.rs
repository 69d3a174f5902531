//! # Addresses
//!
//! An accredit address identifies a student, validator, platform signer or
//! contract. It is the BLAKE3 hash of an Ed25519 public key, Bech32-encoded
//! under the `edu` prefix:
//!
//! ```text
//! public_key (32 bytes)
//!     -> BLAKE3(public_key) -> 32 bytes
//!     -> Bech32("edu", hash) -> edu1qw508d6qe...
//! ```
//!
//! Contracts have no key. Their address is a domain-separated hash of a
//! label (see [`Address::for_contract`]).
//!
//! Inside the circuit a student is represented by [`Address::field_element`],
//! which is what binds a proof to exactly one student.

use std::fmt;
use std::str::FromStr;

use ark_bn254::Fr;
use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ADDRESS_HRP;
use crate::crypto::hash::{blake3_hash, domain_separated_field, domain_separated_hash};
use crate::crypto::keys::PublicKey;

const ADDRESS_FIELD_CONTEXT: &str = "accredit address field element v1";
const CONTRACT_ADDRESS_CONTEXT: &str = "accredit contract address v1";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("bech32 decode error: {0}")]
    Bech32Decode(String),

    #[error("invalid HRP: expected '{expected}', got '{got}'")]
    InvalidHrp { expected: String, got: String },

    #[error("invalid address data length: expected 32 bytes, got {0}")]
    InvalidDataLength(usize),
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 32-byte account identifier.
///
/// ```
/// use accredit_protocol::crypto::Keypair;
/// use accredit_protocol::identity::Address;
///
/// let kp = Keypair::generate();
/// let addr = Address::from_public_key(&kp.public_key());
/// assert!(addr.to_string().starts_with("edu1"));
/// assert_eq!(addr, addr.to_string().parse().unwrap());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    key_hash: [u8; 32],
}

impl Address {
    pub fn from_public_key(pk: &PublicKey) -> Self {
        Self {
            key_hash: blake3_hash(pk.as_bytes()),
        }
    }

    /// Deterministic address for a keyless contract.
    pub fn for_contract(label: &str) -> Self {
        Self {
            key_hash: domain_separated_hash(CONTRACT_ADDRESS_CONTEXT, label.as_bytes()),
        }
    }

    pub fn from_key_hash(key_hash: [u8; 32]) -> Self {
        Self { key_hash }
    }

    pub fn key_hash(&self) -> &[u8; 32] {
        &self.key_hash
    }

    /// Whether `pk` is the key behind this address.
    pub fn matches(&self, pk: &PublicKey) -> bool {
        blake3_hash(pk.as_bytes()) == self.key_hash
    }

    /// The address as a BN254 scalar, used as a circuit public input.
    pub fn field_element(&self) -> Fr {
        domain_separated_field(ADDRESS_FIELD_CONTEXT, &self.key_hash)
    }

    fn hrp() -> Hrp {
        Hrp::parse_unchecked(ADDRESS_HRP)
    }

    /// Parse a Bech32 address, checking prefix, checksum and length.
    pub fn from_bech32(s: &str) -> Result<Self, AddressError> {
        let (hrp, data) = bech32::decode(s).map_err(|e| AddressError::Bech32Decode(e.to_string()))?;
        if hrp != Self::hrp() {
            return Err(AddressError::InvalidHrp {
                expected: ADDRESS_HRP.to_string(),
                got: hrp.to_string(),
            });
        }
        let key_hash: [u8; 32] = data
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::InvalidDataLength(data.len()))?;
        Ok(Self { key_hash })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = bech32::encode::<Bech32>(Self::hrp(), &self.key_hash).map_err(|_| fmt::Error)?;
        f.write_str(&encoded)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bech32(s)
    }
}

impl Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            self.key_hash.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Address::from_bech32(&s).map_err(serde::de::Error::custom)
        } else {
            let key_hash = <[u8; 32]>::deserialize(deserializer)?;
            Ok(Address { key_hash })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;

    #[test]
    fn address_roundtrips_through_bech32() {
        let kp = Keypair::generate();
        let addr = Address::from_public_key(&kp.public_key());
        let encoded = addr.to_string();
        assert!(encoded.starts_with("edu1"));
        assert_eq!(Address::from_bech32(&encoded).unwrap(), addr);
    }

    #[test]
    fn test_wrong_hrp_rejected() {
        let other = bech32::encode::<Bech32>(Hrp::parse_unchecked("learn"), &[1u8; 32]).unwrap();
        assert!(matches!(
            Address::from_bech32(&other),
            Err(AddressError::InvalidHrp { .. })
        ));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let short = bech32::encode::<Bech32>(Hrp::parse_unchecked("edu"), &[1u8; 20]).unwrap();
        assert!(matches!(
            Address::from_bech32(&short),
            Err(AddressError::InvalidDataLength(20))
        ));
    }

    #[test]
    fn test_corrupted_checksum_rejected() {
        let addr = Address::from_public_key(&Keypair::generate().public_key()).to_string();
        let mut chars: Vec<char> = addr.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'q' { 'p' } else { 'q' };
        let corrupted: String = chars.into_iter().collect();
        assert!(Address::from_bech32(&corrupted).is_err());
    }

    #[test]
    fn test_matches_public_key() {
        let kp = Keypair::generate();
        let other = Keypair::generate();
        let addr = Address::from_public_key(&kp.public_key());
        assert!(addr.matches(&kp.public_key()));
        assert!(!addr.matches(&other.public_key()));
    }

    #[test]
    fn test_field_element_is_per_address() {
        let a = Address::from_key_hash([1u8; 32]);
        let b = Address::from_key_hash([2u8; 32]);
        assert_eq!(a.field_element(), a.field_element());
        assert_ne!(a.field_element(), b.field_element());
    }

    #[test]
    fn test_serde_human_readable_and_binary() {
        let addr = Address::for_contract("credential-registry");
        let json = serde_json::to_string(&addr).unwrap();
        assert!(json.contains("edu1"));
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), addr);

        let bytes = bincode::serialize(&addr).unwrap();
        assert_eq!(bincode::deserialize::<Address>(&bytes).unwrap(), addr);
    }
}
