//! # Cryptographic Primitives
//!
//! Hashing and Ed25519 signing, as thin typed wrappers over audited crates.
//! The zero-knowledge side lives in [`crate::zkp`].

pub mod hash;
pub mod keys;

pub use hash::{
    blake3_hash, domain_separated_field, domain_separated_hash, double_sha256, hash_to_field,
    sha256, Hash32,
};
pub use keys::{KeyError, Keypair, PublicKey, Signature};
