//! # Hashing Utilities
//!
//! Two hash functions and nothing more:
//!
//! - **BLAKE3** for everything accredit-native: session ids, proof ids,
//!   commitment generators, authorization digests.
//! - **SHA-256**, only as `double_sha256` for ledger transaction ids, where
//!   the ledger expects that construction.
//!
//! ## hash_to_field
//!
//! Maps arbitrary bytes to a BN254 scalar by hashing with BLAKE3 and
//! reducing modulo the field order. The 256-bit digest against a ~254-bit
//! modulus keeps the bias negligible.

use ark_bn254::Fr;
use ark_ff::PrimeField;
use sha2::{Digest, Sha256};

/// A 32-byte digest.
pub type Hash32 = [u8; 32];

/// SHA-256 of the input, as a fixed-size array.
pub fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// `SHA-256(SHA-256(data))`. Used for ledger transaction ids.
pub fn double_sha256(data: &[u8]) -> Hash32 {
    sha256(&sha256(data))
}

/// BLAKE3 of the input.
///
/// ```
/// use accredit_protocol::crypto::blake3_hash;
///
/// let hash = blake3_hash(b"python_basics_003");
/// assert_eq!(hash.len(), 32);
/// ```
pub fn blake3_hash(data: &[u8]) -> Hash32 {
    *blake3::hash(data).as_bytes()
}

/// Hash several slices as if they were concatenated, without the buffer.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> Hash32 {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Domain-separated BLAKE3 using `derive_key` mode.
///
/// Two different contexts never collide, even on identical data. Every
/// identifier in the protocol is derived through one of these so a session
/// id can never be confused with a proof id.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> Hash32 {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Multi-part variant of [`domain_separated_hash`].
///
/// Variable-length parts should be length-prefixed by the caller so that
/// `("ab", "c")` and `("a", "bc")` hash differently.
pub fn domain_separated_hash_multi(context: &str, parts: &[&[u8]]) -> Hash32 {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// Hash arbitrary data to a BN254 scalar field element.
///
/// ```
/// use accredit_protocol::crypto::hash_to_field;
///
/// let a = hash_to_field(b"session");
/// assert_eq!(a, hash_to_field(b"session"));
/// ```
pub fn hash_to_field(data: &[u8]) -> Fr {
    Fr::from_le_bytes_mod_order(&blake3_hash(data))
}

/// Domain-separated [`hash_to_field`].
pub fn domain_separated_field(context: &str, data: &[u8]) -> Fr {
    Fr::from_le_bytes_mod_order(&domain_separated_hash(context, data))
}

/// Little-endian length prefix for a variable-length field.
pub fn length_prefixed(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + data.len());
    out.extend_from_slice(&(data.len() as u64).to_le_bytes());
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let hash = sha256(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash.as_slice(), expected.as_slice());
    }

    #[test]
    fn double_sha256_is_sha256_of_sha256() {
        let single = sha256(b"accredit");
        assert_eq!(double_sha256(b"accredit"), sha256(&single));
        assert_ne!(double_sha256(b"accredit"), single);
    }

    #[test]
    fn test_blake3_hash_multi_matches_concatenation() {
        let multi = blake3_hash_multi(&[b"hello", b" world"]);
        assert_eq!(multi, blake3_hash(b"hello world"));
    }

    #[test]
    fn test_domain_separation() {
        let data = b"same data";
        assert_ne!(
            domain_separated_hash("accredit session id v1", data),
            domain_separated_hash("accredit proof id v1", data)
        );
        assert_ne!(domain_separated_hash("ctx", data), blake3_hash(data));
    }

    #[test]
    fn test_domain_separated_multi_matches_single() {
        let joined = domain_separated_hash("ctx", b"abcdef");
        let parts = domain_separated_hash_multi("ctx", &[b"abc", b"def"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn test_length_prefix_disambiguates() {
        let a = [length_prefixed(b"ab"), length_prefixed(b"c")].concat();
        let b = [length_prefixed(b"a"), length_prefixed(b"bc")].concat();
        assert_ne!(blake3_hash(&a), blake3_hash(&b));
    }

    #[test]
    fn test_hash_to_field() {
        assert_eq!(hash_to_field(b"x"), hash_to_field(b"x"));
        assert_ne!(hash_to_field(b"x"), hash_to_field(b"y"));
        assert_ne!(
            domain_separated_field("a", b"x"),
            domain_separated_field("b", b"x")
        );
    }
}
