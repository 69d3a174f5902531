//! # Learning-Outcome Proofs
//!
//! The [`ZkProof`] value that travels from the binder to the verifier
//! adapter and onto the ledger, plus the small policy/purpose types that
//! are encoded in its public inputs.
//!
//! ## Public inputs (in order)
//!
//! | index | value |
//! |-------|-------|
//! | 0     | commitment to the session outcome |
//! | 1     | session id field element |
//! | 2     | student address field element |
//! | 3     | score |
//! | 4     | minimum score |
//! | 5     | maximum time spent (seconds) |
//! | 6     | maximum attempts |
//! | 7     | purpose (1 = module, 2 = achievement) |
//! | 8     | commitment blinding |
//!
//! ## Proof id
//!
//! `proof_id` is a domain-separated BLAKE3 over the compressed encoding of
//! `(a, b, c, public_inputs)`. It is the nullifier: once recorded, the same
//! proof can never mint anything again. Groth16 proofs are randomized, so
//! re-proving the same statement yields a new id.

use std::fmt;

use ark_bn254::{Bn254, Fr, G1Affine, G2Affine};
use ark_ff::{BigInteger, PrimeField};
use ark_serialize::CanonicalSerialize;
use serde::{Deserialize, Serialize};

use crate::crypto::hash::domain_separated_hash;

const PROOF_ID_CONTEXT: &str = "accredit proof id v1";

pub const PI_COMMITMENT: usize = 0;
pub const PI_SESSION: usize = 1;
pub const PI_STUDENT: usize = 2;
pub const PI_SCORE: usize = 3;
pub const PI_MIN_SCORE: usize = 4;
pub const PI_MAX_TIME: usize = 5;
pub const PI_MAX_ATTEMPTS: usize = 6;
pub const PI_PURPOSE: usize = 7;
pub const PI_BLINDING: usize = 8;
pub const PUBLIC_INPUT_COUNT: usize = 9;

// ---------------------------------------------------------------------------
// ProofId
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProofId([u8; 32]);

impl ProofId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ProofId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ProofId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProofId({}..)", &self.to_hex()[..12])
    }
}

// ---------------------------------------------------------------------------
// Purpose & policy
// ---------------------------------------------------------------------------

/// Which kind of credential a proof may mint. Committed inside the proof so
/// a module-completion proof cannot be replayed as an achievement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProofPurpose {
    Module,
    Achievement,
}

impl ProofPurpose {
    pub fn code(&self) -> u64 {
        match self {
            ProofPurpose::Module => 1,
            ProofPurpose::Achievement => 2,
        }
    }

    pub fn field_element(&self) -> Fr {
        Fr::from(self.code())
    }

    pub fn from_field(value: &Fr) -> Option<Self> {
        match fr_to_u32(value)? {
            1 => Some(ProofPurpose::Module),
            2 => Some(ProofPurpose::Achievement),
            _ => None,
        }
    }
}

/// Outcome thresholds a proof attests to. All three are public inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofPolicy {
    pub min_score: u32,
    pub max_time_seconds: u32,
    pub max_attempts: u32,
}

// ---------------------------------------------------------------------------
// ZkProof
// ---------------------------------------------------------------------------

/// A Groth16 proof over BN254 together with its public inputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkProof {
    #[serde(with = "ark_hex")]
    pub a: G1Affine,
    #[serde(with = "ark_hex")]
    pub b: G2Affine,
    #[serde(with = "ark_hex")]
    pub c: G1Affine,
    #[serde(with = "ark_hex")]
    pub public_inputs: Vec<Fr>,
    pub proof_id: ProofId,
}

impl ZkProof {
    pub fn new(a: G1Affine, b: G2Affine, c: G1Affine, public_inputs: Vec<Fr>) -> Self {
        let proof_id = Self::compute_id(&a, &b, &c, &public_inputs);
        Self {
            a,
            b,
            c,
            public_inputs,
            proof_id,
        }
    }

    pub fn compute_id(a: &G1Affine, b: &G2Affine, c: &G1Affine, public_inputs: &[Fr]) -> ProofId {
        let mut buf = Vec::with_capacity(64 + 128 + 64 + 32 * public_inputs.len());
        // Serializing into a Vec is infallible.
        let _ = a.serialize_compressed(&mut buf);
        let _ = b.serialize_compressed(&mut buf);
        let _ = c.serialize_compressed(&mut buf);
        for input in public_inputs {
            buf.extend_from_slice(&input.into_bigint().to_bytes_le());
        }
        ProofId(domain_separated_hash(PROOF_ID_CONTEXT, &buf))
    }

    /// Whether `proof_id` really is derived from the proof contents.
    pub fn has_consistent_id(&self) -> bool {
        Self::compute_id(&self.a, &self.b, &self.c, &self.public_inputs) == self.proof_id
    }

    pub fn to_ark_proof(&self) -> ark_groth16::Proof<Bn254> {
        ark_groth16::Proof {
            a: self.a,
            b: self.b,
            c: self.c,
        }
    }

    fn input(&self, index: usize) -> Option<&Fr> {
        if self.public_inputs.len() != PUBLIC_INPUT_COUNT {
            return None;
        }
        self.public_inputs.get(index)
    }

    pub fn commitment(&self) -> Option<Fr> {
        self.input(PI_COMMITMENT).copied()
    }

    pub fn session_input(&self) -> Option<Fr> {
        self.input(PI_SESSION).copied()
    }

    pub fn student_input(&self) -> Option<Fr> {
        self.input(PI_STUDENT).copied()
    }

    pub fn score(&self) -> Option<u32> {
        self.input(PI_SCORE).and_then(fr_to_u32)
    }

    pub fn policy(&self) -> Option<ProofPolicy> {
        Some(ProofPolicy {
            min_score: self.input(PI_MIN_SCORE).and_then(fr_to_u32)?,
            max_time_seconds: self.input(PI_MAX_TIME).and_then(fr_to_u32)?,
            max_attempts: self.input(PI_MAX_ATTEMPTS).and_then(fr_to_u32)?,
        })
    }

    pub fn purpose(&self) -> Option<ProofPurpose> {
        self.input(PI_PURPOSE).and_then(ProofPurpose::from_field)
    }

    pub fn blinding(&self) -> Option<Fr> {
        self.input(PI_BLINDING).copied()
    }
}

/// Interpret a field element as a `u32`, if it is one.
pub fn fr_to_u32(value: &Fr) -> Option<u32> {
    let limbs = value.into_bigint().0;
    if limbs[1..].iter().any(|l| *l != 0) {
        return None;
    }
    u32::try_from(limbs[0]).ok()
}

/// Serde adapter: arkworks types as hex of their compressed encoding.
mod ark_hex {
    use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
    use serde::{de, ser, Deserialize, Deserializer, Serializer};

    pub fn serialize<T: CanonicalSerialize, S: Serializer>(
        value: &T,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut buf = Vec::new();
        value
            .serialize_compressed(&mut buf)
            .map_err(ser::Error::custom)?;
        serializer.serialize_str(&hex::encode(buf))
    }

    pub fn deserialize<'de, T: CanonicalDeserialize, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<T, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(de::Error::custom)?;
        T::deserialize_compressed(&bytes[..]).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ec::AffineRepr;

    fn dummy(inputs: Vec<Fr>) -> ZkProof {
        ZkProof::new(
            G1Affine::generator(),
            G2Affine::generator(),
            G1Affine::generator(),
            inputs,
        )
    }

    fn inputs() -> Vec<Fr> {
        vec![
            Fr::from(123u64),
            Fr::from(456u64),
            Fr::from(789u64),
            Fr::from(85u64),
            Fr::from(80u64),
            Fr::from(3600u64),
            Fr::from(10u64),
            ProofPurpose::Module.field_element(),
            Fr::from(321u64),
        ]
    }

    #[test]
    fn test_accessors_follow_input_layout() {
        let proof = dummy(inputs());
        assert_eq!(proof.commitment(), Some(Fr::from(123u64)));
        assert_eq!(proof.session_input(), Some(Fr::from(456u64)));
        assert_eq!(proof.student_input(), Some(Fr::from(789u64)));
        assert_eq!(proof.score(), Some(85));
        assert_eq!(
            proof.policy(),
            Some(ProofPolicy {
                min_score: 80,
                max_time_seconds: 3600,
                max_attempts: 10
            })
        );
        assert_eq!(proof.purpose(), Some(ProofPurpose::Module));
        assert_eq!(proof.blinding(), Some(Fr::from(321u64)));
    }

    #[test]
    fn test_wrong_input_count_yields_nothing() {
        let proof = dummy(inputs()[..5].to_vec());
        assert_eq!(proof.commitment(), None);
        assert_eq!(proof.policy(), None);
    }

    #[test]
    fn test_proof_id_binds_public_inputs() {
        let a = dummy(inputs());
        let mut changed = inputs();
        changed[PI_SCORE] = Fr::from(86u64);
        let b = dummy(changed);
        assert_ne!(a.proof_id, b.proof_id);
        assert!(a.has_consistent_id());
    }

    #[test]
    fn test_tampered_id_detected() {
        let mut proof = dummy(inputs());
        proof.proof_id = ProofId::from_bytes([0u8; 32]);
        assert!(!proof.has_consistent_id());
    }

    #[test]
    fn test_fr_to_u32_bounds() {
        assert_eq!(fr_to_u32(&Fr::from(u32::MAX as u64)), Some(u32::MAX));
        assert_eq!(fr_to_u32(&Fr::from(u32::MAX as u64 + 1)), None);
        assert_eq!(fr_to_u32(&(-Fr::from(1u64))), None);
    }

    #[test]
    fn test_purpose_codes() {
        assert_eq!(ProofPurpose::from_field(&Fr::from(2u64)), Some(ProofPurpose::Achievement));
        assert_eq!(ProofPurpose::from_field(&Fr::from(3u64)), None);
    }

    #[test]
    fn test_json_roundtrip_preserves_id() {
        let proof = dummy(inputs());
        let json = serde_json::to_string(&proof).unwrap();
        let back: ZkProof = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proof);
        assert!(back.has_consistent_id());
    }
}
