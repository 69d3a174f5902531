//! # Groth16 Proof Verification
//!
//! [`LearningProofVerifier`] holds the verification key for the
//! learning-outcome circuit. It is the pairing check the ledger's verifier
//! contract runs, and is small enough to ship to every party.
//!
//! Verification is three pairings plus a multi-scalar multiplication over
//! the nine public inputs, so its cost does not depend on circuit size.

use anyhow::{Context, Result};
use ark_bn254::Bn254;
use ark_groth16::{Groth16, VerifyingKey};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_snark::SNARK;

use super::proof::{ZkProof, PUBLIC_INPUT_COUNT};

#[derive(Clone)]
pub struct LearningProofVerifier {
    vk: VerifyingKey<Bn254>,
}

impl LearningProofVerifier {
    pub(crate) fn from_vk(vk: VerifyingKey<Bn254>) -> Self {
        Self { vk }
    }

    /// `Ok(true)` if the pairing check passes, `Ok(false)` if it does not or
    /// the public input vector has the wrong shape, `Err` if the
    /// verification algorithm itself fails.
    pub fn verify(&self, proof: &ZkProof) -> Result<bool> {
        if proof.public_inputs.len() != PUBLIC_INPUT_COUNT {
            return Ok(false);
        }
        let valid = Groth16::<Bn254>::verify(&self.vk, &proof.public_inputs, &proof.to_ark_proof())
            .context("Groth16 verification algorithm failed")?;
        Ok(valid)
    }

    pub fn vk_to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.vk
            .serialize_compressed(&mut buf)
            .context("verification key serialization failed")?;
        Ok(buf)
    }

    pub fn vk_from_bytes(data: &[u8]) -> Result<Self> {
        let vk = VerifyingKey::<Bn254>::deserialize_compressed(data)
            .context("failed to deserialize verification key")?;
        Ok(Self { vk })
    }
}

impl std::fmt::Debug for LearningProofVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LearningProofVerifier")
            .field("public_inputs", &(self.vk.gamma_abc_g1.len().saturating_sub(1)))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zkp::circuit::CircuitInputs;
    use crate::zkp::commitment::{CommitmentOpening, CommitmentParams};
    use crate::zkp::proof::{ProofPolicy, ProofPurpose, PI_SCORE, PI_SESSION};
    use crate::zkp::prover::{CircuitArtifact, Groth16Artifact};
    use ark_bn254::Fr;
    use ark_std::rand::{rngs::StdRng, SeedableRng};

    fn prove(artifact: &Groth16Artifact) -> ZkProof {
        let inputs = CircuitInputs {
            opening: CommitmentOpening {
                score: 85,
                time_spent_seconds: 3500,
                attempts: 3,
                student: Fr::from(21u64),
                session: Fr::from(34u64),
                purpose: ProofPurpose::Module,
                blinding: Fr::from(55u64),
            },
            policy: ProofPolicy {
                min_score: 80,
                max_time_seconds: 3600,
                max_attempts: 10,
            },
        };
        let raw = artifact.generate_witness_and_proof(&inputs).unwrap();
        ZkProof::new(raw.a, raw.b, raw.c, raw.public_inputs)
    }

    #[test]
    fn verify_valid_proof() {
        let mut rng = StdRng::seed_from_u64(42);
        let (artifact, verifier) = Groth16Artifact::setup(CommitmentParams::standard(), &mut rng).unwrap();
        assert!(verifier.verify(&prove(&artifact)).unwrap());
    }

    #[test]
    fn verify_rejects_altered_public_score() {
        let mut rng = StdRng::seed_from_u64(42);
        let (artifact, verifier) = Groth16Artifact::setup(CommitmentParams::standard(), &mut rng).unwrap();
        let mut proof = prove(&artifact);
        proof.public_inputs[PI_SCORE] = Fr::from(99u64);
        assert!(!verifier.verify(&proof).unwrap());
    }

    #[test]
    fn verify_rejects_other_session() {
        let mut rng = StdRng::seed_from_u64(42);
        let (artifact, verifier) = Groth16Artifact::setup(CommitmentParams::standard(), &mut rng).unwrap();
        let mut proof = prove(&artifact);
        proof.public_inputs[PI_SESSION] = Fr::from(35u64);
        assert!(!verifier.verify(&proof).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_input_count() {
        let mut rng = StdRng::seed_from_u64(42);
        let (artifact, verifier) = Groth16Artifact::setup(CommitmentParams::standard(), &mut rng).unwrap();
        let mut proof = prove(&artifact);
        proof.public_inputs.pop();
        assert!(!verifier.verify(&proof).unwrap());
    }

    #[test]
    fn verify_rejects_proof_from_other_setup() {
        let mut rng = StdRng::seed_from_u64(42);
        let (artifact, _) = Groth16Artifact::setup(CommitmentParams::standard(), &mut rng).unwrap();
        let mut other_rng = StdRng::seed_from_u64(7);
        let (_, other_verifier) = Groth16Artifact::setup(CommitmentParams::standard(), &mut other_rng).unwrap();
        assert!(!other_verifier.verify(&prove(&artifact)).unwrap());
    }

    #[test]
    fn vk_serialization_round_trip() {
        let mut rng = StdRng::seed_from_u64(42);
        let (artifact, verifier) = Groth16Artifact::setup(CommitmentParams::standard(), &mut rng).unwrap();
        let bytes = verifier.vk_to_bytes().unwrap();
        let restored = LearningProofVerifier::vk_from_bytes(&bytes).unwrap();
        assert!(restored.verify(&prove(&artifact)).unwrap());
    }
}
