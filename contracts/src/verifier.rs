//! # Learning Proof Verifier Contract
//!
//! The ledger-resident pairing check. Pure: no state, no events. Anything
//! that is not a valid proof for the deployed verification key, including
//! proofs with the wrong number of public inputs, is simply `false`.

use accredit_protocol::zkp::{LearningProofVerifier, ZkProof};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct VerifierContract {
    verifier: LearningProofVerifier,
}

impl VerifierContract {
    pub fn new(verifier: LearningProofVerifier) -> Self {
        Self { verifier }
    }

    /// Deploy from a serialized verification key.
    pub fn from_vk_bytes(data: &[u8]) -> anyhow::Result<Self> {
        Ok(Self::new(LearningProofVerifier::vk_from_bytes(data)?))
    }

    pub fn verify_proof(&self, proof: &ZkProof) -> bool {
        match self.verifier.verify(proof) {
            Ok(valid) => valid,
            Err(e) => {
                debug!(proof_id = %proof.proof_id, error = %e, "pairing check errored");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accredit_protocol::zkp::{CommitmentParams, Groth16Artifact};
    use ark_bn254::{Fr, G1Affine, G2Affine};
    use ark_std::rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn garbage_is_false_not_error() {
        let mut rng = StdRng::seed_from_u64(42);
        let (artifact, _) = Groth16Artifact::setup(CommitmentParams::standard(), &mut rng).unwrap();
        let bytes = artifact.verifier().vk_to_bytes().unwrap();
        let contract = VerifierContract::from_vk_bytes(&bytes).unwrap();

        let proof = ZkProof::new(
            G1Affine::identity(),
            G2Affine::identity(),
            G1Affine::identity(),
            vec![Fr::from(1u64); 3],
        );
        assert!(!contract.verify_proof(&proof));
    }
}
