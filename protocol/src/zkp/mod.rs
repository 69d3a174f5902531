//! # Zero-Knowledge Outcome Proofs
//!
//! Groth16 over BN254. The statement: "the outcome committed to in this
//! proof belongs to this session and this student, and its score, time
//! spent and attempt count meet these public thresholds".
//!
//! ## Architecture
//!
//! ```text
//! commitment.rs: scalar commitment to the session outcome
//! circuit.rs   : R1CS circuit (LearningOutcomeCircuit)
//! prover.rs    : CircuitArtifact trait, Groth16Artifact (proving key)
//! verifier.rs  : LearningProofVerifier (verification key)
//! proof.rs     : ZkProof, ProofId, public input layout
//! binder.rs    : ProofBinder: session + metrics -> proof, on a worker pool
//! ```
//!
//! ## Security model
//!
//! - **Binding to a session**: the session id and student address field
//!   elements are both public inputs and committed terms, so a proof for
//!   session A cannot be presented against session B even with identical
//!   metrics.
//! - **Soundness**: Groth16 knowledge soundness in the generic group model.
//! - **Policy**: 32-bit range checks on every threshold difference. There
//!   is no service-side shortcut around them.
//!
//! The setup here is circuit-specific and local. A deployment loads a
//! ceremony proving key via `Groth16Artifact::from_proving_key_bytes`.

pub mod binder;
pub mod circuit;
pub mod commitment;
pub mod proof;
pub mod prover;
pub mod verifier;

pub use binder::{PrivateMetrics, ProofBinder};
pub use circuit::{CircuitInputs, LearningOutcomeCircuit};
pub use commitment::{session_blinding, CommitmentOpening, CommitmentParams};
pub use proof::{fr_to_u32, ProofId, ProofPolicy, ProofPurpose, ZkProof, PUBLIC_INPUT_COUNT};
pub use prover::{ArtifactError, CircuitArtifact, Groth16Artifact, RawProof};
pub use verifier::LearningProofVerifier;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Address;
    use crate::session::LearningSession;
    use ark_std::rand::{rngs::StdRng, SeedableRng};
    use chrono::Utc;
    use std::sync::Arc;

    /// End-to-end: setup -> bind -> verify, then replay against a twin session.
    #[tokio::test]
    async fn end_to_end_outcome_proof() {
        let mut rng = StdRng::seed_from_u64(42);
        let (artifact, verifier) = Groth16Artifact::setup(CommitmentParams::standard(), &mut rng).unwrap();
        let binder = ProofBinder::new(Arc::new(artifact), 1);

        let student = Address::from_key_hash([1u8; 32]);
        let mut session = LearningSession::new(student, "python_basics_003", [2u8; 32], 85, 3500, 3, 1, Utc::now());
        session.verified = true;
        let policy = ProofPolicy {
            min_score: 80,
            max_time_seconds: 3600,
            max_attempts: 10,
        };

        let proof = binder
            .bind_and_prove(&session, PrivateMetrics::of_session(&session), policy, ProofPurpose::Module)
            .await
            .unwrap();
        assert!(verifier.verify(&proof).unwrap());
        assert!(proof.has_consistent_id());

        // Same student, same metrics, different data: a different session.
        let twin = LearningSession::new(student, "python_basics_003", [3u8; 32], 85, 3500, 3, 1, Utc::now());
        let params = binder.params();
        assert_ne!(
            proof.commitment(),
            Some(params.session_commitment(&twin, ProofPurpose::Module))
        );
        assert_ne!(proof.session_input(), Some(twin.session_id.field_element()));
    }
}
