//! # Proof Binder
//!
//! Turns a verified [`LearningSession`] plus the student's private metrics
//! into a [`ZkProof`] whose public inputs pin it to that session, that
//! student and one credential purpose.
//!
//! Proving is CPU-bound. Jobs run on tokio's blocking pool behind a
//! semaphore sized to the configured worker count, so a burst of mint
//! requests queues for a permit instead of starving the async runtime that
//! drives ledger submissions.
//!
//! Policy thresholds are never checked here. An out-of-policy witness has
//! no satisfying assignment, and the artifact reports that as
//! [`ArtifactError::Unsatisfied`], which surfaces as
//! [`ProtocolError::ConstraintViolation`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::circuit::CircuitInputs;
use super::commitment::{session_blinding, CommitmentOpening, CommitmentParams};
use super::proof::{ProofPolicy, ProofPurpose, ZkProof};
use super::prover::{ArtifactError, CircuitArtifact};
use crate::error::{ProtocolError, ProtocolResult};
use crate::session::LearningSession;

/// The outcome values only the student (and the validators who approved
/// the session) know in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateMetrics {
    pub score: u32,
    pub time_spent_seconds: u32,
    pub attempts: u32,
}

impl PrivateMetrics {
    pub fn of_session(session: &LearningSession) -> Self {
        Self {
            score: session.score,
            time_spent_seconds: session.time_spent_seconds,
            attempts: session.attempts,
        }
    }
}

pub struct ProofBinder {
    artifact: Arc<dyn CircuitArtifact>,
    workers: Arc<Semaphore>,
}

impl ProofBinder {
    /// `workers` is clamped to at least one.
    pub fn new(artifact: Arc<dyn CircuitArtifact>, workers: usize) -> Self {
        Self {
            artifact,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub fn params(&self) -> &CommitmentParams {
        self.artifact.params()
    }

    /// Proving slots not currently in use.
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Prove that `metrics` satisfy `policy` for `session`.
    ///
    /// Fails with `InsufficientApprovals` for an unverified session and with
    /// `ConstraintViolation` when the metrics differ from the session record
    /// or the circuit has no satisfying witness.
    pub async fn bind_and_prove(
        &self,
        session: &LearningSession,
        metrics: PrivateMetrics,
        policy: ProofPolicy,
        purpose: ProofPurpose,
    ) -> ProtocolResult<ZkProof> {
        if !session.verified {
            return Err(ProtocolError::InsufficientApprovals {
                session_id: session.session_id,
                approvals: session.approval_count(),
                required: session.required_approvals,
            });
        }
        if metrics != PrivateMetrics::of_session(session) {
            return Err(ProtocolError::ConstraintViolation(format!(
                "metrics do not match the approved record of session {}",
                session.session_id
            )));
        }

        let inputs = CircuitInputs {
            opening: CommitmentOpening {
                score: metrics.score,
                time_spent_seconds: metrics.time_spent_seconds,
                attempts: metrics.attempts,
                student: session.student.field_element(),
                session: session.session_id.field_element(),
                purpose,
                blinding: session_blinding(&session.session_id, &session.data_hash),
            },
            policy,
        };

        let _permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ProtocolError::ProvingFailed(e.to_string()))?;

        debug!(
            session_id = %session.session_id,
            purpose = ?purpose,
            "proving job started"
        );

        let artifact = Arc::clone(&self.artifact);
        let raw = tokio::task::spawn_blocking(move || artifact.generate_witness_and_proof(&inputs))
            .await
            .map_err(|e| ProtocolError::ProvingFailed(format!("proving task aborted: {e}")))?
            .map_err(|e| match e {
                ArtifactError::Unsatisfied(constraint) => {
                    warn!(
                        session_id = %session.session_id,
                        min_score = policy.min_score,
                        max_time = policy.max_time_seconds,
                        max_attempts = policy.max_attempts,
                        "metrics violate policy, no proof produced"
                    );
                    ProtocolError::ConstraintViolation(format!(
                        "metrics do not satisfy policy {policy:?} ({constraint})"
                    ))
                }
                other => ProtocolError::ProvingFailed(other.to_string()),
            })?;

        let proof = ZkProof::new(raw.a, raw.b, raw.c, raw.public_inputs);
        info!(
            session_id = %session.session_id,
            proof_id = %proof.proof_id,
            student = %session.student,
            purpose = ?purpose,
            "proof generated"
        );
        Ok(proof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Address;
    use crate::zkp::commitment::CommitmentParams;
    use crate::zkp::prover::Groth16Artifact;
    use crate::zkp::verifier::LearningProofVerifier;
    use ark_std::rand::{rngs::StdRng, SeedableRng};
    use chrono::Utc;

    fn binder() -> (ProofBinder, LearningProofVerifier) {
        let mut rng = StdRng::seed_from_u64(42);
        let (artifact, verifier) = Groth16Artifact::setup(CommitmentParams::standard(), &mut rng).unwrap();
        (ProofBinder::new(Arc::new(artifact), 2), verifier)
    }

    fn verified_session() -> LearningSession {
        let mut session = LearningSession::new(
            Address::from_key_hash([5u8; 32]),
            "python_basics_003",
            [6u8; 32],
            85,
            3500,
            3,
            1,
            Utc::now(),
        );
        session.approvals.insert(Address::from_key_hash([7u8; 32]));
        session.verified = true;
        session
    }

    fn policy(min_score: u32) -> ProofPolicy {
        ProofPolicy {
            min_score,
            max_time_seconds: 3600,
            max_attempts: 10,
        }
    }

    #[tokio::test]
    async fn bind_and_prove_in_policy() {
        let (binder, verifier) = binder();
        let session = verified_session();
        let proof = binder
            .bind_and_prove(&session, PrivateMetrics::of_session(&session), policy(80), ProofPurpose::Module)
            .await
            .unwrap();

        assert!(verifier.verify(&proof).unwrap());
        assert_eq!(proof.session_input(), Some(session.session_id.field_element()));
        assert_eq!(proof.student_input(), Some(session.student.field_element()));
        assert_eq!(
            proof.commitment(),
            Some(binder.params().session_commitment(&session, ProofPurpose::Module))
        );
        assert_eq!(proof.score(), Some(85));
        assert_eq!(proof.policy(), Some(policy(80)));
        assert_eq!(binder.available_workers(), 2);
    }

    #[tokio::test]
    async fn bind_and_prove_above_score_is_constraint_violation() {
        let (binder, _) = binder();
        let session = verified_session();
        let err = binder
            .bind_and_prove(&session, PrivateMetrics::of_session(&session), policy(90), ProofPurpose::Module)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ConstraintViolation(_)), "{err}");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn bind_and_prove_rejects_unverified_session() {
        let (binder, _) = binder();
        let mut session = verified_session();
        session.approvals.clear();
        session.verified = false;
        let err = binder
            .bind_and_prove(&session, PrivateMetrics::of_session(&session), policy(80), ProofPurpose::Module)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InsufficientApprovals { approvals: 0, required: 1, .. }));
    }

    #[tokio::test]
    async fn bind_and_prove_rejects_metrics_not_on_record() {
        let (binder, _) = binder();
        let session = verified_session();
        let inflated = PrivateMetrics {
            score: 99,
            ..PrivateMetrics::of_session(&session)
        };
        let err = binder
            .bind_and_prove(&session, inflated, policy(80), ProofPurpose::Module)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn proofs_are_randomized() {
        let (binder, _) = binder();
        let session = verified_session();
        let metrics = PrivateMetrics::of_session(&session);
        let a = binder
            .bind_and_prove(&session, metrics, policy(80), ProofPurpose::Module)
            .await
            .unwrap();
        let b = binder
            .bind_and_prove(&session, metrics, policy(80), ProofPurpose::Module)
            .await
            .unwrap();
        assert_eq!(a.public_inputs, b.public_inputs);
        assert_ne!(a.proof_id, b.proof_id);
    }
}
