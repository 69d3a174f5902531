//! # Proof Verifier Adapter
//!
//! Front door for every proof on its way to a mint. The ledger's pairing
//! check is authoritative, but it costs a ledger round trip, so everything
//! that can be decided locally is decided first:
//!
//! ```text
//! precheck: shape → session binding → student binding → commitment
//!           → id consistency → session verified → unseen → rate limit
//!                                   │
//!                     reserve nullifier (insert-if-absent)
//!                                   │
//!                        verify_on_ledger (pairing)
//!                                   │
//!                  VerifiedProof { proof, reservation }
//! ```
//!
//! The rate-limit slot is only taken once every other precheck has passed.
//! `InvalidProof` burns the proof id: the caller must produce a new proof.
//! Any other failure releases the reservation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::nullifier::{NullifierReservation, NullifierSet};
use super::rate_limit::RateLimiter;
use crate::error::{ProtocolError, ProtocolResult, Stage};
use crate::identity::Address;
use crate::ledger::{CallOutput, Ledger, LedgerCall, LedgerError};
use crate::session::LearningSession;
use crate::storage::StoreError;
use crate::zkp::{session_blinding, CommitmentParams, ProofId, ZkProof};

/// A proof that passed every check and holds its nullifier reservation.
/// Commit it once the mint lands; drop it to give the proof id back.
#[derive(Debug)]
pub struct VerifiedProof {
    proof: ZkProof,
    reservation: NullifierReservation,
}

impl VerifiedProof {
    pub fn proof(&self) -> &ZkProof {
        &self.proof
    }

    pub fn proof_id(&self) -> ProofId {
        self.proof.proof_id
    }

    /// Record the proof id as used, forever.
    pub fn commit(self) -> ProtocolResult<()> {
        self.reservation
            .commit()
            .map_err(ProtocolError::storage(Stage::ProofVerification))
    }
}

pub struct ProofVerifierAdapter {
    ledger: Arc<dyn Ledger>,
    caller: Address,
    params: CommitmentParams,
    nullifiers: Arc<dyn NullifierSet>,
    rate_limiter: RateLimiter,
}

impl ProofVerifierAdapter {
    /// `caller` is the account read-only ledger calls are made from.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        caller: Address,
        params: CommitmentParams,
        nullifiers: Arc<dyn NullifierSet>,
        rate_limit_window: Duration,
    ) -> Self {
        Self {
            ledger,
            caller,
            params,
            nullifiers,
            rate_limiter: RateLimiter::new(rate_limit_window),
        }
    }

    pub fn nullifiers(&self) -> &Arc<dyn NullifierSet> {
        &self.nullifiers
    }

    pub fn precheck(&self, proof: &ZkProof, session: &LearningSession) -> ProtocolResult<()> {
        self.precheck_at(proof, session, Utc::now())
    }

    /// Off-ledger checks, cheapest first.
    pub fn precheck_at(
        &self,
        proof: &ZkProof,
        session: &LearningSession,
        now: DateTime<Utc>,
    ) -> ProtocolResult<()> {
        let purpose = proof
            .purpose()
            .ok_or_else(|| ProtocolError::InvalidProof("malformed public inputs".to_string()))?;

        if proof.session_input() != Some(session.session_id.field_element()) {
            return Err(ProtocolError::InvalidProof(format!(
                "proof is not bound to session {}",
                session.session_id
            )));
        }
        if proof.student_input() != Some(session.student.field_element()) {
            return Err(ProtocolError::InvalidProof(format!(
                "proof is not bound to student {}",
                session.student
            )));
        }
        if proof.blinding() != Some(session_blinding(&session.session_id, &session.data_hash)) {
            return Err(ProtocolError::InvalidProof(format!(
                "blinding does not match session {}",
                session.session_id
            )));
        }
        if proof.commitment() != Some(self.params.session_commitment(session, purpose)) {
            return Err(ProtocolError::InvalidProof(format!(
                "commitment does not match session {}",
                session.session_id
            )));
        }
        if !proof.has_consistent_id() {
            return Err(ProtocolError::InvalidProof(
                "proof id does not match proof contents".to_string(),
            ));
        }

        if !session.verified {
            return Err(ProtocolError::InsufficientApprovals {
                session_id: session.session_id,
                approvals: session.approval_count(),
                required: session.required_approvals,
            });
        }

        if self.nullifiers.contains(&proof.proof_id).map_err(storage_error)? {
            return Err(ProtocolError::DuplicateProof(proof.proof_id));
        }

        self.rate_limiter
            .try_acquire(&session.student, now)
            .map_err(|retry_after| {
                debug!(student = %session.student, ?retry_after, "verification rate limited");
                ProtocolError::RateLimited { retry_after }
            })
    }

    /// The authoritative pairing check on the ledger. Never `Ok` for a
    /// proof the ledger rejected.
    pub async fn verify_on_ledger(&self, proof: &ZkProof) -> ProtocolResult<()> {
        let call = LedgerCall::VerifyProof {
            proof: proof.clone(),
        };
        match self.ledger.call(&self.caller, &call).await {
            Ok(CallOutput::Bool(true)) => Ok(()),
            Ok(CallOutput::Bool(false)) => Err(ProtocolError::InvalidProof(
                "pairing check failed".to_string(),
            )),
            Ok(other) => Err(ProtocolError::InvalidProof(format!(
                "unexpected verifier output {other:?}"
            ))),
            Err(LedgerError::Reverted(reason)) => {
                Err(ProtocolError::InvalidProof(format!("verifier reverted: {reason}")))
            }
            Err(e) => Err(ProtocolError::TransactionFailed {
                attempts: 1,
                reason: e.to_string(),
            }),
        }
    }

    /// Precheck, reserve the proof id, then verify on the ledger.
    pub async fn verify(&self, proof: &ZkProof, session: &LearningSession) -> ProtocolResult<VerifiedProof> {
        self.precheck(proof, session)?;

        let reservation = NullifierReservation::acquire(self.nullifiers.clone(), proof.proof_id)
            .map_err(storage_error)?
            .ok_or(ProtocolError::DuplicateProof(proof.proof_id))?;

        match self.verify_on_ledger(proof).await {
            Ok(()) => {
                info!(
                    proof_id = %proof.proof_id,
                    session_id = %session.session_id,
                    student = %session.student,
                    "proof verified"
                );
                Ok(VerifiedProof {
                    proof: proof.clone(),
                    reservation,
                })
            }
            Err(err @ ProtocolError::InvalidProof(_)) => {
                warn!(proof_id = %proof.proof_id, error = %err, "proof rejected, burning its id");
                reservation.commit().map_err(storage_error)?;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}

fn storage_error(e: StoreError) -> ProtocolError {
    ProtocolError::storage(Stage::ProofVerification)(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{FeeEstimate, LedgerTransaction, TxId, TxReceipt};
    use crate::verifier::nullifier::InMemoryNullifierSet;
    use crate::zkp::{
        CircuitArtifact, CircuitInputs, CommitmentOpening, Groth16Artifact, LearningProofVerifier, PrivateMetrics,
        ProofBinder, ProofPolicy, ProofPurpose,
    };
    use ark_bn254::Fr;
    use ark_std::rand::{rngs::StdRng, SeedableRng};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Answers `VerifyProof` with a real pairing check; nothing else.
    struct PairingLedger {
        verifier: LearningProofVerifier,
        calls: AtomicUsize,
        offline: AtomicBool,
    }

    #[async_trait]
    impl Ledger for PairingLedger {
        fn chain_id(&self) -> u64 {
            1
        }
        async fn pending_nonce(&self, _: &Address) -> Result<u64, LedgerError> {
            Ok(0)
        }
        async fn fee_estimate(&self) -> Result<FeeEstimate, LedgerError> {
            Ok(FeeEstimate {
                base_fee: 1,
                priority_fee: 1,
            })
        }
        async fn estimate_gas(&self, _: &Address, _: &LedgerCall) -> Result<u64, LedgerError> {
            Ok(1)
        }
        async fn call(&self, _: &Address, call: &LedgerCall) -> Result<CallOutput, LedgerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(LedgerError::Unavailable("offline".into()));
            }
            match call {
                LedgerCall::VerifyProof { proof } => Ok(CallOutput::Bool(
                    self.verifier.verify(proof).unwrap_or(false),
                )),
                _ => Ok(CallOutput::None),
            }
        }
        async fn send_transaction(&self, tx: LedgerTransaction) -> Result<TxId, LedgerError> {
            Ok(tx.id())
        }
        async fn wait_for_receipt(&self, id: &TxId, _: Duration) -> Result<TxReceipt, LedgerError> {
            Err(LedgerError::Timeout(*id))
        }
    }

    struct Fixture {
        artifact: Arc<Groth16Artifact>,
        binder: ProofBinder,
        ledger: Arc<PairingLedger>,
        nullifiers: Arc<dyn NullifierSet>,
    }

    fn fixture() -> Fixture {
        let mut rng = StdRng::seed_from_u64(42);
        let (artifact, verifier) = Groth16Artifact::setup(CommitmentParams::standard(), &mut rng).unwrap();
        let artifact = Arc::new(artifact);
        Fixture {
            artifact: artifact.clone(),
            binder: ProofBinder::new(artifact, 1),
            ledger: Arc::new(PairingLedger {
                verifier,
                calls: AtomicUsize::new(0),
                offline: AtomicBool::new(false),
            }),
            nullifiers: Arc::new(InMemoryNullifierSet::new()),
        }
    }

    impl Fixture {
        fn adapter(&self, window: Duration) -> ProofVerifierAdapter {
            ProofVerifierAdapter::new(
                self.ledger.clone(),
                Address::from_key_hash([9u8; 32]),
                CommitmentParams::standard(),
                self.nullifiers.clone(),
                window,
            )
        }

        async fn prove(&self, session: &LearningSession) -> ZkProof {
            self.binder
                .bind_and_prove(session, PrivateMetrics::of_session(session), policy(), ProofPurpose::Module)
                .await
                .unwrap()
        }
    }

    fn policy() -> ProofPolicy {
        ProofPolicy {
            min_score: 80,
            max_time_seconds: 3600,
            max_attempts: 10,
        }
    }

    fn session(data: u8) -> LearningSession {
        let mut s = LearningSession::new(
            Address::from_key_hash([1u8; 32]),
            "python_basics_003",
            [data; 32],
            85,
            3500,
            3,
            1,
            Utc::now(),
        );
        s.approvals.insert(Address::from_key_hash([2u8; 32]));
        s.verified = true;
        s
    }

    #[tokio::test]
    async fn verify_then_duplicate() {
        let fx = fixture();
        let adapter = fx.adapter(Duration::ZERO);
        let s = session(1);
        let proof = fx.prove(&s).await;

        let verified = adapter.verify(&proof, &s).await.unwrap();
        assert_eq!(verified.proof_id(), proof.proof_id);
        verified.commit().unwrap();

        let err = adapter.verify(&proof, &s).await.unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateProof(id) if id == proof.proof_id));
        assert_eq!(fx.ledger.calls.load(Ordering::SeqCst), 1, "duplicate must not reach the ledger");
    }

    #[tokio::test]
    async fn proof_for_other_session_rejected_before_ledger() {
        let fx = fixture();
        let adapter = fx.adapter(Duration::ZERO);
        let a = session(1);
        let b = session(2);
        let proof = fx.prove(&a).await;

        let err = adapter.verify(&proof, &b).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidProof(_)));
        assert_eq!(err.stage(), Stage::ProofVerification);
        assert_eq!(fx.ledger.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reblinded_proof_for_slow_session_rejected_before_ledger() {
        let fx = fixture();
        let adapter = fx.adapter(Duration::ZERO);
        let mut s = session(1);
        s.time_spent_seconds = 5000;

        let refused = fx
            .binder
            .bind_and_prove(&s, PrivateMetrics::of_session(&s), policy(), ProofPurpose::Module)
            .await
            .unwrap_err();
        assert!(matches!(refused, ProtocolError::ConstraintViolation(_)));

        // Zero time spent, with the blinding re-solved to open the session's commitment.
        let params = CommitmentParams::standard();
        let honest = CommitmentOpening::for_session(&s, ProofPurpose::Module);
        let mut forged = honest;
        forged.time_spent_seconds = 0;
        forged.blinding = honest.blinding + Fr::from(5000u64) * params.g_time / params.h;
        let raw = fx
            .artifact
            .generate_witness_and_proof(&CircuitInputs {
                opening: forged,
                policy: policy(),
            })
            .unwrap();
        let proof = ZkProof::new(raw.a, raw.b, raw.c, raw.public_inputs);
        assert_eq!(proof.commitment(), Some(params.session_commitment(&s, ProofPurpose::Module)));
        assert!(fx.ledger.verifier.verify(&proof).unwrap());

        let err = adapter.verify(&proof, &s).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidProof(ref msg) if msg.contains("blinding")));
        assert_eq!(fx.ledger.calls.load(Ordering::SeqCst), 0);
        assert!(!fx.nullifiers.contains(&proof.proof_id).unwrap());
    }

    #[tokio::test]
    async fn unverified_session_rejected() {
        let fx = fixture();
        let adapter = fx.adapter(Duration::ZERO);
        let s = session(1);
        let proof = fx.prove(&s).await;

        let mut pending = s.clone();
        pending.verified = false;
        pending.approvals.clear();
        let err = adapter.precheck(&proof, &pending).unwrap_err();
        assert!(matches!(err, ProtocolError::InsufficientApprovals { .. }));
    }

    #[tokio::test]
    async fn rate_limit_applies_per_student() {
        let fx = fixture();
        let adapter = fx.adapter(Duration::from_secs(30));
        let s = session(1);
        let proof = fx.prove(&s).await;

        // Verified but not committed: the reservation is released on drop.
        drop(adapter.verify(&proof, &s).await.unwrap());
        let err = adapter.verify(&proof, &s).await.unwrap_err();
        assert!(matches!(err, ProtocolError::RateLimited { .. }));
        assert!(err.retry_after().is_some());
    }

    #[tokio::test]
    async fn failed_pairing_burns_proof_id() {
        let fx = fixture();
        let adapter = fx.adapter(Duration::ZERO);
        let s = session(1);
        let honest = fx.prove(&s).await;
        // Same public inputs, points shuffled: binding checks pass, pairing fails.
        let forged = ZkProof::new(honest.c, honest.b, honest.a, honest.public_inputs.clone());

        let err = adapter.verify(&forged, &s).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidProof(_)));
        assert!(fx.nullifiers.is_committed(&forged.proof_id).unwrap());

        let again = adapter.verify(&forged, &s).await.unwrap_err();
        assert!(matches!(again, ProtocolError::DuplicateProof(_)));
    }

    #[tokio::test]
    async fn ledger_outage_releases_reservation() {
        let fx = fixture();
        let adapter = fx.adapter(Duration::ZERO);
        let s = session(1);
        let proof = fx.prove(&s).await;
        fx.ledger.offline.store(true, Ordering::SeqCst);

        let err = adapter.verify(&proof, &s).await.unwrap_err();
        assert!(matches!(err, ProtocolError::TransactionFailed { .. }));
        assert!(!fx.nullifiers.contains(&proof.proof_id).unwrap());
    }
}
