//! # Credential Minter
//!
//! Turns a verified proof (and, for achievements, an authorization) into a
//! credential on the ledger.
//!
//! ```text
//! unused ─► allow-list ─► purpose ─► policy ─► adapter.verify ─► [authorize] ─► submit
//!                                                   │                            │
//!                                            VerifiedProof ◄── commit on success ┘
//! ```
//!
//! The proof id stays reserved from `verify` until the ledger answers. A
//! confirmed mint commits it; a ledger that already knows the proof also
//! commits it and reports `DuplicateProof`. A mint still sitting in the
//! pool when attempts run out (`SubmissionPending`) commits it too, since it
//! may yet land. Anything else releases it so a later attempt with the same
//! proof is judged by the ledger again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::book::CredentialBook;
use super::catalog::{satisfies, AchievementCatalog};
use super::credential::{Credential, CredentialId};
use crate::auth::{content_hashes, AuthorizationLayer, MintAuthorization, MintScope};
use crate::error::{ProtocolError, ProtocolResult, Stage};
use crate::identity::Address;
use crate::ledger::{
    CallOutput, LedgerCall, LedgerError, MintParams, MintTarget, RevertReason, SubmissionError,
    TransactionSubmissionManager,
};
use crate::session::{LearningSession, ModuleCatalog};
use crate::verifier::{ProofVerifierAdapter, VerifiedProof};
use crate::zkp::{ProofPolicy, ProofPurpose, ZkProof};

/// Everything about an achievement mint besides the proof and authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementRequest {
    pub achievement_type: String,
    pub title: String,
    pub description: String,
    pub metadata_uri: String,
    pub score: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AchievementRequest {
    pub fn target(&self) -> MintTarget {
        MintTarget::Achievement {
            achievement_type: self.achievement_type.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
        }
    }

    /// What a student signs to authorize this request for themselves.
    pub fn scope_for(&self, student: Address) -> MintScope {
        let target = self.target();
        MintScope {
            student,
            content_hashes: content_hashes(&target, &self.metadata_uri),
            target,
            score: self.score,
            expires_at: self.expires_at,
        }
    }
}

pub struct CredentialMinter {
    modules: Arc<ModuleCatalog>,
    achievements: Arc<AchievementCatalog>,
    adapter: Arc<ProofVerifierAdapter>,
    auth: Arc<AuthorizationLayer>,
    submitter: Arc<TransactionSubmissionManager>,
    book: CredentialBook,
}

impl CredentialMinter {
    pub fn new(
        modules: Arc<ModuleCatalog>,
        achievements: Arc<AchievementCatalog>,
        adapter: Arc<ProofVerifierAdapter>,
        auth: Arc<AuthorizationLayer>,
        submitter: Arc<TransactionSubmissionManager>,
    ) -> Self {
        Self {
            modules,
            achievements,
            adapter,
            auth,
            submitter,
            book: CredentialBook::new(),
        }
    }

    pub fn book(&self) -> &CredentialBook {
        &self.book
    }

    pub fn authorization(&self) -> &Arc<AuthorizationLayer> {
        &self.auth
    }

    /// Mint a fungible module-completion credential to `session.student`.
    /// The relayer account must be a platform minter on the ledger.
    pub async fn mint_module_credential(
        &self,
        session: &LearningSession,
        proof: &ZkProof,
        metadata_uri: &str,
    ) -> ProtocolResult<CredentialId> {
        self.ensure_unused(proof)?;
        let policy = self
            .modules
            .policy(&session.module_id)
            .ok_or_else(|| ProtocolError::InvalidModule {
                module_id: session.module_id.clone(),
                stage: Stage::Minting,
            })?;
        check_proof_shape(proof, ProofPurpose::Module, &policy.proof_policy())?;

        let verified = self.adapter.verify(proof, session).await?;

        let target = MintTarget::Module {
            module_id: session.module_id.clone(),
        };
        let params = MintParams {
            student: session.student,
            session_id: session.session_id,
            content_hashes: content_hashes(&target, metadata_uri),
            target,
            metadata_uri: metadata_uri.to_string(),
            score: session.score,
            expires_at: None,
        };
        let call = LedgerCall::MintWithZkProof {
            params,
            proof: proof.clone(),
            auth: None,
        };
        self.submit_mint(verified, call).await
    }

    /// Mint a non-fungible achievement credential. `authorization` picks the
    /// self-service or platform path; the two never mix.
    pub async fn mint_achievement_credential(
        &self,
        request: &AchievementRequest,
        session: &LearningSession,
        proof: &ZkProof,
        authorization: &MintAuthorization,
    ) -> ProtocolResult<CredentialId> {
        self.ensure_unused(proof)?;
        let policy = self
            .achievements
            .policy(&request.achievement_type)
            .ok_or_else(|| ProtocolError::InvalidAchievementType(request.achievement_type.clone()))?;
        check_proof_shape(proof, ProofPurpose::Achievement, &policy)?;
        if proof.score() != Some(request.score) {
            return Err(ProtocolError::InvalidProof(format!(
                "requested score {} is not the proven score",
                request.score
            )));
        }

        let verified = self.adapter.verify(proof, session).await?;

        let target = request.target();
        let params = MintParams {
            student: session.student,
            session_id: session.session_id,
            content_hashes: content_hashes(&target, &request.metadata_uri),
            target,
            metadata_uri: request.metadata_uri.clone(),
            score: request.score,
            expires_at: request.expires_at,
        };

        // An authorization failure drops `verified`, releasing the proof id.
        let authorized = self.auth.authorize(&MintScope::from_params(&params), authorization)?;

        let call = LedgerCall::MintWithZkProof {
            params,
            proof: proof.clone(),
            auth: authorized.ledger_auth,
        };
        self.submit_mint(verified, call).await
    }

    /// Set the revocation flag. The relayer must be the ledger owner or a
    /// platform minter.
    pub async fn revoke_credential(&self, credential_id: CredentialId) -> ProtocolResult<()> {
        self.submitter
            .submit(LedgerCall::RevokeCredential { credential_id })
            .await
            .map_err(|e| e.into_protocol_error(Stage::Minting))?;
        self.book.mark_revoked(&credential_id);
        info!(credential_id = %credential_id, revoked_by = %self.submitter.address(), "credential revoked");
        Ok(())
    }

    /// Read a credential back from the ledger.
    pub async fn fetch_credential(&self, credential_id: CredentialId) -> ProtocolResult<Credential> {
        match self.submitter.call(&LedgerCall::GetCredential { credential_id }).await {
            Ok(CallOutput::Credential(c)) => Ok(*c),
            Ok(other) => Err(ProtocolError::MintRejected(format!(
                "unexpected output for credential {credential_id}: {other:?}"
            ))),
            Err(LedgerError::Reverted(reason)) => Err(reason.into_protocol_error(Stage::Minting)),
            Err(e) => Err(ProtocolError::TransactionFailed {
                attempts: 1,
                reason: e.to_string(),
            }),
        }
    }

    pub fn relayer(&self) -> Address {
        self.submitter.address()
    }

    /// A used proof id is reported as such whichever mint it is replayed
    /// against.
    fn ensure_unused(&self, proof: &ZkProof) -> ProtocolResult<()> {
        let seen = self
            .adapter
            .nullifiers()
            .contains(&proof.proof_id)
            .map_err(ProtocolError::storage(Stage::Minting))?;
        if seen {
            return Err(ProtocolError::DuplicateProof(proof.proof_id));
        }
        Ok(())
    }

    async fn submit_mint(&self, verified: VerifiedProof, call: LedgerCall) -> ProtocolResult<CredentialId> {
        let proof_id = verified.proof_id();
        match self.submitter.submit(call).await {
            Ok(receipt) => {
                verified.commit()?;
                match receipt.output {
                    CallOutput::Credential(credential) => {
                        let credential = *credential;
                        let id = credential.id;
                        info!(
                            credential_id = %id,
                            owner = %credential.owner,
                            authority = %credential.authority,
                            proof_id = %proof_id,
                            tx_id = %receipt.tx_id,
                            "credential minted"
                        );
                        self.book.record(credential);
                        Ok(id)
                    }
                    other => Err(ProtocolError::MintRejected(format!(
                        "mint confirmed without a credential: {other:?}"
                    ))),
                }
            }
            Err(SubmissionError::Reverted {
                reason: reason @ (RevertReason::ProofUsed(_) | RevertReason::InvalidProof(_)),
                ..
            }) => {
                warn!(proof_id = %proof_id, reason = %reason, "ledger refused the proof, burning its id");
                verified.commit()?;
                Err(reason.into_protocol_error(Stage::Minting))
            }
            Err(e @ SubmissionError::Pending { .. }) => {
                // The mint may still land, so the proof id stays spent.
                warn!(proof_id = %proof_id, error = %e, "mint outcome unknown, keeping the proof id");
                verified.commit()?;
                Err(e.into_protocol_error(Stage::Minting))
            }
            Err(e) => {
                drop(verified);
                Err(e.into_protocol_error(Stage::Minting))
            }
        }
    }
}

fn check_proof_shape(proof: &ZkProof, purpose: ProofPurpose, required: &ProofPolicy) -> ProtocolResult<()> {
    if proof.purpose() != Some(purpose) {
        return Err(ProtocolError::InvalidProof(format!(
            "proof was not generated for a {purpose:?} credential"
        )));
    }
    match proof.policy() {
        Some(proven) if satisfies(&proven, required) => Ok(()),
        Some(proven) => Err(ProtocolError::InvalidProof(format!(
            "proven policy {proven:?} is weaker than required {required:?}"
        ))),
        None => Err(ProtocolError::InvalidProof("malformed public inputs".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryNonceStore;
    use crate::crypto::Keypair;
    use crate::ledger::{FeeEstimate, Ledger, LedgerTransaction, RetryPolicy, TxId, TxReceipt};
    use crate::session::ModulePolicy;
    use crate::verifier::InMemoryNullifierSet;
    use crate::zkp::{CommitmentParams, Groth16Artifact, PrivateMetrics, ProofBinder};
    use ark_std::rand::{rngs::StdRng, SeedableRng};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Counts every ledger interaction and refuses all of them.
    #[derive(Default)]
    struct UnreachableLedger {
        touched: AtomicUsize,
    }

    impl UnreachableLedger {
        fn touch(&self) -> LedgerError {
            self.touched.fetch_add(1, Ordering::SeqCst);
            LedgerError::Unavailable("not expected".into())
        }
    }

    #[async_trait]
    impl Ledger for UnreachableLedger {
        fn chain_id(&self) -> u64 {
            1
        }
        async fn pending_nonce(&self, _: &Address) -> Result<u64, LedgerError> {
            Err(self.touch())
        }
        async fn fee_estimate(&self) -> Result<FeeEstimate, LedgerError> {
            Err(self.touch())
        }
        async fn estimate_gas(&self, _: &Address, _: &LedgerCall) -> Result<u64, LedgerError> {
            Err(self.touch())
        }
        async fn call(&self, _: &Address, _: &LedgerCall) -> Result<CallOutput, LedgerError> {
            Err(self.touch())
        }
        async fn send_transaction(&self, _: LedgerTransaction) -> Result<TxId, LedgerError> {
            Err(self.touch())
        }
        async fn wait_for_receipt(&self, _: &TxId, _: Duration) -> Result<TxReceipt, LedgerError> {
            Err(self.touch())
        }
    }

    struct Fixture {
        minter: CredentialMinter,
        ledger: Arc<UnreachableLedger>,
        binder: ProofBinder,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(UnreachableLedger::default());
        let relayer = Keypair::from_seed(&[7u8; 32]);
        let relayer_addr = Address::from_public_key(&relayer.public_key());
        let modules = Arc::new(ModuleCatalog::new());
        modules.register("python_basics_003", ModulePolicy::default());
        let adapter = Arc::new(ProofVerifierAdapter::new(
            ledger.clone(),
            relayer_addr,
            CommitmentParams::standard(),
            Arc::new(InMemoryNullifierSet::new()),
            Duration::ZERO,
        ));
        let auth = Arc::new(AuthorizationLayer::new(
            1,
            Address::for_contract("credential-registry"),
            relayer_addr,
            Arc::new(InMemoryNonceStore::new()),
            Duration::from_secs(300),
        ));
        let submitter = Arc::new(TransactionSubmissionManager::new(
            ledger.clone(),
            relayer,
            RetryPolicy::default(),
        ));
        let mut rng = StdRng::seed_from_u64(42);
        let (artifact, _) = Groth16Artifact::setup(CommitmentParams::standard(), &mut rng).unwrap();
        Fixture {
            minter: CredentialMinter::new(
                modules,
                Arc::new(AchievementCatalog::with_types(["course_completion"])),
                adapter,
                auth,
                submitter,
            ),
            ledger,
            binder: ProofBinder::new(Arc::new(artifact), 1),
        }
    }

    fn session(module_id: &str) -> LearningSession {
        let mut s = LearningSession::new(
            Address::from_key_hash([1u8; 32]),
            module_id,
            [4u8; 32],
            92,
            3500,
            3,
            1,
            Utc::now(),
        );
        s.approvals.insert(Address::from_key_hash([2u8; 32]));
        s.verified = true;
        s
    }

    fn policy(min_score: u32) -> ProofPolicy {
        ProofPolicy {
            min_score,
            max_time_seconds: 3600,
            max_attempts: 10,
        }
    }

    fn request(score: u32) -> AchievementRequest {
        AchievementRequest {
            achievement_type: "course_completion".into(),
            title: "Python Basics".into(),
            description: "Every module passed".into(),
            metadata_uri: "ipfs://meta".into(),
            score,
            expires_at: None,
        }
    }

    impl Fixture {
        async fn prove(&self, s: &LearningSession, policy: ProofPolicy, purpose: ProofPurpose) -> ZkProof {
            self.binder
                .bind_and_prove(s, PrivateMetrics::of_session(s), policy, purpose)
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn module_not_on_allow_list() {
        let fx = fixture();
        let s = session("underwater_basket_weaving");
        let proof = fx.prove(&s, policy(80), ProofPurpose::Module).await;
        let err = fx.minter.mint_module_credential(&s, &proof, "ipfs://m").await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidModule { stage: Stage::Minting, .. }));
        assert_eq!(fx.ledger.touched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn achievement_proof_cannot_mint_module() {
        let fx = fixture();
        let s = session("python_basics_003");
        let proof = fx.prove(&s, policy(80), ProofPurpose::Achievement).await;
        let err = fx.minter.mint_module_credential(&s, &proof, "ipfs://m").await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidProof(_)));
        assert_eq!(fx.ledger.touched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn weaker_policy_rejected() {
        let fx = fixture();
        let s = session("python_basics_003");
        let proof = fx.prove(&s, policy(50), ProofPurpose::Module).await;
        let err = fx.minter.mint_module_credential(&s, &proof, "ipfs://m").await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidProof(msg) if msg.contains("weaker")));
    }

    #[tokio::test]
    async fn unknown_achievement_type() {
        let fx = fixture();
        let s = session("python_basics_003");
        let proof = fx.prove(&s, policy(80), ProofPurpose::Achievement).await;
        let mut req = request(92);
        req.achievement_type = "speedrun".into();
        let auth = MintAuthorization::Platform {
            signer: fx.minter.relayer(),
        };
        let err = fx
            .minter
            .mint_achievement_credential(&req, &s, &proof, &auth)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidAchievementType(t) if t == "speedrun"));
    }

    #[tokio::test]
    async fn claimed_score_must_match_proof() {
        let fx = fixture();
        let s = session("python_basics_003");
        let proof = fx.prove(&s, policy(80), ProofPurpose::Achievement).await;
        let auth = MintAuthorization::Platform {
            signer: fx.minter.relayer(),
        };
        let err = fx
            .minter
            .mint_achievement_credential(&request(99), &s, &proof, &auth)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidProof(_)));
        assert_eq!(fx.ledger.touched.load(Ordering::SeqCst), 0);
    }
}
