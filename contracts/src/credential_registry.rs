//! # Credential Registry Contract
//!
//! Ledger-side half of minting. The off-ledger pipeline already checked all
//! of this, but the contract is what actually holds the line: a caller that
//! skips the service layer hits exactly the same rules here.
//!
//! ## `mintWithZkProof`
//!
//! ```text
//! proof id derived from contents ─► proof unused ─► session verified & matches ─► target allow-listed
//!   ─► proof bound to session, student, policy, score ─► content hashes
//!   ─► pairing check ─► self-service signature | platform minter
//!   ─► record proof id (+ nonce) ─► credential + event
//! ```
//!
//! Every check runs before the first write, so a mint either lands whole
//! or leaves no trace.
//!
//! ## Access control
//!
//! - **Owner**: allow-list management, minter management, revocation.
//! - **Platform minters**: mints without a student signature, revocation.
//! - **Anyone**: self-service mints carrying the student's signature.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use accredit_protocol::auth::{content_hashes, mint_message_digest, MintIntent, MintScope, SelfServiceAuth};
use accredit_protocol::identity::Address;
use accredit_protocol::ledger::{LedgerEvent, MintParams, MintTarget, RevertReason};
use accredit_protocol::mint::{satisfies, Credential, CredentialId, CredentialKind, Tier};
use accredit_protocol::session::{LearningSession, ModuleCatalog, ModulePolicy};
use accredit_protocol::zkp::{session_blinding, CommitmentParams, ProofId, ProofPolicy, ProofPurpose, ZkProof};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::verifier::VerifierContract;

/// Label the registry's contract address is derived from.
pub const REGISTRY_LABEL: &str = "accredit credential registry";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("caller {0} is not the owner")]
    NotOwner(Address),

    #[error("caller {0} is not a platform minter")]
    NotMinter(Address),

    #[error("module '{0}' is not valid")]
    UnknownModule(String),

    #[error("achievement type '{0}' is not valid")]
    UnknownAchievementType(String),

    #[error("session is not verified")]
    SessionNotVerified,

    #[error("proof {0} already used")]
    ProofUsed(ProofId),

    #[error("nonce '{0}' already used")]
    NonceUsed(String),

    #[error("invalid proof: {0}")]
    InvalidProof(String),

    #[error("signature does not authorize this mint")]
    BadSignature,

    #[error("expiry {0} is in the past")]
    ExpiryInPast(DateTime<Utc>),

    #[error("credential {0} not found")]
    CredentialNotFound(CredentialId),

    #[error("credential {0} is already revoked")]
    AlreadyRevoked(CredentialId),
}

impl From<RegistryError> for RevertReason {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotOwner(a) | RegistryError::NotMinter(a) => RevertReason::Unauthorized(a),
            RegistryError::UnknownModule(m) => RevertReason::InvalidModule(m),
            RegistryError::UnknownAchievementType(t) => RevertReason::InvalidAchievementType(t),
            RegistryError::ProofUsed(id) => RevertReason::ProofUsed(id),
            RegistryError::NonceUsed(n) => RevertReason::NonceUsed(n),
            RegistryError::InvalidProof(msg) => RevertReason::InvalidProof(msg),
            RegistryError::BadSignature => RevertReason::BadSignature,
            RegistryError::CredentialNotFound(id) => RevertReason::CredentialNotFound(id),
            other @ (RegistryError::SessionNotVerified
            | RegistryError::ExpiryInPast(_)
            | RegistryError::AlreadyRevoked(_)) => RevertReason::Other(other.to_string()),
        }
    }
}

pub type RegistryResult<T> = Result<T, RegistryError>;

// ---------------------------------------------------------------------------
// Contract state
// ---------------------------------------------------------------------------

pub struct CredentialRegistry {
    address: Address,
    chain_id: u64,
    owner: Address,
    params: CommitmentParams,
    verifier: VerifierContract,
    /// Shared with the ledger's session registry.
    modules: Arc<ModuleCatalog>,
    achievement_types: BTreeMap<String, ProofPolicy>,
    minters: BTreeSet<Address>,
    used_proofs: HashSet<ProofId>,
    used_nonces: HashSet<String>,
    balances: HashMap<(Address, String), u64>,
    credentials: BTreeMap<CredentialId, Credential>,
    next_id: u64,
}

/// What a successful mint produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Minted {
    pub credential: Credential,
    pub event: LedgerEvent,
}

impl CredentialRegistry {
    pub fn new(chain_id: u64, owner: Address, verifier: VerifierContract, modules: Arc<ModuleCatalog>) -> Self {
        Self {
            address: Address::for_contract(REGISTRY_LABEL),
            chain_id,
            owner,
            params: CommitmentParams::standard(),
            verifier,
            modules,
            achievement_types: BTreeMap::new(),
            minters: BTreeSet::new(),
            used_proofs: HashSet::new(),
            used_nonces: HashSet::new(),
            balances: HashMap::new(),
            credentials: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn verifier(&self) -> &VerifierContract {
        &self.verifier
    }

    // -- Administration -----------------------------------------------------

    fn only_owner(&self, sender: &Address) -> RegistryResult<()> {
        if *sender != self.owner {
            return Err(RegistryError::NotOwner(*sender));
        }
        Ok(())
    }

    pub fn add_valid_module(&mut self, sender: &Address, module_id: &str, policy: ModulePolicy) -> RegistryResult<()> {
        self.only_owner(sender)?;
        self.modules.register(module_id, policy);
        info!(module_id, ?policy, "module allow-listed");
        Ok(())
    }

    pub fn add_achievement_type(
        &mut self,
        sender: &Address,
        achievement_type: &str,
        policy: ProofPolicy,
    ) -> RegistryResult<()> {
        self.only_owner(sender)?;
        self.achievement_types.insert(achievement_type.to_string(), policy);
        info!(achievement_type, ?policy, "achievement type allow-listed");
        Ok(())
    }

    pub fn add_platform_minter(&mut self, sender: &Address, minter: Address) -> RegistryResult<()> {
        self.only_owner(sender)?;
        self.minters.insert(minter);
        info!(minter = %minter, "platform minter added");
        Ok(())
    }

    pub fn is_minter(&self, account: &Address) -> bool {
        self.minters.contains(account)
    }

    // -- Minting ------------------------------------------------------------

    /// `mintWithZkProof`. `session` is the ledger's record for
    /// `params.session_id`.
    pub fn mint_with_zk_proof(
        &mut self,
        sender: &Address,
        params: &MintParams,
        proof: &ZkProof,
        auth: Option<&SelfServiceAuth>,
        session: &LearningSession,
        now: DateTime<Utc>,
    ) -> RegistryResult<Minted> {
        let proof_id = ZkProof::compute_id(&proof.a, &proof.b, &proof.c, &proof.public_inputs);
        if proof.proof_id != proof_id {
            return Err(RegistryError::InvalidProof(
                "proof id does not match proof contents".to_string(),
            ));
        }
        if self.used_proofs.contains(&proof_id) {
            return Err(RegistryError::ProofUsed(proof_id));
        }
        if session.session_id != params.session_id || session.student != params.student {
            return Err(RegistryError::InvalidProof(
                "mint does not match the session".to_string(),
            ));
        }
        if !session.verified {
            return Err(RegistryError::SessionNotVerified);
        }

        let (purpose, required, amount) = match &params.target {
            MintTarget::Module { module_id } => {
                if *module_id != session.module_id {
                    return Err(RegistryError::InvalidProof(format!(
                        "session is for module '{}', not '{module_id}'",
                        session.module_id
                    )));
                }
                let policy = self
                    .modules
                    .policy(module_id)
                    .ok_or_else(|| RegistryError::UnknownModule(module_id.clone()))?;
                (ProofPurpose::Module, policy.proof_policy(), policy.reward_amount)
            }
            MintTarget::Achievement {
                achievement_type, ..
            } => {
                let policy = self
                    .achievement_types
                    .get(achievement_type)
                    .copied()
                    .ok_or_else(|| RegistryError::UnknownAchievementType(achievement_type.clone()))?;
                if let Some(at) = params.expires_at {
                    if at <= now {
                        return Err(RegistryError::ExpiryInPast(at));
                    }
                }
                (ProofPurpose::Achievement, policy, 1)
            }
        };

        self.check_binding(params, proof, session, purpose, &required)?;

        let authority = match auth {
            Some(auth) => self.check_self_service(sender, params, auth)?,
            None if self.minters.contains(sender) => *sender,
            None => return Err(RegistryError::NotMinter(*sender)),
        };

        // Every check passed; state changes start here.
        self.used_proofs.insert(proof_id);
        if let Some(auth) = auth {
            self.used_nonces.insert(auth.nonce.clone());
        }

        let id = CredentialId(self.next_id);
        self.next_id += 1;

        let (kind, event) = match &params.target {
            MintTarget::Module { module_id } => {
                *self
                    .balances
                    .entry((params.student, module_id.clone()))
                    .or_insert(0) += amount;
                (
                    CredentialKind::Module {
                        module_id: module_id.clone(),
                        amount,
                        score: params.score,
                        session_id: params.session_id,
                    },
                    LedgerEvent::ModuleCompleted {
                        student: params.student,
                        module_id: module_id.clone(),
                        amount,
                        score: params.score,
                        session_id: params.session_id,
                    },
                )
            }
            MintTarget::Achievement {
                achievement_type,
                title,
                ..
            } => (
                CredentialKind::Achievement {
                    achievement_type: achievement_type.clone(),
                    tier: Tier::from_score(params.score),
                    title: title.clone(),
                    score: params.score,
                    expires_at: params.expires_at,
                    proof_id,
                },
                LedgerEvent::AchievementMinted {
                    student: params.student,
                    token_id: id,
                    achievement_type: achievement_type.clone(),
                    title: title.clone(),
                    score: params.score,
                },
            ),
        };

        let credential = Credential {
            id,
            owner: params.student,
            kind,
            metadata_uri: params.metadata_uri.clone(),
            authority,
            minted_at: now,
            revoked: false,
        };
        self.credentials.insert(id, credential.clone());
        info!(
            credential_id = %id,
            student = %params.student,
            target = params.target.id(),
            authority = %authority,
            %proof_id,
            "credential minted"
        );
        Ok(Minted { credential, event })
    }

    fn check_binding(
        &self,
        params: &MintParams,
        proof: &ZkProof,
        session: &LearningSession,
        purpose: ProofPurpose,
        required: &ProofPolicy,
    ) -> RegistryResult<()> {
        let invalid = |msg: &str| Err(RegistryError::InvalidProof(msg.to_string()));

        if proof.purpose() != Some(purpose) {
            return invalid("proof purpose does not match the mint");
        }
        if proof.session_input() != Some(session.session_id.field_element()) {
            return invalid("proof is bound to another session");
        }
        if proof.student_input() != Some(session.student.field_element()) {
            return invalid("proof is bound to another student");
        }
        if proof.blinding() != Some(session_blinding(&session.session_id, &session.data_hash)) {
            return invalid("blinding does not match the session");
        }
        if proof.commitment() != Some(self.params.session_commitment(session, purpose)) {
            return invalid("commitment does not match the session");
        }
        if proof.score() != Some(params.score) {
            return invalid("score does not match the proof");
        }
        match proof.policy() {
            Some(proven) if satisfies(&proven, required) => {}
            _ => return invalid("proof policy is weaker than required"),
        }
        if params.content_hashes != content_hashes(&params.target, &params.metadata_uri) {
            return invalid("content hashes do not match the metadata");
        }
        if !self.verifier.verify_proof(proof) {
            return invalid("pairing check failed");
        }
        Ok(())
    }

    /// The student's own signature over this exact mint, relayed by `sender`.
    fn check_self_service(
        &self,
        sender: &Address,
        params: &MintParams,
        auth: &SelfServiceAuth,
    ) -> RegistryResult<Address> {
        if self.used_nonces.contains(&auth.nonce) {
            return Err(RegistryError::NonceUsed(auth.nonce.clone()));
        }
        if !params.student.matches(&auth.public_key) {
            return Err(RegistryError::BadSignature);
        }
        let scope = MintScope::from_params(params);
        let digest = mint_message_digest(&MintIntent {
            chain_id: self.chain_id,
            contract: &self.address,
            caller: sender,
            scope: &scope,
            nonce: &auth.nonce,
        });
        if !auth.public_key.verify(&digest, &auth.signature) {
            return Err(RegistryError::BadSignature);
        }
        Ok(params.student)
    }

    // -- Revocation ---------------------------------------------------------

    pub fn revoke_credential(&mut self, sender: &Address, id: CredentialId) -> RegistryResult<LedgerEvent> {
        if *sender != self.owner && !self.minters.contains(sender) {
            return Err(RegistryError::NotMinter(*sender));
        }
        let credential = self
            .credentials
            .get_mut(&id)
            .ok_or(RegistryError::CredentialNotFound(id))?;
        if credential.revoked {
            return Err(RegistryError::AlreadyRevoked(id));
        }
        credential.revoked = true;
        info!(credential_id = %id, revoked_by = %sender, "credential revoked");
        Ok(LedgerEvent::CredentialRevoked {
            credential_id: id,
            revoked_by: *sender,
        })
    }

    // -- Reads ----------------------------------------------------------------

    pub fn is_proof_used(&self, proof_id: &ProofId) -> bool {
        self.used_proofs.contains(proof_id)
    }

    pub fn is_nonce_used(&self, nonce: &str) -> bool {
        self.used_nonces.contains(nonce)
    }

    pub fn credential(&self, id: &CredentialId) -> RegistryResult<Credential> {
        self.credentials
            .get(id)
            .cloned()
            .ok_or(RegistryError::CredentialNotFound(*id))
    }

    pub fn module_balance(&self, owner: &Address, module_id: &str) -> u64 {
        self.balances
            .get(&(*owner, module_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn credentials_of(&self, owner: &Address) -> Vec<Credential> {
        self.credentials
            .values()
            .filter(|c| c.owner == *owner)
            .cloned()
            .collect()
    }
}
