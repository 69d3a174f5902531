//! # Devnet
//!
//! A complete pipeline wired against one [`LocalLedger`]: genesis
//! transactions for the allow-lists, a platform relayer that is also the
//! only platform signer, a validator set, and every off-ledger component.
//! Used by the integration tests and by `accredit-node demo`.

use std::path::Path;
use std::sync::Arc;

use accredit_protocol::auth::{
    AuthorizationLayer, InMemoryNonceStore, MintAuthorization, NonceStore, SelfServiceAuth, SledNonceStore,
};
use accredit_protocol::config::ServiceConfig;
use accredit_protocol::crypto::hash::blake3_hash_multi;
use accredit_protocol::crypto::Keypair;
use accredit_protocol::error::{ProtocolError, ProtocolResult};
use accredit_protocol::identity::Address;
use accredit_protocol::ledger::{CallOutput, LedgerCall, RetryPolicy, TransactionSubmissionManager};
use accredit_protocol::mint::{default_achievement_policy, AchievementCatalog, AchievementRequest, CredentialMinter};
use accredit_protocol::session::{
    ApprovalResult, InMemorySessionStore, LearningSession, LedgerSessions, ModuleCatalog, ModulePolicy,
    SessionStore, SledSessionStore,
};
use accredit_protocol::storage::AccreditDb;
use accredit_protocol::verifier::{InMemoryNullifierSet, NullifierSet, ProofVerifierAdapter, SledNullifierSet};
use accredit_protocol::zkp::{
    CommitmentParams, Groth16Artifact, PrivateMetrics, ProofBinder, ProofPolicy, ProofPurpose, ZkProof,
};
use anyhow::Context;
use ark_std::rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::local_ledger::{LedgerConfig, LocalLedger};

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Every account the devnet needs.
#[derive(Debug, Clone)]
pub struct DevnetKeys {
    pub owner: Keypair,
    pub platform: Keypair,
    pub validators: Vec<Keypair>,
}

/// Hex secret keys, the on-disk form written by `accredit-node init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFile {
    pub owner: String,
    pub platform: String,
    pub validators: Vec<String>,
}

impl DevnetKeys {
    /// Deterministic keys for tests and reproducible demos.
    pub fn derive(seed: u64, validators: usize) -> Self {
        let key = |label: &str, index: u64| {
            Keypair::from_seed(&blake3_hash_multi(&[
                b"accredit devnet key",
                label.as_bytes(),
                &seed.to_le_bytes(),
                &index.to_le_bytes(),
            ]))
        };
        Self {
            owner: key("owner", 0),
            platform: key("platform", 0),
            validators: (0..validators as u64).map(|i| key("validator", i)).collect(),
        }
    }

    pub fn generate(validators: usize) -> Self {
        Self {
            owner: Keypair::generate(),
            platform: Keypair::generate(),
            validators: (0..validators).map(|_| Keypair::generate()).collect(),
        }
    }

    pub fn to_file(&self) -> KeyFile {
        KeyFile {
            owner: hex::encode(self.owner.secret_key_bytes()),
            platform: hex::encode(self.platform.secret_key_bytes()),
            validators: self
                .validators
                .iter()
                .map(|k| hex::encode(k.secret_key_bytes()))
                .collect(),
        }
    }

    pub fn from_file(file: &KeyFile) -> anyhow::Result<Self> {
        Ok(Self {
            owner: Keypair::from_hex(&file.owner).context("owner key")?,
            platform: Keypair::from_hex(&file.platform).context("platform key")?,
            validators: file
                .validators
                .iter()
                .map(|k| Keypair::from_hex(k).context("validator key"))
                .collect::<anyhow::Result<_>>()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DevnetConfig {
    pub service: ServiceConfig,
    pub ledger: LedgerConfig,
    pub modules: Vec<(String, ModulePolicy)>,
    pub achievement_types: Vec<(String, ProofPolicy)>,
    /// Seed for the circuit setup.
    pub setup_seed: u64,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            ledger: LedgerConfig::default(),
            modules: vec![("python_basics_003".to_string(), ModulePolicy::default())],
            achievement_types: vec![("course_completion".to_string(), default_achievement_policy())],
            setup_seed: 42,
        }
    }
}

struct Stores {
    sessions: Arc<dyn SessionStore>,
    nullifiers: Arc<dyn NullifierSet>,
    nonces: Arc<dyn NonceStore>,
}

impl Stores {
    fn in_memory() -> Self {
        Self {
            sessions: Arc::new(InMemorySessionStore::new()),
            nullifiers: Arc::new(InMemoryNullifierSet::new()),
            nonces: Arc::new(InMemoryNonceStore::new()),
        }
    }

    fn sled(path: &Path) -> anyhow::Result<Self> {
        let db = AccreditDb::open(path).with_context(|| format!("opening {}", path.display()))?;
        Ok(Self {
            sessions: Arc::new(SledSessionStore::new(db.clone())),
            nullifiers: Arc::new(SledNullifierSet::new(db.clone())),
            nonces: Arc::new(SledNonceStore::new(db)),
        })
    }
}

// ---------------------------------------------------------------------------
// Devnet
// ---------------------------------------------------------------------------

pub struct Devnet {
    pub ledger: Arc<LocalLedger>,
    pub binder: ProofBinder,
    pub adapter: Arc<ProofVerifierAdapter>,
    pub auth: Arc<AuthorizationLayer>,
    pub minter: CredentialMinter,
    /// Relayer and platform signer.
    pub platform: Arc<TransactionSubmissionManager>,
    pub owner: Arc<TransactionSubmissionManager>,
    /// Session writes from the platform account.
    pub sessions: LedgerSessions,
    /// One client per validator, voting from its own account.
    pub validators: Vec<LedgerSessions>,
}

impl Devnet {
    /// Start with in-memory stores.
    pub async fn start(config: DevnetConfig, keys: DevnetKeys) -> anyhow::Result<Self> {
        Self::build(config, keys, Stores::in_memory()).await
    }

    /// Start with sled-backed session, nullifier and nonce stores.
    pub async fn start_persistent(config: DevnetConfig, keys: DevnetKeys, path: &Path) -> anyhow::Result<Self> {
        Self::build(config, keys, Stores::sled(path)?).await
    }

    async fn build(config: DevnetConfig, keys: DevnetKeys, stores: Stores) -> anyhow::Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.setup_seed);
        let params = CommitmentParams::standard();
        let (artifact, verifier) = Groth16Artifact::setup(params.clone(), &mut rng)?;

        let ledger_config = LedgerConfig {
            chain_id: config.service.chain_id,
            session_cooldown_secs: config.service.session_cooldown_secs,
            ..config.ledger.clone()
        };
        let owner_addr = Address::from_public_key(&keys.owner.public_key());
        let ledger = Arc::new(LocalLedger::new(ledger_config, owner_addr, verifier, stores.sessions));

        let retry = RetryPolicy::from_config(&config.service);
        let owner = Arc::new(TransactionSubmissionManager::new(ledger.clone(), keys.owner, retry.clone()));
        let platform = Arc::new(TransactionSubmissionManager::new(
            ledger.clone(),
            keys.platform,
            retry.clone(),
        ));

        // Genesis.
        let modules = Arc::new(ModuleCatalog::new());
        for (module_id, policy) in &config.modules {
            owner
                .submit(LedgerCall::AddValidModule {
                    module_id: module_id.clone(),
                    policy: *policy,
                })
                .await?;
            modules.register(module_id.clone(), *policy);
        }
        let achievements = Arc::new(AchievementCatalog::new());
        for (achievement_type, policy) in &config.achievement_types {
            owner
                .submit(LedgerCall::AddAchievementType {
                    achievement_type: achievement_type.clone(),
                    policy: *policy,
                })
                .await?;
            achievements.register(achievement_type.clone(), *policy);
        }
        owner
            .submit(LedgerCall::AddPlatformMinter {
                minter: platform.address(),
            })
            .await?;

        let mut validators = Vec::with_capacity(keys.validators.len());
        for key in keys.validators {
            let client = Arc::new(TransactionSubmissionManager::new(ledger.clone(), key, retry.clone()));
            owner
                .submit(LedgerCall::AddValidator {
                    validator: client.address(),
                })
                .await?;
            validators.push(LedgerSessions::new(client));
        }

        let adapter = Arc::new(ProofVerifierAdapter::new(
            ledger.clone(),
            platform.address(),
            params,
            stores.nullifiers,
            config.service.rate_limit_window(),
        ));
        let auth = Arc::new(AuthorizationLayer::new(
            config.service.chain_id,
            ledger.registry_address(),
            platform.address(),
            stores.nonces,
            config.service.challenge_ttl(),
        ));
        auth.add_platform_signer(platform.address());

        let minter = CredentialMinter::new(modules, achievements, adapter.clone(), auth.clone(), platform.clone());
        let binder = ProofBinder::new(Arc::new(artifact), config.service.proving_workers());

        info!(
            chain_id = config.service.chain_id,
            platform = %platform.address(),
            validators = validators.len(),
            block = ledger.block_number(),
            "devnet ready"
        );
        Ok(Self {
            sessions: LedgerSessions::new(platform.clone()),
            ledger,
            binder,
            adapter,
            auth,
            minter,
            platform,
            owner,
            validators,
        })
    }

    pub fn platform_address(&self) -> Address {
        self.platform.address()
    }

    /// Create a session for `student` and collect votes until it is
    /// verified or every validator has voted.
    pub async fn certify(
        &self,
        student: Address,
        module_id: &str,
        data_hash: [u8; 32],
        metrics: PrivateMetrics,
    ) -> ProtocolResult<LearningSession> {
        let session_id = self
            .sessions
            .create_session(
                student,
                module_id,
                data_hash,
                metrics.score,
                metrics.time_spent_seconds,
                metrics.attempts,
            )
            .await?;
        for validator in &self.validators {
            match validator.approve(&session_id, true).await? {
                ApprovalResult::Verified { .. } | ApprovalResult::AlreadyVerified => break,
                _ => {}
            }
        }
        self.sessions.get(&session_id).await
    }

    /// Prove `session`'s own metrics against `policy`.
    pub async fn prove(
        &self,
        session: &LearningSession,
        policy: ProofPolicy,
        purpose: ProofPurpose,
    ) -> ProtocolResult<ZkProof> {
        self.binder
            .bind_and_prove(session, PrivateMetrics::of_session(session), policy, purpose)
            .await
    }

    /// The student's side of a self-service mint: fetch a challenge for
    /// `request` and sign it.
    pub fn self_service(&self, student: &Keypair, request: &AchievementRequest) -> ProtocolResult<MintAuthorization> {
        let scope = request.scope_for(Address::from_public_key(&student.public_key()));
        let challenge = self.auth.issue_challenge(&scope)?;
        Ok(MintAuthorization::SelfService(SelfServiceAuth::sign(student, &challenge)))
    }

    pub fn platform_authorization(&self) -> MintAuthorization {
        MintAuthorization::Platform {
            signer: self.platform.address(),
        }
    }

    /// Module balance as the ledger reports it.
    pub async fn module_balance(&self, owner: Address, module_id: &str) -> ProtocolResult<u64> {
        let call = LedgerCall::ModuleBalance {
            owner,
            module_id: module_id.to_string(),
        };
        match self.platform.call(&call).await {
            Ok(CallOutput::Balance(b)) => Ok(b),
            Ok(other) => Err(ProtocolError::MintRejected(format!("unexpected balance output {other:?}"))),
            Err(e) => Err(ProtocolError::TransactionFailed {
                attempts: 1,
                reason: e.to_string(),
            }),
        }
    }
}
