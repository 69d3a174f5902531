//! Vocabulary shared by the ledger client and the ledger-resident contracts.
//!
//! Everything here is plain data with serde derives. The contracts crate
//! executes [`LedgerCall`]s and answers with [`CallOutput`]s, [`TxReceipt`]s
//! and [`LedgerEvent`]s; the protocol crate only ever builds and inspects
//! them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::SelfServiceAuth;
use crate::crypto::hash::Hash32;
use crate::error::{ProtocolError, Stage};
use crate::identity::Address;
use crate::mint::{Credential, CredentialId};
use crate::session::{ApprovalResult, LearningSession, ModulePolicy, SessionId};
use crate::zkp::{ProofId, ProofPolicy, ZkProof};

// ---------------------------------------------------------------------------
// TxId
// ---------------------------------------------------------------------------

/// `double_sha256` of a transaction's signable bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub Hash32);

impl TxId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({}..)", &self.to_hex()[..12])
    }
}

// ---------------------------------------------------------------------------
// Fees
// ---------------------------------------------------------------------------

/// Current fee market, per unit of gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeEstimate {
    pub base_fee: u64,
    pub priority_fee: u64,
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// What a mint is for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MintTarget {
    Module {
        module_id: String,
    },
    Achievement {
        achievement_type: String,
        title: String,
        description: String,
    },
}

impl MintTarget {
    /// The allow-listed identifier: module id or achievement type.
    pub fn id(&self) -> &str {
        match self {
            MintTarget::Module { module_id } => module_id,
            MintTarget::Achievement {
                achievement_type, ..
            } => achievement_type,
        }
    }

    pub fn kind_tag(&self) -> u8 {
        match self {
            MintTarget::Module { .. } => 1,
            MintTarget::Achievement { .. } => 2,
        }
    }
}

/// Arguments of `mintWithZkProof` besides the proof itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintParams {
    pub student: Address,
    pub session_id: SessionId,
    pub target: MintTarget,
    pub metadata_uri: String,
    /// BLAKE3 of title, description and metadata URI, in that order.
    pub content_hashes: Vec<Hash32>,
    pub score: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Every operation the ledger exposes. Reads go through `Ledger::call`,
/// writes through a signed [`super::LedgerTransaction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCall {
    // -- Session registry ----------------------------------------------------
    CreateLearningSession {
        student: Address,
        module_id: String,
        data_hash: Hash32,
        score: u32,
        time_spent_seconds: u32,
        attempts: u32,
    },
    /// Validator-only. The validator is the transaction sender.
    ValidateLearningSession {
        session_id: SessionId,
        approve: bool,
    },

    // -- Verifier ------------------------------------------------------------
    /// Pure pairing check, no side effects.
    VerifyProof {
        proof: ZkProof,
    },

    // -- Credential registry -------------------------------------------------
    MintWithZkProof {
        params: MintParams,
        proof: ZkProof,
        auth: Option<SelfServiceAuth>,
    },
    RevokeCredential {
        credential_id: CredentialId,
    },

    // -- Owner-only administration -------------------------------------------
    AddValidModule {
        module_id: String,
        policy: ModulePolicy,
    },
    AddAchievementType {
        achievement_type: String,
        policy: ProofPolicy,
    },
    AddPlatformMinter {
        minter: Address,
    },
    AddValidator {
        validator: Address,
    },

    // -- Reads ---------------------------------------------------------------
    IsSessionVerified {
        session_id: SessionId,
    },
    GetLearningSession {
        session_id: SessionId,
    },
    IsProofUsed {
        proof_id: ProofId,
    },
    IsNonceUsed {
        nonce: String,
    },
    GetCredential {
        credential_id: CredentialId,
    },
    ModuleBalance {
        owner: Address,
        module_id: String,
    },
}

impl LedgerCall {
    pub fn name(&self) -> &'static str {
        match self {
            LedgerCall::CreateLearningSession { .. } => "createLearningSession",
            LedgerCall::ValidateLearningSession { .. } => "validateLearningSession",
            LedgerCall::VerifyProof { .. } => "verifyProof",
            LedgerCall::MintWithZkProof { .. } => "mintWithZkProof",
            LedgerCall::RevokeCredential { .. } => "revokeCredential",
            LedgerCall::AddValidModule { .. } => "addValidModule",
            LedgerCall::AddAchievementType { .. } => "addAchievementType",
            LedgerCall::AddPlatformMinter { .. } => "addPlatformMinter",
            LedgerCall::AddValidator { .. } => "addValidator",
            LedgerCall::IsSessionVerified { .. } => "isSessionVerified",
            LedgerCall::GetLearningSession { .. } => "getLearningSession",
            LedgerCall::IsProofUsed { .. } => "isProofUsed",
            LedgerCall::IsNonceUsed { .. } => "isNonceUsed",
            LedgerCall::GetCredential { .. } => "getCredential",
            LedgerCall::ModuleBalance { .. } => "moduleBalance",
        }
    }

    /// Whether executing the call can change ledger state.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            LedgerCall::CreateLearningSession { .. }
                | LedgerCall::ValidateLearningSession { .. }
                | LedgerCall::MintWithZkProof { .. }
                | LedgerCall::RevokeCredential { .. }
                | LedgerCall::AddValidModule { .. }
                | LedgerCall::AddAchievementType { .. }
                | LedgerCall::AddPlatformMinter { .. }
                | LedgerCall::AddValidator { .. }
        )
    }
}

/// Return value of a call or a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutput {
    None,
    Bool(bool),
    SessionId(SessionId),
    Session(Box<LearningSession>),
    Approval(ApprovalResult),
    Credential(Box<Credential>),
    Balance(u64),
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    LearningSessionCreated {
        session_id: SessionId,
        student: Address,
        module_id: String,
    },
    ModuleCompleted {
        student: Address,
        module_id: String,
        amount: u64,
        score: u32,
        session_id: SessionId,
    },
    AchievementMinted {
        student: Address,
        token_id: CredentialId,
        achievement_type: String,
        title: String,
        score: u32,
    },
    CredentialRevoked {
        credential_id: CredentialId,
        revoked_by: Address,
    },
}

// ---------------------------------------------------------------------------
// Reverts
// ---------------------------------------------------------------------------

/// Why the ledger refused to execute a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RevertReason {
    #[error("module '{0}' is not valid")]
    InvalidModule(String),
    #[error("achievement type '{0}' is not valid")]
    InvalidAchievementType(String),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("identical session {0} exists within the cooldown window")]
    DuplicateSession(SessionId),
    #[error("session {0} is not verified")]
    SessionNotVerified(SessionId),
    #[error("{0} is not a validator")]
    NotValidator(Address),
    #[error("proof rejected: {0}")]
    InvalidProof(String),
    #[error("proof {0} already used")]
    ProofUsed(ProofId),
    #[error("nonce '{0}' already used")]
    NonceUsed(String),
    #[error("signature does not match the student")]
    BadSignature,
    #[error("{0} is not authorized")]
    Unauthorized(Address),
    #[error("credential {0} not found")]
    CredentialNotFound(CredentialId),
    #[error("out of gas")]
    OutOfGas,
    #[error("{0}")]
    Other(String),
}

impl RevertReason {
    /// Translate a contract revert into the pipeline's error taxonomy.
    /// `stage` is used where the same revert can come from several stages.
    pub fn into_protocol_error(self, stage: Stage) -> ProtocolError {
        match self {
            RevertReason::InvalidModule(module_id) => ProtocolError::InvalidModule { module_id, stage },
            RevertReason::InvalidAchievementType(t) => ProtocolError::InvalidAchievementType(t),
            RevertReason::SessionNotFound(id) => ProtocolError::SessionNotFound(id),
            RevertReason::DuplicateSession(existing) => ProtocolError::DuplicateSession { existing },
            RevertReason::SessionNotVerified(session_id) => ProtocolError::InsufficientApprovals {
                session_id,
                approvals: 0,
                required: 0,
            },
            RevertReason::NotValidator(addr) => ProtocolError::UnknownValidator(addr),
            RevertReason::InvalidProof(msg) => ProtocolError::InvalidProof(msg),
            RevertReason::ProofUsed(id) => ProtocolError::DuplicateProof(id),
            RevertReason::NonceUsed(nonce) => ProtocolError::ExpiredChallenge(nonce),
            RevertReason::BadSignature => {
                ProtocolError::SignatureMismatch("rejected by the ledger".to_string())
            }
            RevertReason::Unauthorized(addr) => ProtocolError::UnauthorizedSigner(addr),
            other @ (RevertReason::CredentialNotFound(_) | RevertReason::Other(_)) => {
                ProtocolError::MintRejected(other.to_string())
            }
            RevertReason::OutOfGas => ProtocolError::TransactionFailed {
                attempts: 1,
                reason: "out of gas".to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_id: TxId,
    pub status: ReceiptStatus,
    pub block_number: u64,
    pub gas_used: u64,
    pub effective_fee_per_gas: u64,
    pub output: CallOutput,
    pub events: Vec<LedgerEvent>,
    pub revert_reason: Option<RevertReason>,
}

impl TxReceipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from talking to the ledger, before any receipt exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("transaction underpriced: offered {offered}/gas, ledger requires {required}/gas")]
    Underpriced { offered: u64, required: u64 },

    #[error("replacement transaction underpriced for nonce {nonce}")]
    ReplacementUnderpriced { nonce: u64 },

    #[error("nonce too low: account is at {expected}, transaction used {got}")]
    NonceTooLow { expected: u64, got: u64 },

    #[error("no receipt for {0} before the deadline")]
    Timeout(TxId),

    #[error("invalid transaction signature")]
    InvalidSignature,

    #[error("wrong chain id {got}, ledger is {expected}")]
    WrongChain { expected: u64, got: u64 },

    /// A read-only call reverted.
    #[error("call reverted: {0}")]
    Reverted(RevertReason),

    #[error("transaction rejected: {0}")]
    Rejected(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Fee and timing problems that a fresh attempt with higher fees can fix.
    pub fn is_fee_related(&self) -> bool {
        matches!(
            self,
            LedgerError::Underpriced { .. }
                | LedgerError::ReplacementUnderpriced { .. }
                | LedgerError::Timeout(_)
        )
    }
}
