//! # Protocol Errors
//!
//! One taxonomy for the whole pipeline. Every variant belongs to exactly one
//! [`Stage`], and its message starts with that stage, so a caller can tell
//! "your learning claim wasn't approved yet" from "your proof was rejected"
//! from "you aren't authorized to mint this" without matching on variants.
//!
//! Retry policy is encoded here too: [`ProtocolError::is_retryable`] is the
//! single answer to "should anything ever try this again".

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::identity::Address;
use crate::ledger::TxId;
use crate::session::SessionId;
use crate::storage::StoreError;
use crate::zkp::ProofId;

/// The pipeline stage an error originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    SessionConsensus,
    ProofGeneration,
    ProofVerification,
    Authorization,
    Minting,
    Submission,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::SessionConsensus => "session consensus",
            Stage::ProofGeneration => "proof generation",
            Stage::ProofVerification => "proof verification",
            Stage::Authorization => "authorization",
            Stage::Minting => "minting",
            Stage::Submission => "submission",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{stage}: module '{module_id}' is not on the allow-list")]
    InvalidModule { module_id: String, stage: Stage },

    #[error("minting: achievement type '{0}' is not on the allow-list")]
    InvalidAchievementType(String),

    #[error("session consensus: session {0} not found")]
    SessionNotFound(SessionId),

    #[error("session consensus: an identical claim {existing} was submitted within the cooldown window")]
    DuplicateSession { existing: SessionId },

    #[error("session consensus: {0} is not in the validator set")]
    UnknownValidator(Address),

    /// Informational: the session had already crossed its threshold.
    #[error("session consensus: session {0} is already verified")]
    AlreadyVerified(SessionId),

    #[error("session consensus: session {session_id} has {approvals} of {required} approvals")]
    InsufficientApprovals {
        session_id: SessionId,
        approvals: u32,
        required: u32,
    },

    #[error("proof generation: constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("proof generation: prover failed: {0}")]
    ProvingFailed(String),

    #[error("proof verification: invalid proof: {0}")]
    InvalidProof(String),

    #[error("proof verification: proof {0} has already been used")]
    DuplicateProof(ProofId),

    #[error("proof verification: rate limited, retry after {}ms", .retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("authorization: signature mismatch: {0}")]
    SignatureMismatch(String),

    #[error("authorization: challenge expired or already used: {0}")]
    ExpiredChallenge(String),

    #[error("authorization: {0} is not an authorized platform signer")]
    UnauthorizedSigner(Address),

    #[error("minting: ledger rejected the mint: {0}")]
    MintRejected(String),

    #[error("submission: transaction failed after {attempts} attempt(s): {reason}")]
    TransactionFailed { attempts: u32, reason: String },

    /// The last attempt is still in the pool and may yet be included.
    #[error("submission: transaction {tx_id} still pending after {attempts} attempt(s)")]
    SubmissionPending { attempts: u32, tx_id: TxId },

    #[error("{stage}: storage error: {source}")]
    Storage {
        stage: Stage,
        #[source]
        source: StoreError,
    },
}

impl ProtocolError {
    pub fn stage(&self) -> Stage {
        match self {
            ProtocolError::InvalidModule { stage, .. } | ProtocolError::Storage { stage, .. } => {
                *stage
            }
            ProtocolError::SessionNotFound(_)
            | ProtocolError::DuplicateSession { .. }
            | ProtocolError::UnknownValidator(_)
            | ProtocolError::AlreadyVerified(_)
            | ProtocolError::InsufficientApprovals { .. } => Stage::SessionConsensus,
            ProtocolError::ConstraintViolation(_) | ProtocolError::ProvingFailed(_) => {
                Stage::ProofGeneration
            }
            ProtocolError::InvalidProof(_)
            | ProtocolError::DuplicateProof(_)
            | ProtocolError::RateLimited { .. } => Stage::ProofVerification,
            ProtocolError::SignatureMismatch(_)
            | ProtocolError::ExpiredChallenge(_)
            | ProtocolError::UnauthorizedSigner(_) => Stage::Authorization,
            ProtocolError::InvalidAchievementType(_) | ProtocolError::MintRejected(_) => {
                Stage::Minting
            }
            ProtocolError::TransactionFailed { .. } | ProtocolError::SubmissionPending { .. } => {
                Stage::Submission
            }
        }
    }

    /// Whether the same request may succeed if tried again later.
    ///
    /// Dishonest input and logic errors (`ConstraintViolation`,
    /// `InvalidProof`, `SignatureMismatch`, `DuplicateProof`) never are.
    /// Fee-related submission failures are already retried inside the
    /// submission manager, so a surfaced `TransactionFailed` is final too.
    /// `SubmissionPending` is not retryable either: resubmitting could
    /// land the same call twice.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::RateLimited { .. }
                | ProtocolError::InsufficientApprovals { .. }
                | ProtocolError::Storage { .. }
        )
    }

    /// Retry-after hint for rate-limited callers.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ProtocolError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub(crate) fn storage(stage: Stage) -> impl FnOnce(StoreError) -> ProtocolError {
        move |source| ProtocolError::Storage { stage, source }
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_names_stage() {
        let err = ProtocolError::ConstraintViolation("score 70 below minimum 80".into());
        assert_eq!(err.stage(), Stage::ProofGeneration);
        assert!(err.to_string().starts_with("proof generation:"));

        let err = ProtocolError::SignatureMismatch("recovered signer differs".into());
        assert!(err.to_string().starts_with("authorization:"));

        let err = ProtocolError::InvalidModule {
            module_id: "x".into(),
            stage: Stage::Minting,
        };
        assert!(err.to_string().starts_with("minting:"));

        let err = ProtocolError::SubmissionPending {
            attempts: 3,
            tx_id: TxId([7u8; 32]),
        };
        assert_eq!(err.stage(), Stage::Submission);
        assert!(err.to_string().starts_with("submission:"));
    }

    #[test]
    fn test_terminal_errors_are_not_retryable() {
        let terminal = [
            ProtocolError::ConstraintViolation(String::new()),
            ProtocolError::InvalidProof(String::new()),
            ProtocolError::SignatureMismatch(String::new()),
            ProtocolError::DuplicateProof(ProofId::from_bytes([0u8; 32])),
            ProtocolError::TransactionFailed {
                attempts: 3,
                reason: "underpriced".into(),
            },
            ProtocolError::SubmissionPending {
                attempts: 3,
                tx_id: TxId([7u8; 32]),
            },
        ];
        for err in terminal {
            assert!(!err.is_retryable(), "{err} must not be retryable");
        }
    }

    #[test]
    fn test_rate_limited_carries_hint() {
        let err = ProtocolError::RateLimited {
            retry_after: Duration::from_secs(12),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
        assert!(err.to_string().contains("12000ms"));
    }
}
