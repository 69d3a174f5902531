//! Session consensus against a ledger-hosted registry.
//!
//! Same operations as [`super::SessionRegistry`], but every write is a
//! transaction from the submitter's account. For `approve`, that account
//! is the validator casting the vote.

use std::sync::Arc;

use tracing::info;

use super::{ApprovalResult, LearningSession, SessionId};
use crate::crypto::hash::Hash32;
use crate::error::{ProtocolError, ProtocolResult, Stage};
use crate::identity::{Address, ValidatorId};
use crate::ledger::{CallOutput, LedgerCall, LedgerError, LedgerEvent, TransactionSubmissionManager};

pub struct LedgerSessions {
    submitter: Arc<TransactionSubmissionManager>,
}

impl LedgerSessions {
    pub fn new(submitter: Arc<TransactionSubmissionManager>) -> Self {
        Self { submitter }
    }

    /// The account writes are sent from.
    pub fn account(&self) -> ValidatorId {
        self.submitter.address()
    }

    /// `createLearningSession`. The student is named explicitly so a
    /// platform relayer can open sessions on a student's behalf.
    pub async fn create_session(
        &self,
        student: Address,
        module_id: &str,
        data_hash: Hash32,
        score: u32,
        time_spent_seconds: u32,
        attempts: u32,
    ) -> ProtocolResult<SessionId> {
        let receipt = self
            .submitter
            .submit(LedgerCall::CreateLearningSession {
                student,
                module_id: module_id.to_string(),
                data_hash,
                score,
                time_spent_seconds,
                attempts,
            })
            .await
            .map_err(|e| e.into_protocol_error(Stage::SessionConsensus))?;

        let from_event = receipt.events.iter().find_map(|event| match event {
            LedgerEvent::LearningSessionCreated { session_id, .. } => Some(*session_id),
            _ => None,
        });
        let session_id = match (&receipt.output, from_event) {
            (CallOutput::SessionId(id), _) => *id,
            (_, Some(id)) => id,
            (other, None) => {
                return Err(ProtocolError::TransactionFailed {
                    attempts: 1,
                    reason: format!("createLearningSession returned {other:?}"),
                })
            }
        };
        info!(session_id = %session_id, student = %student, module_id, "session created on ledger");
        Ok(session_id)
    }

    /// `validateLearningSession`, voting as [`Self::account`].
    pub async fn approve(&self, session_id: &SessionId, approve: bool) -> ProtocolResult<ApprovalResult> {
        let receipt = self
            .submitter
            .submit(LedgerCall::ValidateLearningSession {
                session_id: *session_id,
                approve,
            })
            .await
            .map_err(|e| e.into_protocol_error(Stage::SessionConsensus))?;
        match receipt.output {
            CallOutput::Approval(result) => Ok(result),
            other => Err(ProtocolError::TransactionFailed {
                attempts: 1,
                reason: format!("validateLearningSession returned {other:?}"),
            }),
        }
    }

    pub async fn get(&self, session_id: &SessionId) -> ProtocolResult<LearningSession> {
        match self.read(LedgerCall::GetLearningSession { session_id: *session_id }).await? {
            CallOutput::Session(session) => Ok(*session),
            other => Err(unexpected("getLearningSession", other)),
        }
    }

    pub async fn is_verified(&self, session_id: &SessionId) -> ProtocolResult<bool> {
        match self.read(LedgerCall::IsSessionVerified { session_id: *session_id }).await? {
            CallOutput::Bool(verified) => Ok(verified),
            other => Err(unexpected("isSessionVerified", other)),
        }
    }

    async fn read(&self, call: LedgerCall) -> ProtocolResult<CallOutput> {
        self.submitter.call(&call).await.map_err(|e| match e {
            LedgerError::Reverted(reason) => reason.into_protocol_error(Stage::SessionConsensus),
            other => ProtocolError::TransactionFailed {
                attempts: 1,
                reason: other.to_string(),
            },
        })
    }
}

fn unexpected(method: &str, output: CallOutput) -> ProtocolError {
    ProtocolError::TransactionFailed {
        attempts: 1,
        reason: format!("{method} returned {output:?}"),
    }
}
