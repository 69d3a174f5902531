//! # Session Consensus
//!
//! A learning session is a student's claim that they completed a module
//! with a given score, time spent and attempt count. Validators vote on the
//! claim; once enough of them approve, the session is verified and becomes
//! the anchor every later proof must bind to.
//!
//! ```text
//! catalog.rs  : module allow-list and per-module policy
//! store.rs    : SessionStore trait (in-memory and sled backends)
//! registry.rs : SessionRegistry: create / approve / is_verified
//! client.rs   : LedgerSessions: the same operations against a ledger
//! ```
//!
//! ## State machine
//!
//! ```text
//! Created --(approvals accumulate)--> Verified (terminal)
//! ```
//!
//! There is no path back. `verified` flips inside the same critical section
//! as the vote that crosses the threshold, so two racing approvals can never
//! both observe "not yet verified" and both perform the transition.

pub mod catalog;
pub mod client;
pub mod registry;
pub mod store;

use std::collections::BTreeSet;
use std::fmt;

use ark_bn254::Fr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::hash::{domain_separated_field, domain_separated_hash_multi, length_prefixed, Hash32};
use crate::identity::{Address, ValidatorId};

pub use catalog::{ModuleCatalog, ModulePolicy};
pub use client::LedgerSessions;
pub use registry::SessionRegistry;
pub use store::{ClaimRecord, InMemorySessionStore, SessionStore, SledSessionStore};

const SESSION_ID_CONTEXT: &str = "accredit session id v1";
const SESSION_FIELD_CONTEXT: &str = "accredit session field element v1";
const CLAIM_KEY_CONTEXT: &str = "accredit session claim key v1";

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Deterministic, immutable identifier of a learning session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId([u8; 32]);

impl SessionId {
    /// Hash of `(student, module_id, data_hash, created_at)`.
    pub fn derive(
        student: &Address,
        module_id: &str,
        data_hash: &Hash32,
        created_at: DateTime<Utc>,
    ) -> Self {
        let module = length_prefixed(module_id.as_bytes());
        let millis = created_at.timestamp_millis().to_le_bytes();
        Self(domain_separated_hash_multi(
            SESSION_ID_CONTEXT,
            &[student.key_hash(), &module, data_hash, &millis],
        ))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Some(Self(bytes.as_slice().try_into().ok()?))
    }

    /// The identifier as a circuit public input.
    pub fn field_element(&self) -> Fr {
        domain_separated_field(SESSION_FIELD_CONTEXT, &self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}..)", &self.to_hex()[..12])
    }
}

/// Key of the duplicate-claim index: one entry per `(student, module, data)`.
pub fn claim_key(student: &Address, module_id: &str, data_hash: &Hash32) -> Hash32 {
    let module = length_prefixed(module_id.as_bytes());
    domain_separated_hash_multi(CLAIM_KEY_CONTEXT, &[student.key_hash(), &module, data_hash])
}

// ---------------------------------------------------------------------------
// LearningSession
// ---------------------------------------------------------------------------

/// A learning claim and its approval state.
///
/// Invariant: `verified == (approvals.len() >= required_approvals)`, and
/// once `verified` is true the record never changes again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearningSession {
    pub session_id: SessionId,
    pub student: Address,
    pub module_id: String,
    /// Hash of the raw activity data kept off-ledger.
    pub data_hash: Hash32,
    pub score: u32,
    pub time_spent_seconds: u32,
    pub attempts: u32,
    pub approvals: BTreeSet<ValidatorId>,
    pub rejections: BTreeSet<ValidatorId>,
    pub required_approvals: u32,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

impl LearningSession {
    /// A fresh session with no votes.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        student: Address,
        module_id: impl Into<String>,
        data_hash: Hash32,
        score: u32,
        time_spent_seconds: u32,
        attempts: u32,
        required_approvals: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        let module_id = module_id.into();
        Self {
            session_id: SessionId::derive(&student, &module_id, &data_hash, created_at),
            student,
            module_id,
            data_hash,
            score,
            time_spent_seconds,
            attempts,
            approvals: BTreeSet::new(),
            rejections: BTreeSet::new(),
            required_approvals,
            verified: false,
            created_at,
        }
    }

    pub fn approval_count(&self) -> u32 {
        self.approvals.len() as u32
    }

    pub fn has_voted(&self, validator: &ValidatorId) -> bool {
        self.approvals.contains(validator) || self.rejections.contains(validator)
    }

    pub fn threshold_reached(&self) -> bool {
        self.approval_count() >= self.required_approvals
    }
}

/// Outcome of a validator vote. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalResult {
    /// Approval counted; still below threshold.
    Recorded { approvals: u32, required: u32 },
    /// Rejection recorded. Rejections never un-verify anything.
    Rejected { rejections: u32 },
    /// This vote crossed the threshold.
    Verified { approvals: u32 },
    /// The validator had already voted; nothing changed.
    Duplicate,
    /// The session was verified before this vote arrived.
    AlreadyVerified,
}
