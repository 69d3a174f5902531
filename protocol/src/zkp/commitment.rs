//! # Outcome Commitment
//!
//! The commitment every learning-outcome proof opens:
//!
//! ```text
//! c = score·g_score + time·g_time + attempts·g_attempts
//!   + student·g_student + session·g_session + purpose·g_purpose
//!   + r·h                                        (mod p, in Fr)
//! ```
//!
//! It is a scalar-field commitment so the circuit checks it with native Fr
//! arithmetic, one multiplication per term.
//!
//! ## Generators
//!
//! Derived with domain-separated hash-to-field from fixed labels, so nobody
//! knows a relation between them and every party derives the same set
//! without a ceremony.
//!
//! ## Blinding
//!
//! `r` is derived from the session's `data_hash` and id and travels as a
//! public input. The binder, the verifier adapter and the registry contract
//! all recompute it from the stored session record; a proof whose blinding
//! or commitment differs is rejected before any pairing check.

use ark_bn254::Fr;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};

use super::proof::ProofPurpose;
use crate::crypto::hash::{domain_separated_field, Hash32};
use crate::session::{LearningSession, SessionId};

const GENERATOR_CONTEXT: &str = "accredit outcome commitment generator v1";
const BLINDING_CONTEXT: &str = "accredit outcome commitment blinding v1";

/// Scalar generators of the outcome commitment.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct CommitmentParams {
    pub g_score: Fr,
    pub g_time: Fr,
    pub g_attempts: Fr,
    pub g_student: Fr,
    pub g_session: Fr,
    pub g_purpose: Fr,
    pub h: Fr,
}

impl Default for CommitmentParams {
    fn default() -> Self {
        Self::standard()
    }
}

impl CommitmentParams {
    /// The protocol-wide parameter set.
    pub fn standard() -> Self {
        let g = |label: &str| domain_separated_field(GENERATOR_CONTEXT, label.as_bytes());
        Self {
            g_score: g("score"),
            g_time: g("time_spent_seconds"),
            g_attempts: g("attempts"),
            g_student: g("student"),
            g_session: g("session"),
            g_purpose: g("purpose"),
            h: g("blinding"),
        }
    }

    pub fn commit(&self, opening: &CommitmentOpening) -> Fr {
        Fr::from(opening.score) * self.g_score
            + Fr::from(opening.time_spent_seconds) * self.g_time
            + Fr::from(opening.attempts) * self.g_attempts
            + opening.student * self.g_student
            + opening.session * self.g_session
            + opening.purpose.field_element() * self.g_purpose
            + opening.blinding * self.h
    }

    /// The commitment a proof for `session` and `purpose` must carry.
    pub fn session_commitment(&self, session: &LearningSession, purpose: ProofPurpose) -> Fr {
        self.commit(&CommitmentOpening::for_session(session, purpose))
    }
}

/// Everything a commitment commits to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitmentOpening {
    pub score: u32,
    pub time_spent_seconds: u32,
    pub attempts: u32,
    pub student: Fr,
    pub session: Fr,
    pub purpose: ProofPurpose,
    pub blinding: Fr,
}

impl CommitmentOpening {
    pub fn for_session(session: &LearningSession, purpose: ProofPurpose) -> Self {
        Self {
            score: session.score,
            time_spent_seconds: session.time_spent_seconds,
            attempts: session.attempts,
            student: session.student.field_element(),
            session: session.session_id.field_element(),
            purpose,
            blinding: session_blinding(&session.session_id, &session.data_hash),
        }
    }
}

/// Deterministic blinding factor for a session.
pub fn session_blinding(session_id: &SessionId, data_hash: &Hash32) -> Fr {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(session_id.as_bytes());
    preimage[32..].copy_from_slice(data_hash);
    domain_separated_field(BLINDING_CONTEXT, &preimage)
}
