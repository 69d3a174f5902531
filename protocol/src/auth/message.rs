//! The structured message a student signs to authorize a mint.
//!
//! ```text
//! digest = BLAKE3-derive-key("accredit mint authorization v1",
//!     chain_id ‖ contract ‖ caller ‖ student ‖ kind ‖ lp(target id)
//!     ‖ n ‖ content_hash_1 ‖ … ‖ content_hash_n ‖ score ‖ expiry ‖ lp(nonce))
//! ```
//!
//! Integers are little-endian, `lp` is a u64 length prefix, and expiry is
//! `0` for none or `1 ‖ millis`. Binding the chain, contract and caller
//! stops a signature from being replayed on another deployment or through
//! another relayer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::hash::{blake3_hash, domain_separated_hash, length_prefixed, Hash32};
use crate::identity::Address;
use crate::ledger::{MintParams, MintTarget};

const MINT_MESSAGE_CONTEXT: &str = "accredit mint authorization v1";

/// Everything about a mint the student consents to, minus the
/// deployment-specific parts the authorization layer fills in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintScope {
    pub student: Address,
    pub target: MintTarget,
    pub content_hashes: Vec<Hash32>,
    pub score: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

impl MintScope {
    pub fn from_params(params: &MintParams) -> Self {
        Self {
            student: params.student,
            target: params.target.clone(),
            content_hashes: params.content_hashes.clone(),
            score: params.score,
            expires_at: params.expires_at,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MintIntent<'a> {
    pub chain_id: u64,
    pub contract: &'a Address,
    pub caller: &'a Address,
    pub scope: &'a MintScope,
    pub nonce: &'a str,
}

pub fn mint_message_digest(intent: &MintIntent<'_>) -> Hash32 {
    let scope = intent.scope;
    let mut buf = Vec::with_capacity(256 + 32 * scope.content_hashes.len());
    buf.extend_from_slice(&intent.chain_id.to_le_bytes());
    buf.extend_from_slice(intent.contract.key_hash());
    buf.extend_from_slice(intent.caller.key_hash());
    buf.extend_from_slice(scope.student.key_hash());
    buf.push(scope.target.kind_tag());
    buf.extend_from_slice(&length_prefixed(scope.target.id().as_bytes()));
    buf.extend_from_slice(&(scope.content_hashes.len() as u64).to_le_bytes());
    for hash in &scope.content_hashes {
        buf.extend_from_slice(hash);
    }
    buf.extend_from_slice(&scope.score.to_le_bytes());
    match scope.expires_at {
        Some(at) => {
            buf.push(1);
            buf.extend_from_slice(&at.timestamp_millis().to_le_bytes());
        }
        None => buf.push(0),
    }
    buf.extend_from_slice(&length_prefixed(intent.nonce.as_bytes()));
    domain_separated_hash(MINT_MESSAGE_CONTEXT, &buf)
}

/// BLAKE3 of title, description and metadata URI, in that order. Modules
/// have no title or description, so only the URI is hashed.
pub fn content_hashes(target: &MintTarget, metadata_uri: &str) -> Vec<Hash32> {
    match target {
        MintTarget::Module { .. } => vec![blake3_hash(metadata_uri.as_bytes())],
        MintTarget::Achievement {
            title, description, ..
        } => vec![
            blake3_hash(title.as_bytes()),
            blake3_hash(description.as_bytes()),
            blake3_hash(metadata_uri.as_bytes()),
        ],
    }
}
