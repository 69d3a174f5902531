//! Credential records as the ledger issues them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Address;
use crate::session::SessionId;
use crate::zkp::ProofId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CredentialId(pub u64);

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Achievement tier, derived from the proven score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl Tier {
    pub fn from_score(score: u32) -> Self {
        match score {
            95.. => Tier::Platinum,
            90..=94 => Tier::Gold,
            80..=89 => Tier::Silver,
            _ => Tier::Bronze,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialKind {
    /// Fungible: a module can be completed, and credited, more than once.
    Module {
        module_id: String,
        amount: u64,
        score: u32,
        session_id: SessionId,
    },
    /// Non-fungible: one token per successful mint.
    Achievement {
        achievement_type: String,
        tier: Tier,
        title: String,
        score: u32,
        expires_at: Option<DateTime<Utc>>,
        proof_id: ProofId,
    },
}

/// A minted credential. Immutable apart from `revoked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    /// Always the student; the platform never owns credentials.
    pub owner: Address,
    pub kind: CredentialKind,
    pub metadata_uri: String,
    /// Who authorized the mint: the student on the self-service path, the
    /// platform signer otherwise.
    pub authority: Address,
    pub minted_at: DateTime<Utc>,
    pub revoked: bool,
}

impl Credential {
    pub fn is_achievement(&self) -> bool {
        matches!(self.kind, CredentialKind::Achievement { .. })
    }

    pub fn score(&self) -> u32 {
        match &self.kind {
            CredentialKind::Module { score, .. } | CredentialKind::Achievement { score, .. } => *score,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match &self.kind {
            CredentialKind::Achievement {
                expires_at: Some(at),
                ..
            } => now >= *at,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(Tier::from_score(100), Tier::Platinum);
        assert_eq!(Tier::from_score(95), Tier::Platinum);
        assert_eq!(Tier::from_score(94), Tier::Gold);
        assert_eq!(Tier::from_score(90), Tier::Gold);
        assert_eq!(Tier::from_score(85), Tier::Silver);
        assert_eq!(Tier::from_score(79), Tier::Bronze);
        assert_eq!(Tier::from_score(0), Tier::Bronze);
    }

    #[test]
    fn test_achievement_expiry() {
        let now = Utc::now();
        let credential = Credential {
            id: CredentialId(1),
            owner: Address::from_key_hash([1u8; 32]),
            kind: CredentialKind::Achievement {
                achievement_type: "course_completion".into(),
                tier: Tier::Gold,
                title: "Python Basics".into(),
                score: 92,
                expires_at: Some(now),
                proof_id: ProofId::from_bytes([2u8; 32]),
            },
            metadata_uri: "ipfs://meta".into(),
            authority: Address::from_key_hash([1u8; 32]),
            minted_at: now,
            revoked: false,
        };
        assert!(credential.is_achievement());
        assert_eq!(credential.score(), 92);
        assert!(credential.is_expired(now));
        assert!(!credential.is_expired(now - chrono::Duration::seconds(1)));
    }
}
