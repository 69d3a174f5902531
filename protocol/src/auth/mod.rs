//! # Authorization Layer
//!
//! Every mint is authorized one of two ways, chosen explicitly per request:
//!
//! - **Self-service**: the student signs a one-shot challenge bound to the
//!   exact mint (chain, contract, relayer, target, content, score, expiry,
//!   nonce). The signer's address must be the student's, and the nonce must
//!   never have been used.
//! - **Platform-issued**: no student signature, but the caller must be on
//!   the platform-signer allow-list (narrower than the validator set) and
//!   is recorded as the minting authority.
//!
//! The two never mix. A platform signer cannot present a student's
//! authorization, and a student signature never grants platform authority.
//!
//! ```text
//! challenge.rs: Challenge, NonceStore (in-memory and sled)
//! message.rs  : MintScope, MintIntent, mint_message_digest
//! ```

pub mod challenge;
pub mod message;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crypto::hash::Hash32;
use crate::crypto::{Keypair, PublicKey, Signature};
use crate::error::{ProtocolError, ProtocolResult, Stage};
use crate::identity::Address;

pub use challenge::{Challenge, ConsumeOutcome, InMemoryNonceStore, NonceStore, SledNonceStore};
pub use message::{content_hashes, mint_message_digest, MintIntent, MintScope};

/// The student's half of a self-service mint, also forwarded to the ledger
/// so the contract can check it independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfServiceAuth {
    pub nonce: String,
    pub public_key: PublicKey,
    pub signature: Signature,
}

impl SelfServiceAuth {
    /// Sign an issued challenge. Runs on the student's side.
    pub fn sign(keypair: &Keypair, challenge: &Challenge) -> Self {
        Self {
            nonce: challenge.nonce.clone(),
            public_key: keypair.public_key(),
            signature: keypair.sign(&challenge.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MintAuthorization {
    SelfService(SelfServiceAuth),
    Platform { signer: Address },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationPath {
    SelfService,
    Platform,
}

/// Result of a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedMint {
    /// The minting authority of record.
    pub authority: Address,
    pub path: AuthorizationPath,
    /// What the ledger needs to re-check a self-service mint.
    pub ledger_auth: Option<SelfServiceAuth>,
}

pub struct AuthorizationLayer {
    chain_id: u64,
    contract: Address,
    relayer: Address,
    nonces: Arc<dyn NonceStore>,
    platform_signers: RwLock<BTreeSet<Address>>,
    challenge_ttl: Duration,
}

impl AuthorizationLayer {
    /// `relayer` is the account that submits mint transactions; it is the
    /// `caller` every signed message is bound to.
    pub fn new(
        chain_id: u64,
        contract: Address,
        relayer: Address,
        nonces: Arc<dyn NonceStore>,
        challenge_ttl: Duration,
    ) -> Self {
        Self {
            chain_id,
            contract,
            relayer,
            nonces,
            platform_signers: RwLock::new(BTreeSet::new()),
            challenge_ttl,
        }
    }

    pub fn add_platform_signer(&self, signer: Address) -> bool {
        self.platform_signers.write().insert(signer)
    }

    pub fn is_platform_signer(&self, signer: &Address) -> bool {
        self.platform_signers.read().contains(signer)
    }

    /// The digest a student signs for `scope` under `nonce`.
    pub fn digest(&self, scope: &MintScope, nonce: &str) -> Hash32 {
        mint_message_digest(&MintIntent {
            chain_id: self.chain_id,
            contract: &self.contract,
            caller: &self.relayer,
            scope,
            nonce,
        })
    }

    pub fn issue_challenge(&self, scope: &MintScope) -> ProtocolResult<Challenge> {
        self.issue_challenge_at(scope, Utc::now())
    }

    pub fn issue_challenge_at(&self, scope: &MintScope, now: DateTime<Utc>) -> ProtocolResult<Challenge> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let ttl = chrono::Duration::from_std(self.challenge_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
        let challenge = Challenge {
            message: self.digest(scope, &nonce).to_vec(),
            nonce,
            expires_at: now + ttl,
        };
        self.nonces
            .issue(&challenge)
            .map_err(ProtocolError::storage(Stage::Authorization))?;
        info!(
            student = %scope.student,
            target = scope.target.id(),
            nonce = %challenge.nonce,
            expires_at = %challenge.expires_at,
            "challenge issued"
        );
        Ok(challenge)
    }

    pub fn authorize(&self, scope: &MintScope, authorization: &MintAuthorization) -> ProtocolResult<AuthorizedMint> {
        self.authorize_at(scope, authorization, Utc::now())
    }

    pub fn authorize_at(
        &self,
        scope: &MintScope,
        authorization: &MintAuthorization,
        now: DateTime<Utc>,
    ) -> ProtocolResult<AuthorizedMint> {
        match authorization {
            MintAuthorization::SelfService(auth) => self.authorize_self_service(scope, auth, now),
            MintAuthorization::Platform { signer } => self.authorize_platform(scope, signer),
        }
    }

    fn authorize_self_service(
        &self,
        scope: &MintScope,
        auth: &SelfServiceAuth,
        now: DateTime<Utc>,
    ) -> ProtocolResult<AuthorizedMint> {
        let signer = Address::from_public_key(&auth.public_key);
        if signer != scope.student {
            warn!(signer = %signer, student = %scope.student, "self-service signer is not the student");
            return Err(ProtocolError::SignatureMismatch(format!(
                "signed by {signer}, mint is for {}",
                scope.student
            )));
        }

        let digest = self.digest(scope, &auth.nonce);
        if !auth.public_key.verify(&digest, &auth.signature) {
            return Err(ProtocolError::SignatureMismatch(
                "signature does not cover this mint".to_string(),
            ));
        }

        let outcome = self
            .nonces
            .consume(&auth.nonce, &digest, now)
            .map_err(ProtocolError::storage(Stage::Authorization))?;
        match outcome {
            ConsumeOutcome::Consumed => {}
            ConsumeOutcome::MessageMismatch => {
                return Err(ProtocolError::SignatureMismatch(format!(
                    "challenge {} was issued for a different mint",
                    auth.nonce
                )))
            }
            ConsumeOutcome::Unknown | ConsumeOutcome::AlreadyUsed | ConsumeOutcome::Expired => {
                return Err(ProtocolError::ExpiredChallenge(format!(
                    "{} ({outcome:?})",
                    auth.nonce
                )))
            }
        }

        info!(student = %scope.student, nonce = %auth.nonce, "self-service mint authorized");
        Ok(AuthorizedMint {
            authority: signer,
            path: AuthorizationPath::SelfService,
            ledger_auth: Some(auth.clone()),
        })
    }

    fn authorize_platform(&self, scope: &MintScope, signer: &Address) -> ProtocolResult<AuthorizedMint> {
        if !self.is_platform_signer(signer) || *signer != self.relayer {
            warn!(signer = %signer, "mint attempted by a non-platform signer");
            return Err(ProtocolError::UnauthorizedSigner(*signer));
        }
        info!(
            authority = %signer,
            student = %scope.student,
            target = scope.target.id(),
            "platform-issued mint authorized"
        );
        Ok(AuthorizedMint {
            authority: *signer,
            path: AuthorizationPath::Platform,
            ledger_auth: None,
        })
    }
}
