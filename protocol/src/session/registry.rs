//! # Session Registry
//!
//! Creates sessions from raw claims and collects validator votes until a
//! session is verified.
//!
//! ## Concurrency
//!
//! Every mutation of a session happens under that session's own mutex,
//! held across the read-modify-write against the store. Claims are
//! serialized the same way on their `(student, module, data)` key, which
//! makes the cooldown check and the insert a single step.
//!
//! The locks are `parking_lot` mutexes: nothing in here awaits, and the
//! store calls are short and synchronous.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::catalog::ModuleCatalog;
use super::store::{ClaimRecord, SessionStore};
use super::{claim_key, ApprovalResult, LearningSession, SessionId};
use crate::config::SESSION_COOLDOWN;
use crate::crypto::hash::Hash32;
use crate::error::{ProtocolError, ProtocolResult, Stage};
use crate::identity::{Address, ValidatorId};

pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    catalog: Arc<ModuleCatalog>,
    validators: RwLock<BTreeSet<ValidatorId>>,
    cooldown: Duration,
    key_locks: DashMap<Hash32, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, catalog: Arc<ModuleCatalog>) -> Self {
        Self {
            store,
            catalog,
            validators: RwLock::new(BTreeSet::new()),
            cooldown: SESSION_COOLDOWN,
            key_locks: DashMap::new(),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_validators<I: IntoIterator<Item = ValidatorId>>(self, validators: I) -> Self {
        self.validators.write().extend(validators);
        self
    }

    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        &self.catalog
    }

    // -- Validator set ------------------------------------------------------

    pub fn add_validator(&self, validator: ValidatorId) -> bool {
        let added = self.validators.write().insert(validator);
        if added {
            info!(validator = %validator, "validator added");
        }
        added
    }

    pub fn is_validator(&self, validator: &ValidatorId) -> bool {
        self.validators.read().contains(validator)
    }

    pub fn validators(&self) -> Vec<ValidatorId> {
        self.validators.read().iter().copied().collect()
    }

    // -- Operations ---------------------------------------------------------

    /// Register a new claim. See [`create_session_at`](Self::create_session_at).
    pub fn create_session(
        &self,
        student: Address,
        module_id: &str,
        data_hash: Hash32,
        score: u32,
        time_spent_seconds: u32,
        attempts: u32,
    ) -> ProtocolResult<SessionId> {
        self.create_session_at(
            student,
            module_id,
            data_hash,
            score,
            time_spent_seconds,
            attempts,
            Utc::now(),
        )
    }

    /// Register a new claim at an explicit time.
    ///
    /// Fails with `InvalidModule` for modules off the allow-list and with
    /// `DuplicateSession` when the same `(student, module, data)` claim was
    /// made less than the cooldown ago.
    #[allow(clippy::too_many_arguments)]
    pub fn create_session_at(
        &self,
        student: Address,
        module_id: &str,
        data_hash: Hash32,
        score: u32,
        time_spent_seconds: u32,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> ProtocolResult<SessionId> {
        let policy = self
            .catalog
            .policy(module_id)
            .ok_or_else(|| ProtocolError::InvalidModule {
                module_id: module_id.to_string(),
                stage: Stage::SessionConsensus,
            })?;

        let claim = claim_key(&student, module_id, &data_hash);
        let lock = self.lock_for(claim);
        let _guard = lock.lock();

        if let Some(previous) = self.store.last_claim(&claim).map_err(storage_err)? {
            if self.within_cooldown(previous.created_at, now) {
                warn!(
                    student = %student,
                    module_id,
                    existing = %previous.session_id,
                    "duplicate session claim inside cooldown"
                );
                return Err(ProtocolError::DuplicateSession {
                    existing: previous.session_id,
                });
            }
        }

        let session = LearningSession::new(
            student,
            module_id,
            data_hash,
            score,
            time_spent_seconds,
            attempts,
            policy.required_approvals,
            now,
        );
        let session_id = session.session_id;

        self.store.put(&session).map_err(storage_err)?;
        self.store
            .record_claim(
                &claim,
                &ClaimRecord {
                    session_id,
                    created_at: now,
                },
            )
            .map_err(storage_err)?;

        info!(
            session_id = %session_id,
            student = %student,
            module_id,
            required_approvals = policy.required_approvals,
            "learning session created"
        );
        Ok(session_id)
    }

    /// Record a validator's vote.
    ///
    /// Votes on a verified session return `AlreadyVerified` whoever casts
    /// them. Otherwise the voter must be in the validator set, and only its
    /// first vote counts.
    pub fn approve(
        &self,
        session_id: &SessionId,
        validator: &ValidatorId,
        vote: bool,
    ) -> ProtocolResult<ApprovalResult> {
        let lock = self.lock_for(*session_id.as_bytes());
        let _guard = lock.lock();

        let mut session = self
            .store
            .get(session_id)
            .map_err(storage_err)?
            .ok_or(ProtocolError::SessionNotFound(*session_id))?;

        if session.verified {
            debug!(session_id = %session_id, validator = %validator, "vote on verified session ignored");
            return Ok(ApprovalResult::AlreadyVerified);
        }

        if !self.is_validator(validator) {
            warn!(session_id = %session_id, validator = %validator, "vote from unknown validator");
            return Err(ProtocolError::UnknownValidator(*validator));
        }

        if session.has_voted(validator) {
            debug!(session_id = %session_id, validator = %validator, "duplicate vote");
            return Ok(ApprovalResult::Duplicate);
        }

        let result = if vote {
            session.approvals.insert(*validator);
            if session.threshold_reached() {
                session.verified = true;
                ApprovalResult::Verified {
                    approvals: session.approval_count(),
                }
            } else {
                ApprovalResult::Recorded {
                    approvals: session.approval_count(),
                    required: session.required_approvals,
                }
            }
        } else {
            session.rejections.insert(*validator);
            ApprovalResult::Rejected {
                rejections: session.rejections.len() as u32,
            }
        };

        self.store.put(&session).map_err(storage_err)?;

        match result {
            ApprovalResult::Verified { approvals } => info!(
                session_id = %session_id,
                approvals,
                required = session.required_approvals,
                "learning session verified"
            ),
            _ => debug!(session_id = %session_id, validator = %validator, vote, ?result, "vote recorded"),
        }
        Ok(result)
    }

    pub fn is_verified(&self, session_id: &SessionId) -> ProtocolResult<bool> {
        Ok(self.get(session_id)?.verified)
    }

    pub fn get(&self, session_id: &SessionId) -> ProtocolResult<LearningSession> {
        self.store
            .get(session_id)
            .map_err(storage_err)?
            .ok_or(ProtocolError::SessionNotFound(*session_id))
    }

    fn lock_for(&self, key: Hash32) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn within_cooldown(&self, previous: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - previous).to_std() {
            Ok(elapsed) => elapsed < self.cooldown,
            // Clock went backwards: treat as inside the window.
            Err(_) => true,
        }
    }
}

fn storage_err(e: crate::storage::StoreError) -> ProtocolError {
    ProtocolError::storage(Stage::SessionConsensus)(e)
}
