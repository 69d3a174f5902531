//! Session persistence.
//!
//! The registry talks to a [`SessionStore`] and nothing else, so the same
//! consensus code runs against a `DashMap` in tests and against sled in a
//! long-running node.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{LearningSession, SessionId};
use crate::crypto::hash::Hash32;
use crate::storage::db::{get_typed, put_typed};
use crate::storage::{AccreditDb, StoreResult};

/// Most recent session for a `(student, module, data)` claim key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
}

/// Durable key -> record map of learning sessions.
///
/// Implementations only need single-key atomicity; the registry serializes
/// writers per key itself.
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &SessionId) -> StoreResult<Option<LearningSession>>;

    fn put(&self, session: &LearningSession) -> StoreResult<()>;

    fn last_claim(&self, claim_key: &Hash32) -> StoreResult<Option<ClaimRecord>>;

    fn record_claim(&self, claim_key: &Hash32, record: &ClaimRecord) -> StoreResult<()>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<SessionId, LearningSession>,
    claims: DashMap<Hash32, ClaimRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &SessionId) -> StoreResult<Option<LearningSession>> {
        Ok(self.sessions.get(id).map(|s| s.clone()))
    }

    fn put(&self, session: &LearningSession) -> StoreResult<()> {
        self.sessions.insert(session.session_id, session.clone());
        Ok(())
    }

    fn last_claim(&self, claim_key: &Hash32) -> StoreResult<Option<ClaimRecord>> {
        Ok(self.claims.get(claim_key).map(|c| *c))
    }

    fn record_claim(&self, claim_key: &Hash32, record: &ClaimRecord) -> StoreResult<()> {
        self.claims.insert(*claim_key, *record);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// sled
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SledSessionStore {
    db: AccreditDb,
}

impl SledSessionStore {
    pub fn new(db: AccreditDb) -> Self {
        Self { db }
    }
}

impl SessionStore for SledSessionStore {
    fn get(&self, id: &SessionId) -> StoreResult<Option<LearningSession>> {
        get_typed(self.db.sessions(), id.as_bytes())
    }

    fn put(&self, session: &LearningSession) -> StoreResult<()> {
        put_typed(self.db.sessions(), session.session_id.as_bytes(), session)
    }

    fn last_claim(&self, claim_key: &Hash32) -> StoreResult<Option<ClaimRecord>> {
        get_typed(self.db.session_claims(), claim_key)
    }

    fn record_claim(&self, claim_key: &Hash32, record: &ClaimRecord) -> StoreResult<()> {
        put_typed(self.db.session_claims(), claim_key, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Address;

    fn sample() -> LearningSession {
        LearningSession::new(
            Address::from_key_hash([5u8; 32]),
            "python_basics_003",
            [9u8; 32],
            85,
            3500,
            3,
            1,
            Utc::now(),
        )
    }

    fn exercise(store: &dyn SessionStore) {
        let mut session = sample();
        assert_eq!(store.get(&session.session_id).unwrap(), None);

        store.put(&session).unwrap();
        assert_eq!(store.get(&session.session_id).unwrap().as_ref(), Some(&session));

        session.approvals.insert(Address::from_key_hash([1u8; 32]));
        session.verified = true;
        store.put(&session).unwrap();
        assert!(store.get(&session.session_id).unwrap().unwrap().verified);

        let record = ClaimRecord {
            session_id: session.session_id,
            created_at: session.created_at,
        };
        assert_eq!(store.last_claim(&[7u8; 32]).unwrap(), None);
        store.record_claim(&[7u8; 32], &record).unwrap();
        assert_eq!(store.last_claim(&[7u8; 32]).unwrap(), Some(record));
    }

    #[test]
    fn in_memory_store_roundtrip() {
        let store = InMemorySessionStore::new();
        exercise(&store);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn sled_store_roundtrip() {
        let store = SledSessionStore::new(AccreditDb::open_temporary().unwrap());
        exercise(&store);
    }

    #[test]
    fn sled_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let session = sample();
        {
            let db = AccreditDb::open(dir.path()).unwrap();
            SledSessionStore::new(db.clone()).put(&session).unwrap();
            db.flush().unwrap();
        }
        let store = SledSessionStore::new(AccreditDb::open(dir.path()).unwrap());
        assert_eq!(store.get(&session.session_id).unwrap(), Some(session));
    }
}
