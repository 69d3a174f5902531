//! One-shot challenges for self-service mints.
//!
//! A challenge is issued for one specific mint message and can be consumed
//! exactly once. Consumption is an atomic remove, so two concurrent
//! requests presenting the same nonce cannot both succeed. Expired
//! challenges are consumed too; they never become valid again.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::storage::db::{decode, encode, encode_millis};
use crate::storage::{AccreditDb, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub nonce: String,
    /// The exact bytes the student must sign.
    pub message: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Consumed,
    Unknown,
    AlreadyUsed,
    Expired,
    /// The challenge was issued for a different message. It is consumed.
    MessageMismatch,
}

pub trait NonceStore: Send + Sync {
    fn issue(&self, challenge: &Challenge) -> StoreResult<()>;

    /// Atomically take the challenge for `nonce` and check it against
    /// `message` and `now`.
    fn consume(&self, nonce: &str, message: &[u8], now: DateTime<Utc>) -> StoreResult<ConsumeOutcome>;

    fn is_used(&self, nonce: &str) -> StoreResult<bool>;
}

fn judge(challenge: &Challenge, message: &[u8], now: DateTime<Utc>) -> ConsumeOutcome {
    if challenge.is_expired(now) {
        ConsumeOutcome::Expired
    } else if challenge.message != message {
        ConsumeOutcome::MessageMismatch
    } else {
        ConsumeOutcome::Consumed
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryNonceStore {
    open: DashMap<String, Challenge>,
    spent: DashMap<String, DateTime<Utc>>,
}

impl InMemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_challenges(&self) -> usize {
        self.open.len()
    }
}

impl NonceStore for InMemoryNonceStore {
    fn issue(&self, challenge: &Challenge) -> StoreResult<()> {
        self.open.insert(challenge.nonce.clone(), challenge.clone());
        Ok(())
    }

    fn consume(&self, nonce: &str, message: &[u8], now: DateTime<Utc>) -> StoreResult<ConsumeOutcome> {
        match self.open.remove(nonce) {
            Some((_, challenge)) => {
                self.spent.insert(nonce.to_string(), now);
                Ok(judge(&challenge, message, now))
            }
            None if self.spent.contains_key(nonce) => Ok(ConsumeOutcome::AlreadyUsed),
            None => Ok(ConsumeOutcome::Unknown),
        }
    }

    fn is_used(&self, nonce: &str) -> StoreResult<bool> {
        Ok(self.spent.contains_key(nonce))
    }
}

// ---------------------------------------------------------------------------
// Sled
// ---------------------------------------------------------------------------

/// Open challenges in `challenges`, consumed nonces in `spent_nonces`.
#[derive(Debug, Clone)]
pub struct SledNonceStore {
    db: AccreditDb,
}

impl SledNonceStore {
    pub fn new(db: AccreditDb) -> Self {
        Self { db }
    }
}

impl NonceStore for SledNonceStore {
    fn issue(&self, challenge: &Challenge) -> StoreResult<()> {
        self.db
            .challenges()
            .insert(challenge.nonce.as_bytes(), encode(challenge)?)?;
        Ok(())
    }

    fn consume(&self, nonce: &str, message: &[u8], now: DateTime<Utc>) -> StoreResult<ConsumeOutcome> {
        match self.db.challenges().remove(nonce.as_bytes())? {
            Some(bytes) => {
                self.db
                    .spent_nonces()
                    .insert(nonce.as_bytes(), &encode_millis(now.timestamp_millis())[..])?;
                let challenge: Challenge = decode(&bytes)?;
                Ok(judge(&challenge, message, now))
            }
            None if self.db.spent_nonces().contains_key(nonce.as_bytes())? => {
                Ok(ConsumeOutcome::AlreadyUsed)
            }
            None => Ok(ConsumeOutcome::Unknown),
        }
    }

    fn is_used(&self, nonce: &str) -> StoreResult<bool> {
        Ok(self.db.spent_nonces().contains_key(nonce.as_bytes())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn challenge(nonce: &str, expires_at: DateTime<Utc>) -> Challenge {
        Challenge {
            nonce: nonce.to_string(),
            message: b"mint python_basics_003".to_vec(),
            expires_at,
        }
    }

    fn exercise(store: &dyn NonceStore) {
        let now = Utc::now();
        let later = now + chrono::Duration::minutes(5);

        store.issue(&challenge("a", later)).unwrap();
        assert_eq!(store.consume("a", b"mint python_basics_003", now).unwrap(), ConsumeOutcome::Consumed);
        assert_eq!(store.consume("a", b"mint python_basics_003", now).unwrap(), ConsumeOutcome::AlreadyUsed);
        assert!(store.is_used("a").unwrap());

        assert_eq!(store.consume("never-issued", b"x", now).unwrap(), ConsumeOutcome::Unknown);

        store.issue(&challenge("b", now)).unwrap();
        assert_eq!(store.consume("b", b"mint python_basics_003", later).unwrap(), ConsumeOutcome::Expired);

        store.issue(&challenge("c", later)).unwrap();
        assert_eq!(store.consume("c", b"something else", now).unwrap(), ConsumeOutcome::MessageMismatch);
        assert_eq!(store.consume("c", b"mint python_basics_003", now).unwrap(), ConsumeOutcome::AlreadyUsed);
    }

    #[test]
    fn in_memory_one_shot() {
        exercise(&InMemoryNonceStore::new());
    }

    #[test]
    fn sled_one_shot() {
        exercise(&SledNonceStore::new(AccreditDb::open_temporary().unwrap()));
    }

    #[test]
    fn concurrent_consumers_one_winner() {
        let store = Arc::new(InMemoryNonceStore::new());
        let expires = Utc::now() + chrono::Duration::minutes(5);
        store.issue(&challenge("race", expires)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .consume("race", b"mint python_basics_003", Utc::now())
                        .unwrap()
                })
            })
            .collect();
        let consumed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == ConsumeOutcome::Consumed)
            .count();
        assert_eq!(consumed, 1);
        assert_eq!(store.open_challenges(), 0);
    }
}
