//! # AccreditDb: Persistent Storage Engine
//!
//! The durable backing for the pipeline's shared mutable state, built on
//! sled's embedded key-value store.
//!
//! ## Tree Layout
//!
//! | Tree             | Key                       | Value                       |
//! |------------------|---------------------------|-----------------------------|
//! | `sessions`       | `session_id` (32B)        | `bincode(LearningSession)`  |
//! | `session_claims` | claim key (32B)           | `bincode(ClaimRecord)`      |
//! | `nullifiers`     | `proof_id` (32B)          | state byte (`R` / `C`)      |
//! | `challenges`     | nonce (UTF-8)             | `bincode(Challenge)`        |
//! | `spent_nonces`   | nonce (UTF-8)             | consumed-at millis (8B BE)  |
//!
//! Single-key atomicity is all the pipeline needs: nullifier reservation is
//! a `compare_and_swap` from absent, and challenge consumption is a `remove`
//! that only one caller can win.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// AccreditDb
// ---------------------------------------------------------------------------

/// Handle to the on-disk store. Cheap to clone; sled trees are internally
/// reference counted and safe to share across threads.
#[derive(Debug, Clone)]
pub struct AccreditDb {
    db: Db,
    sessions: Tree,
    session_claims: Tree,
    nullifiers: Tree,
    challenges: Tree,
    spent_nonces: Tree,
}

impl AccreditDb {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        Ok(Self {
            sessions: db.open_tree("sessions")?,
            session_claims: db.open_tree("session_claims")?,
            nullifiers: db.open_tree("nullifiers")?,
            challenges: db.open_tree("challenges")?,
            spent_nonces: db.open_tree("spent_nonces")?,
            db,
        })
    }

    pub fn sessions(&self) -> &Tree {
        &self.sessions
    }

    pub fn session_claims(&self) -> &Tree {
        &self.session_claims
    }

    pub fn nullifiers(&self) -> &Tree {
        &self.nullifiers
    }

    pub fn challenges(&self) -> &Tree {
        &self.challenges
    }

    pub fn spent_nonces(&self) -> &Tree {
        &self.spent_nonces
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// -- Typed helpers ----------------------------------------------------------

pub fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

pub fn get_typed<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> StoreResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

pub fn put_typed<T: Serialize>(tree: &Tree, key: &[u8], value: &T) -> StoreResult<()> {
    tree.insert(key, encode(value)?)?;
    Ok(())
}

/// Big-endian millisecond timestamp, so lexicographic order matches time order.
pub fn encode_millis(millis: i64) -> [u8; 8] {
    millis.to_be_bytes()
}

pub fn decode_millis(bytes: &[u8]) -> StoreResult<i64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Serialization(format!("expected 8-byte timestamp, got {}", bytes.len())))?;
    Ok(i64::from_be_bytes(arr))
}
