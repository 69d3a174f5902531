//! Used-proof (nullifier) tracking.
//!
//! Registration is a two-phase atomic insert-if-absent:
//!
//! ```text
//! absent ──try_reserve──► Reserved ──commit──► Committed (forever)
//!                            │
//!                            └──release──► absent
//! ```
//!
//! Exactly one caller can win the reservation for a given proof id. A
//! [`NullifierReservation`] releases itself on drop unless committed, so a
//! mint that is cancelled or fails before reaching the ledger leaves no
//! trace.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::storage::{AccreditDb, StoreResult};
use crate::zkp::ProofId;

const RESERVED: &[u8] = b"R";
const COMMITTED: &[u8] = b"C";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NullifierState {
    Reserved,
    Committed,
}

/// The set of proof ids that are in use or used up.
pub trait NullifierSet: Send + Sync {
    /// Atomically move `id` from absent to reserved. `false` if it was
    /// already reserved or committed.
    fn try_reserve(&self, id: &ProofId) -> StoreResult<bool>;

    /// Make a reservation permanent.
    fn commit(&self, id: &ProofId) -> StoreResult<()>;

    /// Drop a reservation. A committed id is never released.
    fn release(&self, id: &ProofId) -> StoreResult<()>;

    /// Whether `id` is reserved or committed.
    fn contains(&self, id: &ProofId) -> StoreResult<bool>;

    /// Whether `id` is committed.
    fn is_committed(&self, id: &ProofId) -> StoreResult<bool>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryNullifierSet {
    entries: DashMap<ProofId, NullifierState>,
}

impl InMemoryNullifierSet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NullifierSet for InMemoryNullifierSet {
    fn try_reserve(&self, id: &ProofId) -> StoreResult<bool> {
        match self.entries.entry(*id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(NullifierState::Reserved);
                Ok(true)
            }
        }
    }

    fn commit(&self, id: &ProofId) -> StoreResult<()> {
        self.entries.insert(*id, NullifierState::Committed);
        Ok(())
    }

    fn release(&self, id: &ProofId) -> StoreResult<()> {
        self.entries
            .remove_if(id, |_, state| *state == NullifierState::Reserved);
        Ok(())
    }

    fn contains(&self, id: &ProofId) -> StoreResult<bool> {
        Ok(self.entries.contains_key(id))
    }

    fn is_committed(&self, id: &ProofId) -> StoreResult<bool> {
        Ok(self
            .entries
            .get(id)
            .map(|s| *s == NullifierState::Committed)
            .unwrap_or(false))
    }
}

// ---------------------------------------------------------------------------
// Sled
// ---------------------------------------------------------------------------

/// Durable nullifiers in the `nullifiers` tree, one state byte per id.
#[derive(Debug, Clone)]
pub struct SledNullifierSet {
    db: AccreditDb,
}

impl SledNullifierSet {
    pub fn new(db: AccreditDb) -> Self {
        Self { db }
    }
}

impl NullifierSet for SledNullifierSet {
    fn try_reserve(&self, id: &ProofId) -> StoreResult<bool> {
        let swapped = self
            .db
            .nullifiers()
            .compare_and_swap(id.as_bytes(), None as Option<&[u8]>, Some(RESERVED))?;
        Ok(swapped.is_ok())
    }

    fn commit(&self, id: &ProofId) -> StoreResult<()> {
        self.db.nullifiers().insert(id.as_bytes(), COMMITTED)?;
        Ok(())
    }

    fn release(&self, id: &ProofId) -> StoreResult<()> {
        // Only a reservation may be removed; a committed id stays.
        let _ = self
            .db
            .nullifiers()
            .compare_and_swap(id.as_bytes(), Some(RESERVED), None as Option<&[u8]>)?;
        Ok(())
    }

    fn contains(&self, id: &ProofId) -> StoreResult<bool> {
        Ok(self.db.nullifiers().contains_key(id.as_bytes())?)
    }

    fn is_committed(&self, id: &ProofId) -> StoreResult<bool> {
        Ok(self
            .db
            .nullifiers()
            .get(id.as_bytes())?
            .map(|v| v.as_ref() == COMMITTED)
            .unwrap_or(false))
    }
}

// ---------------------------------------------------------------------------
// Reservation guard
// ---------------------------------------------------------------------------

/// A won reservation. Released on drop unless [`commit`](Self::commit)ted.
pub struct NullifierReservation {
    set: Arc<dyn NullifierSet>,
    id: ProofId,
    committed: bool,
}

impl NullifierReservation {
    /// Try to reserve `id`. `None` if someone else holds or used it.
    pub fn acquire(set: Arc<dyn NullifierSet>, id: ProofId) -> StoreResult<Option<Self>> {
        if !set.try_reserve(&id)? {
            return Ok(None);
        }
        Ok(Some(Self {
            set,
            id,
            committed: false,
        }))
    }

    pub fn proof_id(&self) -> ProofId {
        self.id
    }

    /// Burn the proof id permanently.
    pub fn commit(mut self) -> StoreResult<()> {
        self.set.commit(&self.id)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for NullifierReservation {
    fn drop(&mut self) {
        if !self.committed {
            debug!(proof_id = %self.id, "releasing nullifier reservation");
            let _ = self.set.release(&self.id);
        }
    }
}

impl std::fmt::Debug for NullifierReservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullifierReservation")
            .field("proof_id", &self.id)
            .field("committed", &self.committed)
            .finish()
    }
}
