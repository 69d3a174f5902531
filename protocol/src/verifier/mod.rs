//! Off-ledger proof admission: nullifier tracking, per-student rate
//! limiting, and the adapter in front of the ledger's pairing check.

pub mod adapter;
pub mod nullifier;
pub mod rate_limit;

pub use adapter::{ProofVerifierAdapter, VerifiedProof};
pub use nullifier::{InMemoryNullifierSet, NullifierReservation, NullifierSet, SledNullifierSet};
pub use rate_limit::RateLimiter;
