//! # Accredit Contracts
//!
//! The ledger side of credential minting, and a local ledger to run it on.
//!
//! - **verifier**: the deployed verification key. Pure pairing check.
//! - **credential_registry**: allow-lists, proof and nonce registries,
//!   module balances and achievement credentials.
//! - **local_ledger**: an in-process `Ledger`: fee market, nonce-ordered
//!   pool, receipts, and fault injection for exercising the submitter.
//! - **devnet**: the whole pipeline wired against a `LocalLedger`.
//!
//! ## Design Principles
//!
//! 1. Every check runs before any write. A reverted call leaves no trace.
//! 2. A proof id is burned once, whatever it was minted as.
//! 3. A self-service signature binds chain, contract, caller and content.

pub mod credential_registry;
pub mod devnet;
pub mod local_ledger;
pub mod verifier;

pub use credential_registry::{CredentialRegistry, RegistryError, REGISTRY_LABEL};
pub use devnet::{Devnet, DevnetConfig, DevnetKeys, KeyFile};
pub use local_ledger::{LedgerConfig, LocalLedger};
pub use verifier::VerifierContract;
