// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Accredit Protocol: Core Library
//!
//! Learning-credential verification and minting. A student's claim about a
//! finished module is certified by validators, bound to its outcomes by a
//! zero-knowledge proof, checked against a ledger-resident verifier, and
//! only then turned into a credential.
//!
//! ## Pipeline
//!
//! ```text
//! SessionRegistry ─► ProofBinder ─► ProofVerifierAdapter ─► AuthorizationLayer ─► CredentialMinter
//!                                                                                       │
//!                                   TransactionSubmissionManager ◄──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - **config**: every protocol constant and the loadable `ServiceConfig`.
//! - **crypto**: hashing, hash-to-field, Ed25519 keys.
//! - **identity**: Bech32 addresses and their field-element encoding.
//! - **error**: the stage-tagged error taxonomy.
//! - **storage**: sled database shared by the durable stores.
//! - **session**: learning sessions and validator consensus.
//! - **zkp**: the learning-outcome circuit, Groth16 artifact, proof binder.
//! - **verifier**: nullifiers, rate limiting, the verifier adapter.
//! - **auth**: self-service challenges and platform signers.
//! - **mint**: credentials and the minter.
//! - **ledger**: the ledger trait, transactions, submission with retries.
//!
//! ## Ground rules
//!
//! 1. A session's `verified` flag only ever goes from false to true.
//! 2. A proof id mints at most once, whatever it is presented for.
//! 3. Out-of-policy outcomes have no satisfying witness. The circuit says no,
//!    not the API.
//! 4. A transaction that lands but reverts is a failure.

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod mint;
pub mod session;
pub mod storage;
pub mod verifier;
pub mod zkp;

pub use error::{ProtocolError, ProtocolResult, Stage};
