//! # Identity Module
//!
//! Every participant is an Ed25519 keypair; what the rest of the protocol
//! sees is the [`Address`] derived from it. Validators are addressed the
//! same way as students, so a [`ValidatorId`] is just an address.

pub mod address;

pub use address::{Address, AddressError};

/// A validator in the session consensus set.
pub type ValidatorId = Address;
