//! # Storage Module
//!
//! The sled persistence layer shared by the durable session, nullifier and
//! challenge stores. The in-memory counterparts live next to their traits
//! (see [`crate::session::store`], [`crate::verifier::nullifier`],
//! [`crate::auth::challenge`]); this module only knows about bytes and trees.
//!
//! Bincode is the on-disk encoding. JSON is for config files and humans.

pub mod db;

pub use db::{AccreditDb, StoreError, StoreResult};
