//! # Credential Minting
//!
//! Two credential shapes: fungible module-completion credits and
//! non-fungible achievements. Both are only ever minted against a proof
//! that passed the verifier adapter, and both are idempotent per proof id.
//!
//! ```text
//! credential.rs: Credential, CredentialId, CredentialKind, Tier
//! catalog.rs   : achievement-type allow-list
//! book.rs      : local record of issued credentials
//! minter.rs    : CredentialMinter
//! ```

pub mod book;
pub mod catalog;
pub mod credential;
pub mod minter;

pub use book::CredentialBook;
pub use catalog::{default_achievement_policy, satisfies, AchievementCatalog};
pub use credential::{Credential, CredentialId, CredentialKind, Tier};
pub use minter::{AchievementRequest, CredentialMinter};
