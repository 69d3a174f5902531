//! # Ledger Client
//!
//! The pipeline talks to the ledger only through the [`Ledger`] trait:
//! read-only calls, fee and nonce queries, transaction submission and
//! receipt polling. Every method is a suspension point.
//!
//! ```text
//! types.rs       : calls, outputs, events, receipts, errors
//! transaction.rs : LedgerTransaction: canonical bytes, id, signing
//! submission.rs  : TransactionSubmissionManager + RetryPolicy
//! ```
//!
//! The in-process devnet implementation lives in the contracts crate
//! (`LocalLedger`).

pub mod submission;
pub mod transaction;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;

use crate::identity::Address;

pub use submission::{RetryPolicy, SubmissionError, SubmissionStats, TransactionSubmissionManager};
pub use transaction::LedgerTransaction;
pub use types::{
    CallOutput, FeeEstimate, LedgerCall, LedgerError, LedgerEvent, MintParams, MintTarget,
    ReceiptStatus, RevertReason, TxId, TxReceipt,
};

#[async_trait]
pub trait Ledger: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Next nonce for `account`, counting transactions still in the pool.
    async fn pending_nonce(&self, account: &Address) -> Result<u64, LedgerError>;

    async fn fee_estimate(&self) -> Result<FeeEstimate, LedgerError>;

    async fn estimate_gas(&self, from: &Address, call: &LedgerCall) -> Result<u64, LedgerError>;

    /// Execute `call` read-only against current state. A revert is
    /// `Err(LedgerError::Reverted)`.
    async fn call(&self, from: &Address, call: &LedgerCall) -> Result<CallOutput, LedgerError>;

    /// Hand a signed transaction to the pool.
    async fn send_transaction(&self, tx: LedgerTransaction) -> Result<TxId, LedgerError>;

    /// Wait up to `timeout` for `tx_id` to be included. A zero timeout polls.
    async fn wait_for_receipt(&self, tx_id: &TxId, timeout: Duration) -> Result<TxReceipt, LedgerError>;
}
