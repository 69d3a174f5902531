//! # Transaction Submission Manager
//!
//! One place that turns a [`LedgerCall`] into a confirmed, successful
//! receipt:
//!
//! ```text
//! estimate gas ──► ×safety ──► pending nonce ──► fees for attempt n ──► sign ──► send
//!                                   ▲                                        │
//!                                   │          underpriced / timeout         │
//!                                   └────────────── retry ◄──────────────────┘
//! ```
//!
//! ## Retry rules
//!
//! | outcome                       | action                                   |
//! |-------------------------------|------------------------------------------|
//! | `Underpriced`                 | retry, next fee step                     |
//! | `ReplacementUnderpriced`      | retry at the same nonce, next fee step   |
//! | receipt `Timeout`             | replace at the same nonce, next fee step |
//! | `NonceTooLow`                 | look for an earlier attempt's receipt, else refetch the nonce |
//! | revert `OutOfGas`             | retry with a larger gas limit            |
//! | any other revert              | surface immediately                      |
//! | attempts exhausted            | poll every attempt once more, then `Pending` or `Exhausted` |
//!
//! A receipt that lands with `status != Success` is always a failure.
//!
//! `Pending` means an attempt may still be in the pool: the call has
//! neither failed nor succeeded, and resubmitting it could execute twice.
//! `Exhausted` means nothing this manager sent can land anymore.
//!
//! ## Nonces
//!
//! The manager owns one signing key. Nonce allocation and `send` happen
//! under a single async mutex, so concurrent submissions from the same
//! account never pick the same pending nonce. Receipt waiting happens
//! outside the lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::transaction::LedgerTransaction;
use super::types::{CallOutput, FeeEstimate, LedgerCall, LedgerError, RevertReason, TxId, TxReceipt};
use super::Ledger;
use crate::config::{
    ServiceConfig, GAS_SAFETY_PERCENT, MAX_FEE_SCHEDULE_PERCENT, MAX_SUBMISSION_ATTEMPTS,
    PRIORITY_FEE_SCHEDULE_PERCENT, RECEIPT_TIMEOUT,
};
use crate::crypto::Keypair;
use crate::error::{ProtocolError, Stage};
use crate::identity::Address;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Attempt cap and fee escalation schedule. Schedules are percentages of
/// the ledger's estimate, indexed by attempt; the last entry repeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub gas_safety_percent: u64,
    pub priority_fee_schedule_percent: Vec<u64>,
    pub max_fee_schedule_percent: Vec<u64>,
    pub receipt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_SUBMISSION_ATTEMPTS,
            gas_safety_percent: GAS_SAFETY_PERCENT,
            priority_fee_schedule_percent: PRIORITY_FEE_SCHEDULE_PERCENT.to_vec(),
            max_fee_schedule_percent: MAX_FEE_SCHEDULE_PERCENT.to_vec(),
            receipt_timeout: RECEIPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            max_attempts: config.max_submission_attempts,
            gas_safety_percent: config.gas_safety_percent,
            priority_fee_schedule_percent: config.priority_fee_schedule_percent.clone(),
            max_fee_schedule_percent: config.max_fee_schedule_percent.clone(),
            receipt_timeout: config.receipt_timeout(),
        }
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    /// `(priority %, max-fee %)` for a 1-based attempt number.
    pub fn multipliers(&self, attempt: u32) -> (u64, u64) {
        let step = |schedule: &[u64]| {
            let index = (attempt.max(1) as usize - 1).min(schedule.len().saturating_sub(1));
            schedule.get(index).copied().unwrap_or(100)
        };
        (
            step(self.priority_fee_schedule_percent.as_slice()),
            step(self.max_fee_schedule_percent.as_slice()),
        )
    }

    /// `(max_fee_per_gas, max_priority_fee_per_gas)` for an attempt.
    pub fn fees_for(&self, attempt: u32, estimate: FeeEstimate) -> (u64, u64) {
        let (priority_pct, max_pct) = self.multipliers(attempt);
        let priority = percent_of(estimate.priority_fee, priority_pct);
        let max_fee = percent_of(estimate.base_fee, max_pct).saturating_add(priority);
        (max_fee, priority)
    }

    pub fn gas_limit(&self, estimate: u64) -> u64 {
        percent_of(estimate, self.gas_safety_percent).max(estimate)
    }
}

fn percent_of(value: u64, percent: u64) -> u64 {
    value.saturating_mul(percent) / 100
}

// ---------------------------------------------------------------------------
// Errors & stats
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// The transaction landed and the contract refused it. Never retried.
    #[error("transaction {tx_id} reverted: {reason}")]
    Reverted { tx_id: TxId, reason: RevertReason },

    #[error("gave up after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// Attempts ran out while one of them was still unconfirmed in the pool.
    /// `tx_ids` lists every attempt sent at the pinned nonce, latest last.
    #[error("still pending after {attempts} attempt(s): {last_error}")]
    Pending {
        attempts: u32,
        tx_ids: Vec<TxId>,
        last_error: String,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl SubmissionError {
    pub fn into_protocol_error(self, stage: Stage) -> ProtocolError {
        match self {
            SubmissionError::Reverted { reason, .. } => reason.into_protocol_error(stage),
            SubmissionError::Exhausted {
                attempts,
                last_error,
            } => ProtocolError::TransactionFailed {
                attempts,
                reason: last_error,
            },
            SubmissionError::Pending { attempts, tx_ids, .. } => match tx_ids.last() {
                Some(tx_id) => ProtocolError::SubmissionPending {
                    attempts,
                    tx_id: *tx_id,
                },
                None => ProtocolError::TransactionFailed {
                    attempts,
                    reason: "no attempt reached the pool".to_string(),
                },
            },
            SubmissionError::Ledger(e) => ProtocolError::TransactionFailed {
                attempts: 1,
                reason: e.to_string(),
            },
        }
    }
}

/// Monotonic counters, read by the node's metrics exporter.
#[derive(Debug, Default)]
pub struct SubmissionStats {
    sent: AtomicU64,
    confirmed: AtomicU64,
    reverted: AtomicU64,
    retries: AtomicU64,
    exhausted: AtomicU64,
    pending: AtomicU64,
}

impl SubmissionStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
    pub fn confirmed(&self) -> u64 {
        self.confirmed.load(Ordering::Relaxed)
    }
    pub fn reverted(&self) -> u64 {
        self.reverted.load(Ordering::Relaxed)
    }
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
    pub fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::Relaxed)
    }
    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// TransactionSubmissionManager
// ---------------------------------------------------------------------------

pub struct TransactionSubmissionManager {
    ledger: Arc<dyn Ledger>,
    signer: Keypair,
    address: Address,
    policy: RetryPolicy,
    nonce_lock: Mutex<()>,
    stats: SubmissionStats,
}

impl TransactionSubmissionManager {
    pub fn new(ledger: Arc<dyn Ledger>, signer: Keypair, policy: RetryPolicy) -> Self {
        let address = Address::from_public_key(&signer.public_key());
        Self {
            ledger,
            signer,
            address,
            policy,
            nonce_lock: Mutex::new(()),
            stats: SubmissionStats::default(),
        }
    }

    /// The sending account.
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &SubmissionStats {
        &self.stats
    }

    /// Read-only call from this account.
    pub async fn call(&self, call: &LedgerCall) -> Result<CallOutput, LedgerError> {
        self.ledger.call(&self.address, call).await
    }

    /// Submit `call` and return its successful receipt.
    ///
    /// Dropping the returned future mid-flight can leave the last attempt
    /// in the pool; the ledger either executes it completely or not at all.
    pub async fn submit(&self, call: LedgerCall) -> Result<TxReceipt, SubmissionError> {
        let chain_id = self.ledger.chain_id();
        let method = call.name();
        let estimate = self.ledger.estimate_gas(&self.address, &call).await?;
        let mut gas_limit = self.policy.gas_limit(estimate);

        let mut pinned_nonce: Option<u64> = None;
        let mut in_flight: Vec<(u64, TxId)> = Vec::new();
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                self.stats.retries.fetch_add(1, Ordering::Relaxed);
            }
            let market = self.ledger.fee_estimate().await?;
            let (max_fee, priority_fee) = self.policy.fees_for(attempt, market);

            let (nonce, tx_id, sent) = {
                let _guard = self.nonce_lock.lock().await;
                let nonce = match pinned_nonce {
                    Some(nonce) => nonce,
                    None => self.ledger.pending_nonce(&self.address).await?,
                };
                let tx = LedgerTransaction::new(chain_id, self.address, nonce, call.clone())
                    .with_gas_limit(gas_limit)
                    .with_fees(max_fee, priority_fee)
                    .sign(&self.signer);
                let tx_id = tx.id();
                debug!(
                    method,
                    attempt,
                    nonce,
                    gas_limit,
                    max_fee,
                    priority_fee,
                    tx_id = %tx_id,
                    "sending transaction"
                );
                (nonce, tx_id, self.ledger.send_transaction(tx).await)
            };
            self.stats.sent.fetch_add(1, Ordering::Relaxed);

            match sent {
                Ok(_) => {
                    in_flight.push((nonce, tx_id));
                    match self.ledger.wait_for_receipt(&tx_id, self.policy.receipt_timeout).await {
                        Ok(receipt) => {
                            match self.settle(receipt, method, attempt, &mut gas_limit) {
                                Some(result) => return result,
                                None => {
                                    pinned_nonce = None;
                                    last_error = RevertReason::OutOfGas.to_string();
                                }
                            }
                        }
                        Err(e @ LedgerError::Timeout(_)) => {
                            warn!(method, attempt, nonce, tx_id = %tx_id, "receipt timed out, replacing");
                            pinned_nonce = Some(nonce);
                            last_error = e.to_string();
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e @ LedgerError::Underpriced { .. }) => {
                    warn!(method, attempt, error = %e, "underpriced, escalating fees");
                    last_error = e.to_string();
                }
                Err(e @ LedgerError::ReplacementUnderpriced { .. }) => {
                    warn!(method, attempt, nonce, "replacement underpriced, escalating fees");
                    pinned_nonce = Some(nonce);
                    last_error = e.to_string();
                }
                Err(e @ LedgerError::NonceTooLow { .. }) => {
                    // An earlier attempt may have landed after all.
                    for (_, earlier) in in_flight.iter().rev() {
                        if let Ok(receipt) = self.ledger.wait_for_receipt(earlier, Duration::ZERO).await {
                            info!(method, tx_id = %earlier, "earlier attempt was included");
                            match self.settle(receipt, method, attempt, &mut gas_limit) {
                                Some(result) => return result,
                                None => break,
                            }
                        }
                    }
                    warn!(method, attempt, nonce, "nonce too low, refetching");
                    pinned_nonce = None;
                    last_error = e.to_string();
                }
                Err(e) => return Err(e.into()),
            }
        }

        // One last look: a timed-out attempt may have been included since.
        for (_, earlier) in in_flight.iter().rev() {
            if let Ok(receipt) = self.ledger.wait_for_receipt(earlier, Duration::ZERO).await {
                info!(method, tx_id = %earlier, "attempt included after the last timeout");
                if let Some(result) = self.settle(receipt, method, self.policy.max_attempts, &mut gas_limit) {
                    return result;
                }
                break;
            }
        }

        if let Some(nonce) = pinned_nonce {
            let tx_ids: Vec<TxId> = in_flight
                .iter()
                .filter(|(sent_at, _)| *sent_at == nonce)
                .map(|(_, id)| *id)
                .collect();
            if !tx_ids.is_empty() {
                self.stats.pending.fetch_add(1, Ordering::Relaxed);
                error!(
                    method,
                    attempts = self.policy.max_attempts,
                    nonce,
                    tx_id = ?tx_ids.last(),
                    last_error = %last_error,
                    "transaction still pending after the last attempt"
                );
                return Err(SubmissionError::Pending {
                    attempts: self.policy.max_attempts,
                    tx_ids,
                    last_error,
                });
            }
        }

        self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
        error!(
            method,
            attempts = self.policy.max_attempts,
            last_error = %last_error,
            "transaction submission exhausted"
        );
        Err(SubmissionError::Exhausted {
            attempts: self.policy.max_attempts,
            last_error,
        })
    }

    /// Final answer for a receipt, or `None` to retry with more gas.
    fn settle(
        &self,
        receipt: TxReceipt,
        method: &'static str,
        attempt: u32,
        gas_limit: &mut u64,
    ) -> Option<Result<TxReceipt, SubmissionError>> {
        if receipt.is_success() {
            self.stats.confirmed.fetch_add(1, Ordering::Relaxed);
            info!(
                method,
                attempt,
                tx_id = %receipt.tx_id,
                block = receipt.block_number,
                gas_used = receipt.gas_used,
                "transaction confirmed"
            );
            return Some(Ok(receipt));
        }

        let reason = receipt
            .revert_reason
            .clone()
            .unwrap_or_else(|| RevertReason::Other("reverted without a reason".to_string()));
        if reason == RevertReason::OutOfGas {
            warn!(method, attempt, gas_limit = *gas_limit, "out of gas, raising limit");
            *gas_limit = self.policy.gas_limit(*gas_limit).max(gas_limit.saturating_add(1));
            return None;
        }

        self.stats.reverted.fetch_add(1, Ordering::Relaxed);
        warn!(method, tx_id = %receipt.tx_id, reason = %reason, "transaction reverted");
        Some(Err(SubmissionError::Reverted {
            tx_id: receipt.tx_id,
            reason,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::ReceiptStatus;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::VecDeque;

    #[derive(Clone, Debug)]
    enum ReceiptPlan {
        Success,
        Revert(RevertReason),
        Timeout,
    }

    #[derive(Default)]
    struct State {
        confirmed: u64,
        pool: Vec<LedgerTransaction>,
        sent: Vec<LedgerTransaction>,
        send_script: VecDeque<LedgerError>,
        receipt_script: VecDeque<ReceiptPlan>,
        landed: Vec<TxReceipt>,
    }

    /// A ledger whose responses are scripted per call.
    #[derive(Default)]
    struct ScriptedLedger {
        state: SyncMutex<State>,
    }

    impl ScriptedLedger {
        fn fail_sends(&self, errors: Vec<LedgerError>) {
            self.state.lock().send_script.extend(errors);
        }
        fn plan_receipts(&self, plans: Vec<ReceiptPlan>) {
            self.state.lock().receipt_script.extend(plans);
        }
        fn sent(&self) -> Vec<LedgerTransaction> {
            self.state.lock().sent.clone()
        }
    }

    #[async_trait]
    impl Ledger for ScriptedLedger {
        fn chain_id(&self) -> u64 {
            9
        }
        async fn pending_nonce(&self, _account: &Address) -> Result<u64, LedgerError> {
            let s = self.state.lock();
            Ok(s.confirmed + s.pool.len() as u64)
        }
        async fn fee_estimate(&self) -> Result<FeeEstimate, LedgerError> {
            Ok(FeeEstimate {
                base_fee: 100,
                priority_fee: 10,
            })
        }
        async fn estimate_gas(&self, _from: &Address, _call: &LedgerCall) -> Result<u64, LedgerError> {
            Ok(50_000)
        }
        async fn call(&self, _from: &Address, _call: &LedgerCall) -> Result<CallOutput, LedgerError> {
            Ok(CallOutput::Bool(true))
        }
        async fn send_transaction(&self, tx: LedgerTransaction) -> Result<TxId, LedgerError> {
            let mut s = self.state.lock();
            s.sent.push(tx.clone());
            if let Some(err) = s.send_script.pop_front() {
                return Err(err);
            }
            let id = tx.id();
            s.pool.retain(|p| p.nonce != tx.nonce);
            s.pool.push(tx);
            Ok(id)
        }
        async fn wait_for_receipt(&self, tx_id: &TxId, _timeout: Duration) -> Result<TxReceipt, LedgerError> {
            let mut s = self.state.lock();
            if let Some(r) = s.landed.iter().find(|r| r.tx_id == *tx_id) {
                return Ok(r.clone());
            }
            let plan = s.receipt_script.pop_front().unwrap_or(ReceiptPlan::Success);
            let (status, revert_reason) = match plan {
                ReceiptPlan::Timeout => return Err(LedgerError::Timeout(*tx_id)),
                ReceiptPlan::Success => (ReceiptStatus::Success, None),
                ReceiptPlan::Revert(r) => (ReceiptStatus::Reverted, Some(r)),
            };
            s.pool.retain(|p| p.id() != *tx_id);
            s.confirmed += 1;
            let receipt = TxReceipt {
                tx_id: *tx_id,
                status,
                block_number: s.confirmed,
                gas_used: 40_000,
                effective_fee_per_gas: 110,
                output: CallOutput::None,
                events: vec![],
                revert_reason,
            };
            s.landed.push(receipt.clone());
            Ok(receipt)
        }
    }

    fn manager(ledger: Arc<ScriptedLedger>) -> TransactionSubmissionManager {
        TransactionSubmissionManager::new(ledger, Keypair::from_seed(&[4u8; 32]), RetryPolicy::default())
    }

    fn call() -> LedgerCall {
        LedgerCall::AddValidator {
            validator: Address::from_key_hash([8u8; 32]),
        }
    }

    #[test]
    fn test_fee_schedule() {
        let policy = RetryPolicy::default();
        let market = FeeEstimate {
            base_fee: 100,
            priority_fee: 10,
        };
        assert_eq!(policy.fees_for(1, market), (315, 15));
        assert_eq!(policy.fees_for(2, market), (420, 20));
        assert_eq!(policy.fees_for(3, market), (525, 25));
        // Past the schedule the last step repeats.
        assert_eq!(policy.fees_for(9, market), (525, 25));
        assert_eq!(policy.gas_limit(50_000), 100_000);
    }

    #[test]
    fn test_policy_from_config() {
        let config = ServiceConfig {
            max_submission_attempts: 5,
            ..ServiceConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 5);
    }

    #[tokio::test]
    async fn submit_happy_path() {
        let ledger = Arc::new(ScriptedLedger::default());
        let manager = manager(ledger.clone());

        let receipt = manager.submit(call()).await.unwrap();
        assert!(receipt.is_success());

        let sent = ledger.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].nonce, 0);
        assert_eq!(sent[0].gas_limit, 100_000);
        assert_eq!((sent[0].max_fee_per_gas, sent[0].max_priority_fee_per_gas), (315, 15));
        assert!(sent[0].verify_signature());
        assert_eq!(manager.stats().confirmed(), 1);
    }

    #[tokio::test]
    async fn underpriced_escalates_fees() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.fail_sends(vec![
            LedgerError::Underpriced { offered: 115, required: 500 },
            LedgerError::Underpriced { offered: 120, required: 500 },
        ]);
        let manager = manager(ledger.clone());

        manager.submit(call()).await.unwrap();
        let fees: Vec<_> = ledger
            .sent()
            .iter()
            .map(|t| (t.max_fee_per_gas, t.max_priority_fee_per_gas))
            .collect();
        assert_eq!(fees, vec![(315, 15), (420, 20), (525, 25)]);
        assert_eq!(manager.stats().retries(), 2);
    }

    #[tokio::test]
    async fn exhaustion_is_transaction_failed() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.fail_sends(vec![
            LedgerError::Underpriced { offered: 1, required: 500 },
            LedgerError::Underpriced { offered: 1, required: 500 },
            LedgerError::Underpriced { offered: 1, required: 500 },
        ]);
        let manager = manager(ledger.clone());

        let err = manager.submit(call()).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Exhausted { attempts: 3, .. }));
        assert_eq!(manager.stats().pending(), 0);
        assert!(matches!(
            err.into_protocol_error(Stage::Minting),
            ProtocolError::TransactionFailed { attempts: 3, .. }
        ));
        assert_eq!(ledger.sent().len(), 3);
    }

    #[tokio::test]
    async fn contract_revert_is_not_retried() {
        let ledger = Arc::new(ScriptedLedger::default());
        let used = crate::zkp::ProofId::from_bytes([3u8; 32]);
        ledger.plan_receipts(vec![ReceiptPlan::Revert(RevertReason::ProofUsed(used))]);
        let manager = manager(ledger.clone());

        let err = manager.submit(call()).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Reverted { reason: RevertReason::ProofUsed(p), .. } if p == used));
        assert_eq!(ledger.sent().len(), 1);
        assert_eq!(manager.stats().reverted(), 1);
    }

    #[tokio::test]
    async fn timeout_replaces_at_same_nonce() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.plan_receipts(vec![ReceiptPlan::Timeout]);
        let manager = manager(ledger.clone());

        manager.submit(call()).await.unwrap();
        let sent = ledger.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].nonce, sent[1].nonce);
        assert!(sent[1].max_priority_fee_per_gas > sent[0].max_priority_fee_per_gas);
    }

    #[tokio::test]
    async fn unconfirmed_last_attempt_is_pending() {
        let ledger = Arc::new(ScriptedLedger::default());
        // Three attempts time out, then the final poll of each still does.
        ledger.plan_receipts(vec![ReceiptPlan::Timeout; 6]);
        let manager = manager(ledger.clone());

        let err = manager.submit(call()).await.unwrap_err();
        let sent = ledger.sent();
        match &err {
            SubmissionError::Pending { attempts, tx_ids, .. } => {
                assert_eq!(*attempts, 3);
                assert_eq!(tx_ids.len(), 3);
                assert_eq!(tx_ids.last(), Some(&sent[2].id()));
            }
            other => panic!("expected Pending, got {other:?}"),
        }
        assert_eq!(manager.stats().pending(), 1);
        assert_eq!(manager.stats().exhausted(), 0);
        assert!(matches!(
            err.into_protocol_error(Stage::Minting),
            ProtocolError::SubmissionPending { attempts: 3, tx_id } if tx_id == sent[2].id()
        ));
    }

    #[tokio::test]
    async fn attempt_landing_after_last_timeout_is_confirmed() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.plan_receipts(vec![ReceiptPlan::Timeout; 3]);
        let manager = manager(ledger.clone());

        let receipt = manager.submit(call()).await.unwrap();
        assert_eq!(receipt.tx_id, ledger.sent()[2].id());
        assert_eq!(ledger.sent().len(), 3);
        assert_eq!(manager.stats().pending(), 0);
    }

    #[tokio::test]
    async fn out_of_gas_retries_with_more_gas() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.plan_receipts(vec![ReceiptPlan::Revert(RevertReason::OutOfGas)]);
        let manager = manager(ledger.clone());

        manager.submit(call()).await.unwrap();
        let sent = ledger.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].gas_limit > sent[0].gas_limit);
        // The reverted attempt consumed its nonce.
        assert_eq!(sent[1].nonce, sent[0].nonce + 1);
    }

    #[tokio::test]
    async fn nonce_too_low_refetches() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.fail_sends(vec![LedgerError::NonceTooLow { expected: 1, got: 0 }]);
        let manager = manager(ledger.clone());

        assert!(manager.submit(call()).await.is_ok());
        assert_eq!(ledger.sent().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_submissions_get_distinct_nonces() {
        let ledger = Arc::new(ScriptedLedger::default());
        let manager = Arc::new(manager(ledger.clone()));

        let (a, b) = tokio::join!(manager.submit(call()), manager.submit(call()));
        assert!(a.is_ok() && b.is_ok());

        let mut nonces: Vec<u64> = ledger.sent().iter().map(|t| t.nonce).collect();
        nonces.sort_unstable();
        nonces.dedup();
        assert_eq!(nonces.len(), 2);
    }

    #[tokio::test]
    async fn fatal_send_error_surfaces() {
        let ledger = Arc::new(ScriptedLedger::default());
        ledger.fail_sends(vec![LedgerError::InvalidSignature]);
        let manager = manager(ledger.clone());

        let err = manager.submit(call()).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Ledger(LedgerError::InvalidSignature)));
    }
}
