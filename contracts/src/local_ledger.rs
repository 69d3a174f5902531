//! # Local Ledger
//!
//! An in-process ledger hosting the session registry, the verifier and the
//! credential registry behind the protocol's [`Ledger`] trait. It behaves
//! like a small fee-market chain:
//!
//! - per-account nonces, with a pending pool that holds gapped nonces
//! - `max_fee >= base_fee` and `priority >= min_priority_fee`, or the send
//!   is `Underpriced`
//! - replacing a pending transaction requires both fees raised by
//!   `replacement_bump_percent`
//! - a fixed gas schedule; a transaction below it reverts `OutOfGas` and
//!   still consumes its nonce
//! - one block per transaction, mined as soon as its nonce is next
//!
//! ## Fault injection
//!
//! | knob                     | effect                                           |
//! |--------------------------|--------------------------------------------------|
//! | `inject_underpriced(n)`  | the next `n` sends fail `Underpriced`            |
//! | `hold_next(n)`           | the next `n` accepted sends stay in the pool     |
//! | `set_gas_estimate_percent` | `estimate_gas` under- or over-reports          |
//!
//! Held transactions never get a receipt unless [`LocalLedger::mine_pending`]
//! is called or a replacement at the same nonce arrives.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use accredit_protocol::config::DEVNET_CHAIN_ID;
use accredit_protocol::error::ProtocolError;
use accredit_protocol::identity::Address;
use accredit_protocol::ledger::{
    CallOutput, FeeEstimate, Ledger, LedgerCall, LedgerError, LedgerEvent, LedgerTransaction, ReceiptStatus,
    RevertReason, TxId, TxReceipt,
};
use accredit_protocol::session::{ModuleCatalog, SessionRegistry, SessionStore};
use accredit_protocol::zkp::LearningProofVerifier;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::credential_registry::CredentialRegistry;
use crate::verifier::VerifierContract;

// ---------------------------------------------------------------------------
// Gas schedule
// ---------------------------------------------------------------------------

pub const GAS_CREATE_SESSION: u64 = 120_000;
pub const GAS_VALIDATE_SESSION: u64 = 60_000;
pub const GAS_VERIFY_PROOF: u64 = 280_000;
pub const GAS_MINT: u64 = 420_000;
pub const GAS_REVOKE: u64 = 40_000;
pub const GAS_ADMIN: u64 = 45_000;
pub const GAS_READ: u64 = 21_000;

pub fn gas_cost(call: &LedgerCall) -> u64 {
    match call {
        LedgerCall::CreateLearningSession { .. } => GAS_CREATE_SESSION,
        LedgerCall::ValidateLearningSession { .. } => GAS_VALIDATE_SESSION,
        LedgerCall::VerifyProof { .. } => GAS_VERIFY_PROOF,
        LedgerCall::MintWithZkProof { .. } => GAS_MINT,
        LedgerCall::RevokeCredential { .. } => GAS_REVOKE,
        LedgerCall::AddValidModule { .. }
        | LedgerCall::AddAchievementType { .. }
        | LedgerCall::AddPlatformMinter { .. }
        | LedgerCall::AddValidator { .. } => GAS_ADMIN,
        LedgerCall::IsSessionVerified { .. }
        | LedgerCall::GetLearningSession { .. }
        | LedgerCall::IsProofUsed { .. }
        | LedgerCall::IsNonceUsed { .. }
        | LedgerCall::GetCredential { .. }
        | LedgerCall::ModuleBalance { .. } => GAS_READ,
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub chain_id: u64,
    pub base_fee: u64,
    pub min_priority_fee: u64,
    pub replacement_bump_percent: u64,
    pub session_cooldown_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            chain_id: DEVNET_CHAIN_ID,
            base_fee: 20,
            min_priority_fee: 2,
            replacement_bump_percent: 10,
            session_cooldown_secs: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct Pending {
    tx: LedgerTransaction,
    tx_id: TxId,
    held: bool,
}

#[derive(Default)]
struct Faults {
    underpriced: u32,
    hold: u32,
    gas_estimate_percent: Option<u64>,
}

struct State {
    base_fee: u64,
    min_priority_fee: u64,
    registry: CredentialRegistry,
    nonces: HashMap<Address, u64>,
    pool: BTreeMap<(Address, u64), Pending>,
    receipts: HashMap<TxId, TxReceipt>,
    block_number: u64,
    faults: Faults,
}

pub struct LocalLedger {
    chain_id: u64,
    replacement_bump_percent: u64,
    sessions: SessionRegistry,
    state: Mutex<State>,
    mined: Notify,
}

impl LocalLedger {
    /// Genesis: `owner` controls the allow-lists, `verifier` is the deployed
    /// verification key.
    pub fn new(
        config: LedgerConfig,
        owner: Address,
        verifier: LearningProofVerifier,
        session_store: Arc<dyn SessionStore>,
    ) -> Self {
        let modules = Arc::new(ModuleCatalog::new());
        let sessions = SessionRegistry::new(session_store, modules.clone())
            .with_cooldown(Duration::from_secs(config.session_cooldown_secs));
        let registry = CredentialRegistry::new(config.chain_id, owner, VerifierContract::new(verifier), modules);
        info!(chain_id = config.chain_id, owner = %owner, registry = %registry.address(), "local ledger started");
        Self {
            chain_id: config.chain_id,
            replacement_bump_percent: config.replacement_bump_percent,
            sessions,
            state: Mutex::new(State {
                base_fee: config.base_fee,
                min_priority_fee: config.min_priority_fee,
                registry,
                nonces: HashMap::new(),
                pool: BTreeMap::new(),
                receipts: HashMap::new(),
                block_number: 0,
                faults: Faults::default(),
            }),
            mined: Notify::new(),
        }
    }

    /// Address of the credential registry contract, which self-service
    /// signatures are bound to.
    pub fn registry_address(&self) -> Address {
        self.state.lock().registry.address()
    }

    pub fn block_number(&self) -> u64 {
        self.state.lock().block_number
    }

    pub fn pool_size(&self) -> usize {
        self.state.lock().pool.len()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    // -- Fee market & faults ------------------------------------------------

    pub fn set_base_fee(&self, base_fee: u64) {
        self.state.lock().base_fee = base_fee;
    }

    pub fn inject_underpriced(&self, sends: u32) {
        self.state.lock().faults.underpriced = sends;
    }

    pub fn hold_next(&self, sends: u32) {
        self.state.lock().faults.hold = sends;
    }

    pub fn set_gas_estimate_percent(&self, percent: Option<u64>) {
        self.state.lock().faults.gas_estimate_percent = percent;
    }

    /// Release every held transaction and mine whatever is now in order.
    pub fn mine_pending(&self) {
        let mut state = self.state.lock();
        for pending in state.pool.values_mut() {
            pending.held = false;
        }
        let accounts: Vec<Address> = state.pool.keys().map(|(from, _)| *from).collect();
        for account in accounts {
            self.mine_account(&mut state, &account);
        }
        drop(state);
        self.mined.notify_waiters();
    }

    // -- Execution ----------------------------------------------------------

    /// Mine every transaction from `from` whose nonce is next in line.
    fn mine_account(&self, state: &mut State, from: &Address) {
        loop {
            let next = state.nonces.get(from).copied().unwrap_or(0);
            match state.pool.get(&(*from, next)) {
                Some(pending) if !pending.held => {}
                _ => break,
            }
            let Some(pending) = state.pool.remove(&(*from, next)) else {
                break;
            };
            state.nonces.insert(*from, next + 1);
            state.block_number += 1;
            let receipt = self.execute(state, pending);
            state.receipts.insert(receipt.tx_id, receipt);
        }
    }

    fn execute(&self, state: &mut State, pending: Pending) -> TxReceipt {
        let Pending { tx, tx_id, .. } = pending;
        let cost = gas_cost(&tx.call);
        let effective_fee_per_gas = tx.effective_fee_per_gas(state.base_fee);
        let block_number = state.block_number;

        let reverted = |reason: RevertReason, gas_used: u64| {
            warn!(tx_id = %tx_id, method = tx.call.name(), reason = %reason, "transaction reverted");
            TxReceipt {
                tx_id,
                status: ReceiptStatus::Reverted,
                block_number,
                gas_used,
                effective_fee_per_gas,
                output: CallOutput::None,
                events: Vec::new(),
                revert_reason: Some(reason),
            }
        };

        if tx.gas_limit < cost {
            return reverted(RevertReason::OutOfGas, tx.gas_limit);
        }

        match self.apply(state, &tx.from, &tx.call) {
            Ok((output, events)) => {
                debug!(tx_id = %tx_id, method = tx.call.name(), block = block_number, "transaction executed");
                TxReceipt {
                    tx_id,
                    status: ReceiptStatus::Success,
                    block_number,
                    gas_used: cost,
                    effective_fee_per_gas,
                    output,
                    events,
                    revert_reason: None,
                }
            }
            Err(reason) => reverted(reason, cost),
        }
    }

    /// Run `call` from `sender` against contract state.
    fn apply(
        &self,
        state: &mut State,
        sender: &Address,
        call: &LedgerCall,
    ) -> Result<(CallOutput, Vec<LedgerEvent>), RevertReason> {
        let now = Utc::now();
        match call {
            LedgerCall::CreateLearningSession {
                student,
                module_id,
                data_hash,
                score,
                time_spent_seconds,
                attempts,
            } => {
                if sender != student && !state.registry.is_minter(sender) {
                    return Err(RevertReason::Unauthorized(*sender));
                }
                let session_id = self
                    .sessions
                    .create_session_at(*student, module_id, *data_hash, *score, *time_spent_seconds, *attempts, now)
                    .map_err(revert_from_protocol)?;
                Ok((
                    CallOutput::SessionId(session_id),
                    vec![LedgerEvent::LearningSessionCreated {
                        session_id,
                        student: *student,
                        module_id: module_id.clone(),
                    }],
                ))
            }
            LedgerCall::ValidateLearningSession { session_id, approve } => {
                let result = self
                    .sessions
                    .approve(session_id, sender, *approve)
                    .map_err(revert_from_protocol)?;
                Ok((CallOutput::Approval(result), Vec::new()))
            }
            LedgerCall::VerifyProof { proof } => {
                Ok((CallOutput::Bool(state.registry.verifier().verify_proof(proof)), Vec::new()))
            }
            LedgerCall::MintWithZkProof { params, proof, auth } => {
                let session = self
                    .sessions
                    .get(&params.session_id)
                    .map_err(revert_from_protocol)?;
                let minted = state
                    .registry
                    .mint_with_zk_proof(sender, params, proof, auth.as_ref(), &session, now)?;
                Ok((CallOutput::Credential(Box::new(minted.credential)), vec![minted.event]))
            }
            LedgerCall::RevokeCredential { credential_id } => {
                let event = state.registry.revoke_credential(sender, *credential_id)?;
                Ok((CallOutput::None, vec![event]))
            }
            LedgerCall::AddValidModule { module_id, policy } => {
                state.registry.add_valid_module(sender, module_id, *policy)?;
                Ok((CallOutput::None, Vec::new()))
            }
            LedgerCall::AddAchievementType {
                achievement_type,
                policy,
            } => {
                state.registry.add_achievement_type(sender, achievement_type, *policy)?;
                Ok((CallOutput::None, Vec::new()))
            }
            LedgerCall::AddPlatformMinter { minter } => {
                state.registry.add_platform_minter(sender, *minter)?;
                Ok((CallOutput::None, Vec::new()))
            }
            LedgerCall::AddValidator { validator } => {
                if *sender != state.registry.owner() {
                    return Err(RevertReason::Unauthorized(*sender));
                }
                self.sessions.add_validator(*validator);
                Ok((CallOutput::None, Vec::new()))
            }
            read => Ok((self.read(state, read)?, Vec::new())),
        }
    }

    fn read(&self, state: &State, call: &LedgerCall) -> Result<CallOutput, RevertReason> {
        let output = match call {
            LedgerCall::VerifyProof { proof } => CallOutput::Bool(state.registry.verifier().verify_proof(proof)),
            LedgerCall::IsSessionVerified { session_id } => {
                CallOutput::Bool(self.sessions.is_verified(session_id).map_err(revert_from_protocol)?)
            }
            LedgerCall::GetLearningSession { session_id } => CallOutput::Session(Box::new(
                self.sessions.get(session_id).map_err(revert_from_protocol)?,
            )),
            LedgerCall::IsProofUsed { proof_id } => CallOutput::Bool(state.registry.is_proof_used(proof_id)),
            LedgerCall::IsNonceUsed { nonce } => CallOutput::Bool(state.registry.is_nonce_used(nonce)),
            LedgerCall::GetCredential { credential_id } => {
                CallOutput::Credential(Box::new(state.registry.credential(credential_id)?))
            }
            LedgerCall::ModuleBalance { owner, module_id } => {
                CallOutput::Balance(state.registry.module_balance(owner, module_id))
            }
            write => {
                return Err(RevertReason::Other(format!(
                    "{} changes state and needs a transaction",
                    write.name()
                )))
            }
        };
        Ok(output)
    }

    fn receipt(&self, tx_id: &TxId) -> Option<TxReceipt> {
        self.state.lock().receipts.get(tx_id).cloned()
    }
}

/// Session-registry failures as contract reverts.
fn revert_from_protocol(e: ProtocolError) -> RevertReason {
    match e {
        ProtocolError::InvalidModule { module_id, .. } => RevertReason::InvalidModule(module_id),
        ProtocolError::SessionNotFound(id) => RevertReason::SessionNotFound(id),
        ProtocolError::DuplicateSession { existing } => RevertReason::DuplicateSession(existing),
        ProtocolError::UnknownValidator(v) => RevertReason::NotValidator(v),
        other => RevertReason::Other(other.to_string()),
    }
}

#[async_trait]
impl Ledger for LocalLedger {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn pending_nonce(&self, account: &Address) -> Result<u64, LedgerError> {
        let state = self.state.lock();
        let confirmed = state.nonces.get(account).copied().unwrap_or(0);
        let pooled = state
            .pool
            .range((*account, 0)..=(*account, u64::MAX))
            .map(|((_, nonce), _)| nonce + 1)
            .max()
            .unwrap_or(0);
        Ok(confirmed.max(pooled))
    }

    async fn fee_estimate(&self) -> Result<FeeEstimate, LedgerError> {
        let state = self.state.lock();
        Ok(FeeEstimate {
            base_fee: state.base_fee,
            priority_fee: state.min_priority_fee,
        })
    }

    async fn estimate_gas(&self, _from: &Address, call: &LedgerCall) -> Result<u64, LedgerError> {
        let percent = self.state.lock().faults.gas_estimate_percent.unwrap_or(100);
        Ok((gas_cost(call).saturating_mul(percent) / 100).max(1))
    }

    async fn call(&self, from: &Address, call: &LedgerCall) -> Result<CallOutput, LedgerError> {
        let state = self.state.lock();
        self.read(&state, call).map_err(|reason| {
            debug!(from = %from, method = call.name(), reason = %reason, "call reverted");
            LedgerError::Reverted(reason)
        })
    }

    async fn send_transaction(&self, tx: LedgerTransaction) -> Result<TxId, LedgerError> {
        if tx.chain_id != self.chain_id {
            return Err(LedgerError::WrongChain {
                expected: self.chain_id,
                got: tx.chain_id,
            });
        }
        if !tx.verify_signature() {
            return Err(LedgerError::InvalidSignature);
        }
        let tx_id = tx.id();

        let mut state = self.state.lock();
        if state.receipts.contains_key(&tx_id) {
            return Ok(tx_id);
        }

        let required = state.base_fee.saturating_add(state.min_priority_fee);
        if state.faults.underpriced > 0 {
            state.faults.underpriced -= 1;
            return Err(LedgerError::Underpriced {
                offered: tx.max_fee_per_gas,
                required: tx.max_fee_per_gas.saturating_add(1).max(required),
            });
        }
        if tx.max_fee_per_gas < required || tx.max_priority_fee_per_gas < state.min_priority_fee {
            return Err(LedgerError::Underpriced {
                offered: tx.max_fee_per_gas,
                required,
            });
        }

        let expected = state.nonces.get(&tx.from).copied().unwrap_or(0);
        if tx.nonce < expected {
            return Err(LedgerError::NonceTooLow {
                expected,
                got: tx.nonce,
            });
        }

        let key = (tx.from, tx.nonce);
        if let Some(existing) = state.pool.get(&key) {
            let bump = |old: u64| old.saturating_mul(100 + self.replacement_bump_percent) / 100;
            if tx.max_fee_per_gas < bump(existing.tx.max_fee_per_gas)
                || tx.max_priority_fee_per_gas < bump(existing.tx.max_priority_fee_per_gas)
            {
                return Err(LedgerError::ReplacementUnderpriced { nonce: tx.nonce });
            }
            debug!(from = %tx.from, nonce = tx.nonce, replaced = %existing.tx_id, by = %tx_id, "pool replacement");
        }

        let held = state.faults.hold > 0;
        if held {
            state.faults.hold -= 1;
            debug!(tx_id = %tx_id, "holding transaction in the pool");
        }
        let from = tx.from;
        state.pool.insert(key, Pending { tx, tx_id, held });
        self.mine_account(&mut state, &from);
        drop(state);
        self.mined.notify_waiters();
        Ok(tx_id)
    }

    async fn wait_for_receipt(&self, tx_id: &TxId, timeout: Duration) -> Result<TxReceipt, LedgerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.mined.notified();
            if let Some(receipt) = self.receipt(tx_id) {
                return Ok(receipt);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(LedgerError::Timeout(*tx_id));
            }
        }
    }
}
