//! Signed ledger transactions.
//!
//! The id is the double-SHA-256 of [`LedgerTransaction::signable_bytes`],
//! which covers every field except the signature and the embedded public
//! key. The id is therefore stable across signing and changes with any fee
//! bump, so a replacement at the same nonce is a distinct transaction.

use serde::{Deserialize, Serialize};

use super::types::{LedgerCall, TxId};
use crate::crypto::hash::double_sha256;
use crate::crypto::{Keypair, PublicKey, Signature};
use crate::identity::Address;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub chain_id: u64,
    pub from: Address,
    /// Per-sender sequence number.
    pub nonce: u64,
    pub gas_limit: u64,
    pub max_fee_per_gas: u64,
    pub max_priority_fee_per_gas: u64,
    pub call: LedgerCall,
    pub sender_public_key: Option<PublicKey>,
    pub signature: Option<Signature>,
}

/// The signed portion of a transaction, borrowed for serialization.
#[derive(Serialize)]
struct SignablePayload<'a> {
    chain_id: u64,
    from: &'a Address,
    nonce: u64,
    gas_limit: u64,
    max_fee_per_gas: u64,
    max_priority_fee_per_gas: u64,
    call: &'a LedgerCall,
}

impl LedgerTransaction {
    pub fn new(chain_id: u64, from: Address, nonce: u64, call: LedgerCall) -> Self {
        Self {
            chain_id,
            from,
            nonce,
            gas_limit: 0,
            max_fee_per_gas: 0,
            max_priority_fee_per_gas: 0,
            call,
            sender_public_key: None,
            signature: None,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn with_fees(mut self, max_fee_per_gas: u64, max_priority_fee_per_gas: u64) -> Self {
        self.max_fee_per_gas = max_fee_per_gas;
        self.max_priority_fee_per_gas = max_priority_fee_per_gas;
        self
    }

    /// Canonical bincode of everything but the signature fields.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let payload = SignablePayload {
            chain_id: self.chain_id,
            from: &self.from,
            nonce: self.nonce,
            gas_limit: self.gas_limit,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            call: &self.call,
        };
        // bincode only fails on types it cannot represent; every field here is plain data.
        bincode::serialize(&payload).unwrap_or_default()
    }

    pub fn id(&self) -> TxId {
        TxId(double_sha256(&self.signable_bytes()))
    }

    /// Sign in place. The caller is responsible for `keypair` matching `from`.
    pub fn sign(mut self, keypair: &Keypair) -> Self {
        let signature = keypair.sign(&self.signable_bytes());
        self.signature = Some(signature);
        self.sender_public_key = Some(keypair.public_key());
        self
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some() && self.sender_public_key.is_some()
    }

    /// The embedded key hashes to `from` and the signature covers the payload.
    pub fn verify_signature(&self) -> bool {
        match (&self.sender_public_key, &self.signature) {
            (Some(pk), Some(sig)) => self.from.matches(pk) && pk.verify(&self.signable_bytes(), sig),
            _ => false,
        }
    }

    /// Most this transaction can pay per unit of gas at `base_fee`.
    pub fn effective_fee_per_gas(&self, base_fee: u64) -> u64 {
        self.max_fee_per_gas
            .min(base_fee.saturating_add(self.max_priority_fee_per_gas))
    }
}
