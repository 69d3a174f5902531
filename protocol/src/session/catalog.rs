//! Module allow-list and per-module policy.
//!
//! Which modules can be claimed at all, how many validators must approve a
//! claim, which outcome thresholds a proof has to meet, and how many
//! credits a completion is worth are all properties of the module rather
//! than global constants.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_TIME_SECONDS, DEFAULT_MIN_SCORE, DEFAULT_MODULE_REWARD,
    DEFAULT_REQUIRED_APPROVALS,
};
use crate::zkp::ProofPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulePolicy {
    pub required_approvals: u32,
    pub min_score: u32,
    pub max_time_seconds: u32,
    pub max_attempts: u32,
    /// Fungible credits minted per completion.
    pub reward_amount: u64,
}

impl Default for ModulePolicy {
    fn default() -> Self {
        Self {
            required_approvals: DEFAULT_REQUIRED_APPROVALS,
            min_score: DEFAULT_MIN_SCORE,
            max_time_seconds: DEFAULT_MAX_TIME_SECONDS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            reward_amount: DEFAULT_MODULE_REWARD,
        }
    }
}

impl ModulePolicy {
    pub fn with_required_approvals(mut self, required: u32) -> Self {
        self.required_approvals = required.max(1);
        self
    }

    pub fn proof_policy(&self) -> ProofPolicy {
        ProofPolicy {
            min_score: self.min_score,
            max_time_seconds: self.max_time_seconds,
            max_attempts: self.max_attempts,
        }
    }
}

/// Thread-safe module registry shared by the session registry and minter.
#[derive(Debug, Default)]
pub struct ModuleCatalog {
    modules: RwLock<BTreeMap<String, ModulePolicy>>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with default-policy modules.
    pub fn with_modules<I, S>(module_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let catalog = Self::new();
        for id in module_ids {
            catalog.register(id, ModulePolicy::default());
        }
        catalog
    }

    /// Add or replace a module. A zero approval threshold is raised to one,
    /// otherwise a session would be verified before anyone looked at it.
    pub fn register(&self, module_id: impl Into<String>, policy: ModulePolicy) {
        let policy = policy.with_required_approvals(policy.required_approvals);
        self.modules.write().insert(module_id.into(), policy);
    }

    pub fn remove(&self, module_id: &str) -> Option<ModulePolicy> {
        self.modules.write().remove(module_id)
    }

    pub fn policy(&self, module_id: &str) -> Option<ModulePolicy> {
        self.modules.read().get(module_id).copied()
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.modules.read().contains_key(module_id)
    }

    pub fn module_ids(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }
}
