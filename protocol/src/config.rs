//! # Protocol Configuration & Constants
//!
//! Every tunable of the credential pipeline lives here. If you find yourself
//! hardcoding a threshold somewhere else, move it here first.
//!
//! The constants are the defaults observed in the deployed platform. The
//! [`ServiceConfig`] struct bundles them so the node can load overrides from
//! a JSON file without recompiling.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Bech32 human-readable prefix for accredit addresses.
pub const ADDRESS_HRP: &str = "edu";

/// Chain identifier of the local devnet ledger.
pub const DEVNET_CHAIN_ID: u64 = 0xED_0001;

// ---------------------------------------------------------------------------
// Session consensus
// ---------------------------------------------------------------------------

/// Approvals needed before a session is verified, unless the module's
/// policy says otherwise. The deployed platform runs with one validator.
pub const DEFAULT_REQUIRED_APPROVALS: u32 = 1;

/// Window inside which an identical `(student, module, data)` claim is
/// rejected as a duplicate.
pub const SESSION_COOLDOWN: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Proof generation & verification
// ---------------------------------------------------------------------------

/// Bit width of every range check in the learning-outcome circuit. Scores,
/// seconds and attempt counts all fit comfortably in 32 bits.
pub const RANGE_BITS: usize = 32;

/// Default outcome policy applied when a module does not carry its own.
pub const DEFAULT_MIN_SCORE: u32 = 80;
pub const DEFAULT_MAX_TIME_SECONDS: u32 = 3600;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// One verification attempt per address per window.
pub const VERIFICATION_RATE_LIMIT_WINDOW: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Authorization
// ---------------------------------------------------------------------------

/// How long a self-service challenge stays redeemable.
pub const CHALLENGE_TTL: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Transaction submission
// ---------------------------------------------------------------------------

/// Maximum submission attempts before a transaction is declared failed.
pub const MAX_SUBMISSION_ATTEMPTS: u32 = 3;

/// Gas estimate safety factor, in percent.
pub const GAS_SAFETY_PERCENT: u64 = 200;

/// Priority fee multipliers per attempt, in percent of the network estimate.
pub const PRIORITY_FEE_SCHEDULE_PERCENT: [u64; 3] = [150, 200, 250];

/// Max-fee multipliers per attempt, in percent of the current base fee.
pub const MAX_FEE_SCHEDULE_PERCENT: [u64; 3] = [300, 400, 500];

/// How long to wait for a receipt before treating the attempt as timed out.
pub const RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default credential amount for a module completion.
pub const DEFAULT_MODULE_REWARD: u64 = 1;

// ---------------------------------------------------------------------------
// Service configuration
// ---------------------------------------------------------------------------

/// Tunables for every component of the pipeline, loadable from JSON.
///
/// Durations are stored as whole seconds (or milliseconds where sub-second
/// resolution matters) to keep the file format boring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub chain_id: u64,
    pub default_required_approvals: u32,
    pub session_cooldown_secs: u64,
    pub rate_limit_window_ms: u64,
    pub challenge_ttl_secs: u64,
    pub max_submission_attempts: u32,
    pub gas_safety_percent: u64,
    pub priority_fee_schedule_percent: Vec<u64>,
    pub max_fee_schedule_percent: Vec<u64>,
    pub receipt_timeout_ms: u64,
    /// Upper bound on concurrent proving jobs. `0` means one per CPU core.
    pub proving_workers: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chain_id: DEVNET_CHAIN_ID,
            default_required_approvals: DEFAULT_REQUIRED_APPROVALS,
            session_cooldown_secs: SESSION_COOLDOWN.as_secs(),
            rate_limit_window_ms: VERIFICATION_RATE_LIMIT_WINDOW.as_millis() as u64,
            challenge_ttl_secs: CHALLENGE_TTL.as_secs(),
            max_submission_attempts: MAX_SUBMISSION_ATTEMPTS,
            gas_safety_percent: GAS_SAFETY_PERCENT,
            priority_fee_schedule_percent: PRIORITY_FEE_SCHEDULE_PERCENT.to_vec(),
            max_fee_schedule_percent: MAX_FEE_SCHEDULE_PERCENT.to_vec(),
            receipt_timeout_ms: RECEIPT_TIMEOUT.as_millis() as u64,
            proving_workers: 0,
        }
    }
}

impl ServiceConfig {
    /// Load a config from a JSON file. Missing fields fall back to defaults.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    pub fn session_cooldown(&self) -> Duration {
        Duration::from_secs(self.session_cooldown_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.challenge_ttl_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }

    /// Resolve the proving pool size, defaulting to the number of cores.
    pub fn proving_workers(&self) -> usize {
        if self.proving_workers > 0 {
            return self.proving_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_schedules_escalate() {
        // Each retry must pay strictly more than the previous one or the
        // replacement will be rejected as underpriced.
        for pair in PRIORITY_FEE_SCHEDULE_PERCENT.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for pair in MAX_FEE_SCHEDULE_PERCENT.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(
            PRIORITY_FEE_SCHEDULE_PERCENT.len(),
            MAX_SUBMISSION_ATTEMPTS as usize
        );
    }

    #[test]
    fn test_default_policy_matches_reference_deployment() {
        assert_eq!(DEFAULT_REQUIRED_APPROVALS, 1);
        assert_eq!(VERIFICATION_RATE_LIMIT_WINDOW, Duration::from_secs(30));
        assert_eq!(GAS_SAFETY_PERCENT, 200);
    }

    #[test]
    fn test_service_config_partial_json_uses_defaults() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{ "rate_limit_window_ms": 0, "proving_workers": 2 }"#)
                .unwrap();
        assert_eq!(config.rate_limit_window(), Duration::ZERO);
        assert_eq!(config.proving_workers(), 2);
        assert_eq!(config.max_submission_attempts, MAX_SUBMISSION_ATTEMPTS);
        assert_eq!(config.chain_id, DEVNET_CHAIN_ID);
    }

    #[test]
    fn test_service_config_roundtrips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accredit.json");
        let config = ServiceConfig {
            challenge_ttl_secs: 42,
            ..ServiceConfig::default()
        };
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = ServiceConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.challenge_ttl(), Duration::from_secs(42));
    }

    #[test]
    fn test_proving_workers_defaults_to_cores() {
        assert!(ServiceConfig::default().proving_workers() >= 1);
    }
}
