//! Achievement-type allow-list.
//!
//! Each achievement type carries the outcome policy its proofs must attest
//! to, the same way a module does.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_TIME_SECONDS, DEFAULT_MIN_SCORE};
use crate::zkp::ProofPolicy;

pub fn default_achievement_policy() -> ProofPolicy {
    ProofPolicy {
        min_score: DEFAULT_MIN_SCORE,
        max_time_seconds: DEFAULT_MAX_TIME_SECONDS,
        max_attempts: DEFAULT_MAX_ATTEMPTS,
    }
}

#[derive(Debug, Default)]
pub struct AchievementCatalog {
    types: RwLock<BTreeMap<String, ProofPolicy>>,
}

impl AchievementCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let catalog = Self::new();
        for t in types {
            catalog.register(t, default_achievement_policy());
        }
        catalog
    }

    pub fn register(&self, achievement_type: impl Into<String>, policy: ProofPolicy) {
        self.types.write().insert(achievement_type.into(), policy);
    }

    pub fn policy(&self, achievement_type: &str) -> Option<ProofPolicy> {
        self.types.read().get(achievement_type).copied()
    }

    pub fn contains(&self, achievement_type: &str) -> bool {
        self.types.read().contains_key(achievement_type)
    }
}

/// Whether a proof's thresholds are at least as strict as `required`.
pub fn satisfies(proven: &ProofPolicy, required: &ProofPolicy) -> bool {
    proven.min_score >= required.min_score
        && proven.max_time_seconds <= required.max_time_seconds
        && proven.max_attempts <= required.max_attempts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        let catalog = AchievementCatalog::with_types(["course_completion"]);
        assert!(catalog.contains("course_completion"));
        assert!(!catalog.contains("speedrun"));
        assert_eq!(catalog.policy("course_completion"), Some(default_achievement_policy()));
    }

    #[test]
    fn test_stricter_policy_satisfies() {
        let required = default_achievement_policy();
        let stricter = ProofPolicy {
            min_score: 90,
            max_time_seconds: 1800,
            max_attempts: 3,
        };
        assert!(satisfies(&stricter, &required));
        assert!(satisfies(&required, &required));

        let lax = ProofPolicy {
            min_score: 50,
            ..required
        };
        assert!(!satisfies(&lax, &required));
        let slow = ProofPolicy {
            max_time_seconds: required.max_time_seconds + 1,
            ..required
        };
        assert!(!satisfies(&slow, &required));
    }
}
