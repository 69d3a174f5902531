//! # Demo
//!
//! Drives the credential pipeline through its observable behaviours on a
//! devnet: the happy path, replay, out-of-policy outcomes, cross-session
//! binding, both authorization paths and a hostile fee market. Each step
//! prints one line and fails the run if the outcome differs.

use std::time::Instant;

use accredit_contracts::Devnet;
use accredit_protocol::auth::MintAuthorization;
use accredit_protocol::crypto::Keypair;
use accredit_protocol::error::ProtocolResult;
use accredit_protocol::identity::Address;
use accredit_protocol::mint::{default_achievement_policy, AchievementRequest, CredentialId};
use accredit_protocol::session::{LearningSession, ModulePolicy};
use accredit_protocol::zkp::{PrivateMetrics, ProofPolicy, ProofPurpose, ZkProof};
use anyhow::{bail, Context};
use tracing::info;

use crate::metrics::NodeMetrics;

pub const DEMO_MODULE: &str = "python_basics_003";
pub const DEMO_ACHIEVEMENT: &str = "course_completion";

pub struct Demo<'a> {
    devnet: &'a Devnet,
    metrics: &'a NodeMetrics,
    steps: usize,
}

impl<'a> Demo<'a> {
    pub fn new(devnet: &'a Devnet, metrics: &'a NodeMetrics) -> Self {
        Self {
            devnet,
            metrics,
            steps: 0,
        }
    }

    fn pass(&mut self, what: &str) {
        self.steps += 1;
        println!("  [{:>2}] ok  {what}", self.steps);
    }

    /// `result` must fail with an error of kind `expected`.
    fn expect_err<T>(&mut self, what: &str, result: ProtocolResult<T>, expected: &str) -> anyhow::Result<()> {
        match result {
            Ok(_) => bail!("{what}: succeeded, expected {expected}"),
            Err(e) => {
                self.metrics.record_failure(&e);
                let kind = crate::metrics::error_kind(&e);
                if kind != expected {
                    bail!("{what}: got {kind} ({e}), expected {expected}");
                }
                self.pass(&format!("{what} -> {kind}"));
                Ok(())
            }
        }
    }

    async fn certify(&self, student: Address, data: u8, metrics: PrivateMetrics) -> anyhow::Result<LearningSession> {
        let session = self
            .devnet
            .certify(student, DEMO_MODULE, [data; 32], metrics)
            .await
            .context("certifying session")?;
        if !session.verified {
            bail!("session {} was not verified", session.session_id);
        }
        self.metrics.sessions_certified_total.inc();
        Ok(session)
    }

    async fn prove(
        &self,
        session: &LearningSession,
        policy: ProofPolicy,
        purpose: ProofPurpose,
    ) -> ProtocolResult<ZkProof> {
        let started = Instant::now();
        let proof = self.devnet.prove(session, policy, purpose).await;
        self.metrics.proving_seconds.observe(started.elapsed().as_secs_f64());
        proof
    }

    fn minted(&self, kind: &str, id: CredentialId) -> CredentialId {
        self.metrics.credentials_minted_total.with_label_values(&[kind]).inc();
        id
    }

    pub async fn run(mut self) -> anyhow::Result<usize> {
        let net = self.devnet;
        let module_policy = ModulePolicy::default().proof_policy();
        let alice_kp = Keypair::generate();
        let alice = Address::from_public_key(&alice_kp.public_key());
        let outcome = PrivateMetrics {
            score: 85,
            time_spent_seconds: 3_500,
            attempts: 3,
        };

        println!("module credential");
        let session = self.certify(alice, 1, outcome).await?;
        self.pass(&format!("session {} verified", session.session_id));
        let proof = self.prove(&session, module_policy, ProofPurpose::Module).await?;
        self.pass(&format!("proof {} generated", proof.proof_id));
        let id = net.minter.mint_module_credential(&session, &proof, "ipfs://demo/module").await?;
        self.minted("module", id);
        self.pass(&format!("module credential {id} minted"));
        let again = net.minter.mint_module_credential(&session, &proof, "ipfs://demo/module").await;
        self.expect_err("same proof again", again, "duplicate_proof")?;

        let block = net.ledger.block_number();
        let strict = ProofPolicy {
            min_score: 90,
            ..module_policy
        };
        let refused = self.prove(&session, strict, ProofPurpose::Module).await;
        self.expect_err("proof for minScore=90", refused, "constraint_violation")?;
        if net.ledger.block_number() != block {
            bail!("a refused proof reached the ledger");
        }

        let other = self.certify(alice, 2, outcome).await?;
        let fresh = self.prove(&other, module_policy, ProofPurpose::Module).await?;
        let crossed = net.minter.mint_module_credential(&session, &fresh, "ipfs://demo/module").await;
        self.expect_err("fresh proof against the wrong session", crossed, "invalid_proof")?;

        println!("achievement credentials");
        let bob_kp = Keypair::generate();
        let bob = Address::from_public_key(&bob_kp.public_key());
        let top = PrivateMetrics {
            score: 93,
            time_spent_seconds: 2_400,
            attempts: 1,
        };
        let bob_session = self.certify(bob, 3, top).await?;
        let bob_proof = self
            .prove(&bob_session, default_achievement_policy(), ProofPurpose::Achievement)
            .await?;
        let request = AchievementRequest {
            achievement_type: DEMO_ACHIEVEMENT.to_string(),
            title: "Python Basics".to_string(),
            description: "Finished the Python basics track".to_string(),
            metadata_uri: "ipfs://demo/achievement".to_string(),
            score: top.score,
            expires_at: None,
        };

        let forged = net.self_service(&alice_kp, &request)?;
        let result = net
            .minter
            .mint_achievement_credential(&request, &bob_session, &bob_proof, &forged)
            .await;
        self.expect_err("alice signs for bob", result, "signature_mismatch")?;

        let stranger = MintAuthorization::Platform {
            signer: Address::from_public_key(&Keypair::generate().public_key()),
        };
        let result = net
            .minter
            .mint_achievement_credential(&request, &bob_session, &bob_proof, &stranger)
            .await;
        self.expect_err("unlisted platform signer", result, "unauthorized_signer")?;

        let auth = net.self_service(&bob_kp, &request)?;
        let id = net
            .minter
            .mint_achievement_credential(&request, &bob_session, &bob_proof, &auth)
            .await?;
        self.minted("achievement", id);
        let credential = net.minter.fetch_credential(id).await?;
        self.pass(&format!("self-service achievement {id} minted, authority {}", credential.authority));

        let bob_next = self.certify(bob, 4, top).await?;
        let next_proof = self
            .prove(&bob_next, default_achievement_policy(), ProofPurpose::Achievement)
            .await?;
        let replay = net
            .minter
            .mint_achievement_credential(&request, &bob_next, &next_proof, &auth)
            .await;
        self.expect_err("signed challenge reused", replay, "expired_challenge")?;

        let id = net
            .minter
            .mint_achievement_credential(&request, &bob_next, &next_proof, &net.platform_authorization())
            .await?;
        self.minted("achievement", id);
        self.pass(&format!("platform-issued achievement {id} minted"));
        net.minter.revoke_credential(id).await?;
        if !net.minter.fetch_credential(id).await?.revoked {
            bail!("credential {id} is not revoked");
        }
        self.pass(&format!("credential {id} revoked"));

        println!("fee market");
        let retries = net.platform.stats().retries();
        let carol = Address::from_public_key(&Keypair::generate().public_key());
        let carol_session = self.certify(carol, 5, outcome).await?;
        let carol_proof = self.prove(&carol_session, module_policy, ProofPurpose::Module).await?;
        net.ledger.inject_underpriced(1);
        net.ledger.hold_next(1);
        let id = net
            .minter
            .mint_module_credential(&carol_session, &carol_proof, "ipfs://demo/module")
            .await?;
        self.minted("module", id);
        self.pass(&format!(
            "minted through an underpriced send and a stuck transaction ({} retries)",
            net.platform.stats().retries() - retries
        ));

        let dave = Address::from_public_key(&Keypair::generate().public_key());
        let dave_session = self.certify(dave, 6, outcome).await?;
        let dave_proof = self.prove(&dave_session, module_policy, ProofPurpose::Module).await?;
        net.ledger.inject_underpriced(u32::MAX);
        let result = net
            .minter
            .mint_module_credential(&dave_session, &dave_proof, "ipfs://demo/module")
            .await;
        net.ledger.inject_underpriced(0);
        self.expect_err("every attempt underpriced", result, "transaction_failed")?;
        let id = net
            .minter
            .mint_module_credential(&dave_session, &dave_proof, "ipfs://demo/module")
            .await?;
        self.minted("module", id);
        self.pass(&format!("same proof minted {id} once the market settled"));

        info!(steps = self.steps, block = net.ledger.block_number(), "demo finished");
        Ok(self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accredit_contracts::{DevnetConfig, DevnetKeys};

    #[tokio::test]
    async fn demo_runs_clean() {
        let mut config = DevnetConfig::default();
        config.service.rate_limit_window_ms = 0;
        config.service.receipt_timeout_ms = 200;
        let devnet = Devnet::start(config, DevnetKeys::derive(42, 1)).await.unwrap();
        let metrics = NodeMetrics::new().unwrap();

        let steps = Demo::new(&devnet, &metrics).run().await.unwrap();
        assert!(steps >= 15);

        let text = metrics.encode().unwrap();
        for kind in [
            "duplicate_proof",
            "constraint_violation",
            "invalid_proof",
            "signature_mismatch",
            "unauthorized_signer",
            "expired_challenge",
            "transaction_failed",
        ] {
            assert!(text.contains(&format!("error=\"{kind}\"")), "{kind} not recorded");
        }
        assert!(text.contains("accredit_credentials_minted_total{kind=\"achievement\"} 2"));
    }
}
