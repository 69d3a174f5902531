//! # Prometheus Metrics
//!
//! Pipeline metrics in a dedicated [`prometheus::Registry`], scraped at
//! `/metrics`. Ledger and submitter counters are sampled from the devnet on
//! every scrape; pipeline outcomes are recorded as they happen.

use std::sync::Arc;

use accredit_contracts::Devnet;
use accredit_protocol::error::ProtocolError;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    pub sessions_certified_total: IntCounter,
    pub credentials_minted_total: IntCounterVec,
    /// Failures by error kind.
    pub pipeline_failures_total: IntCounterVec,
    pub proving_seconds: Histogram,
    pub ledger_block_number: IntGauge,
    pub ledger_pool_size: IntGauge,
    /// Relayer submission counters, by outcome.
    pub relayer_transactions: prometheus::IntGaugeVec,
}

fn register<C: prometheus::core::Collector + Clone + 'static>(
    registry: &Registry,
    collector: C,
) -> Result<C, prometheus::Error> {
    registry.register(Box::new(collector.clone()))?;
    Ok(collector)
}

impl NodeMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("accredit".into()), None)?;

        let sessions_certified_total = register(
            &registry,
            IntCounter::new("sessions_certified_total", "Learning sessions that reached verified")?,
        )?;
        let credentials_minted_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("credentials_minted_total", "Credentials minted, by kind"),
                &["kind"],
            )?,
        )?;
        let pipeline_failures_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new("pipeline_failures_total", "Pipeline operations that failed, by error kind"),
                &["error"],
            )?,
        )?;
        let proving_seconds = register(
            &registry,
            Histogram::with_opts(
                HistogramOpts::new("proving_seconds", "Wall time of one bind-and-prove job")
                    .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            )?,
        )?;
        let ledger_block_number = register(
            &registry,
            IntGauge::new("ledger_block_number", "Latest block of the local ledger")?,
        )?;
        let ledger_pool_size = register(
            &registry,
            IntGauge::new("ledger_pool_size", "Transactions waiting in the ledger pool")?,
        )?;
        let relayer_transactions = register(
            &registry,
            prometheus::IntGaugeVec::new(
                Opts::new("relayer_transactions", "Relayer submission counters, by outcome"),
                &["outcome"],
            )?,
        )?;

        Ok(Self {
            registry,
            sessions_certified_total,
            credentials_minted_total,
            pipeline_failures_total,
            proving_seconds,
            ledger_block_number,
            ledger_pool_size,
            relayer_transactions,
        })
    }

    pub fn record_failure(&self, error: &ProtocolError) {
        self.pipeline_failures_total
            .with_label_values(&[error_kind(error)])
            .inc();
    }

    /// Copy the devnet's live counters into the gauges.
    pub fn sample(&self, devnet: &Devnet) {
        self.ledger_block_number.set(devnet.ledger.block_number() as i64);
        self.ledger_pool_size.set(devnet.ledger.pool_size() as i64);
        let stats = devnet.platform.stats();
        for (outcome, value) in [
            ("sent", stats.sent()),
            ("confirmed", stats.confirmed()),
            ("reverted", stats.reverted()),
            ("retries", stats.retries()),
            ("exhausted", stats.exhausted()),
            ("pending", stats.pending()),
        ] {
            self.relayer_transactions
                .with_label_values(&[outcome])
                .set(value as i64);
        }
    }

    /// Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Stable label for an error variant.
pub fn error_kind(error: &ProtocolError) -> &'static str {
    match error {
        ProtocolError::InvalidModule { .. } => "invalid_module",
        ProtocolError::InvalidAchievementType(_) => "invalid_achievement_type",
        ProtocolError::SessionNotFound(_) => "session_not_found",
        ProtocolError::DuplicateSession { .. } => "duplicate_session",
        ProtocolError::UnknownValidator(_) => "unknown_validator",
        ProtocolError::AlreadyVerified(_) => "already_verified",
        ProtocolError::InsufficientApprovals { .. } => "insufficient_approvals",
        ProtocolError::ConstraintViolation(_) => "constraint_violation",
        ProtocolError::ProvingFailed(_) => "proving_failed",
        ProtocolError::InvalidProof(_) => "invalid_proof",
        ProtocolError::DuplicateProof(_) => "duplicate_proof",
        ProtocolError::RateLimited { .. } => "rate_limited",
        ProtocolError::SignatureMismatch(_) => "signature_mismatch",
        ProtocolError::ExpiredChallenge(_) => "expired_challenge",
        ProtocolError::UnauthorizedSigner(_) => "unauthorized_signer",
        ProtocolError::MintRejected(_) => "mint_rejected",
        ProtocolError::TransactionFailed { .. } => "transaction_failed",
        ProtocolError::SubmissionPending { .. } => "submission_pending",
        ProtocolError::Storage { .. } => "storage",
    }
}

/// Everything the HTTP handlers share.
#[derive(Clone)]
pub struct MetricsState {
    pub metrics: Arc<NodeMetrics>,
    pub devnet: Arc<Devnet>,
}

/// `GET /metrics`.
pub async fn metrics_handler(State(state): State<MetricsState>) -> impl IntoResponse {
    state.metrics.sample(&state.devnet);
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accredit_protocol::zkp::ProofId;

    #[test]
    fn failures_are_labelled_by_kind() {
        let metrics = NodeMetrics::new().unwrap();
        metrics.record_failure(&ProtocolError::DuplicateProof(ProofId::from_bytes([1; 32])));
        metrics.record_failure(&ProtocolError::DuplicateProof(ProofId::from_bytes([2; 32])));
        metrics.credentials_minted_total.with_label_values(&["module"]).inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("accredit_pipeline_failures_total{error=\"duplicate_proof\"} 2"));
        assert!(text.contains("accredit_credentials_minted_total{kind=\"module\"} 1"));
    }
}
