//! Prometheus counters for evaluation outcomes

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Per-instrument signal counters, registered on a private registry
#[derive(Clone)]
pub struct SignalMetrics {
    registry: Registry,
    evaluations: IntCounterVec,
    distribution_failures: IntCounterVec,
    skipped_ticks: IntCounterVec,
}

impl SignalMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("signal_engine".into()), None)?;

        let evaluations = IntCounterVec::new(
            Opts::new("evaluations_total", "Evaluation cycles by outcome"),
            &["instrument", "outcome"],
        )?;
        let distribution_failures = IntCounterVec::new(
            Opts::new(
                "distribution_failures_total",
                "Predictions rejected as invalid distributions",
            ),
            &["instrument"],
        )?;
        let skipped_ticks = IntCounterVec::new(
            Opts::new(
                "skipped_ticks_total",
                "Ticks skipped while an evaluation was in flight",
            ),
            &["instrument"],
        )?;

        registry.register(Box::new(evaluations.clone()))?;
        registry.register(Box::new(distribution_failures.clone()))?;
        registry.register(Box::new(skipped_ticks.clone()))?;

        Ok(Self {
            registry,
            evaluations,
            distribution_failures,
            skipped_ticks,
        })
    }

    /// `outcome` is "emitted", "cooldown" or a suppression reason
    pub fn record_outcome(&self, instrument: &str, outcome: &str) {
        self.evaluations
            .with_label_values(&[instrument, outcome])
            .inc();
    }

    pub fn record_distribution_failure(&self, instrument: &str) {
        self.distribution_failures
            .with_label_values(&[instrument])
            .inc();
    }

    pub fn record_skipped_tick(&self, instrument: &str) {
        self.skipped_ticks.with_label_values(&[instrument]).inc();
    }

    pub fn outcome_count(&self, instrument: &str, outcome: &str) -> u64 {
        self.evaluations
            .with_label_values(&[instrument, outcome])
            .get()
    }

    /// Text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
