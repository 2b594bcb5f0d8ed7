// Signal Generation Pipeline
// Per-instrument state machine: gather analyzer outputs, fuse, size, gate,
// de-duplicate, emit

use crate::chart::{ChartAnalyzer, ChartConfig, TrendAssessment};
use crate::dedup::RecentSignals;
use crate::features::{FeatureConfig, FeatureExtractor};
use crate::fusion::{fuse, Fusion, FusionConfig, FusionInputs};
use crate::metrics::SignalMetrics;
use crate::model::{PredictionResult, PredictiveModel};
use crate::signals::{FingerprintKey, Signal};
use crate::validators::{default_validators, GateConfig, SignalValidator};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{EngineError, ErrorCategory, Result};
use data_ingestion::TimeSeries;
use portfolio_risk::{RiskManager, RiskParameters};
use research_agents::{RawSentiment, SentimentAggregator, SentimentSource};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for the per-instrument pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Time between evaluation ticks
    #[serde(default = "default_evaluation_interval_ms")]
    pub evaluation_interval_ms: u64,

    /// Minimum time between two emissions with the same fingerprint
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,

    /// How long emitted fingerprints are remembered (and rehydrated)
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: i64,

    /// Maximum fingerprints kept per instrument
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Naive stop distance in ATRs
    #[serde(default = "default_stop_atr_multiple")]
    pub stop_atr_multiple: f64,

    /// Decimal places kept when fingerprinting prices
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,

    /// Fingerprint time bucket
    #[serde(default = "default_time_bucket_secs")]
    pub time_bucket_secs: i64,

    /// Bounded wait for model inference
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,

    /// Bounded wait for sentiment collection
    #[serde(default = "default_sentiment_timeout_ms")]
    pub sentiment_timeout_ms: u64,

    /// Consecutive invalid distributions before alerting
    #[serde(default = "default_distribution_alert_threshold")]
    pub distribution_alert_threshold: u32,

    #[serde(default)]
    pub gates: GateConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_ms: default_evaluation_interval_ms(),
            cooldown_secs: default_cooldown_secs(),
            dedup_window_secs: default_dedup_window_secs(),
            dedup_capacity: default_dedup_capacity(),
            stop_atr_multiple: default_stop_atr_multiple(),
            price_precision: default_price_precision(),
            time_bucket_secs: default_time_bucket_secs(),
            model_timeout_ms: default_model_timeout_ms(),
            sentiment_timeout_ms: default_sentiment_timeout_ms(),
            distribution_alert_threshold: default_distribution_alert_threshold(),
            gates: GateConfig::default(),
        }
    }
}

fn default_evaluation_interval_ms() -> u64 {
    5_000
}

fn default_cooldown_secs() -> i64 {
    900
}

fn default_dedup_window_secs() -> i64 {
    3_600
}

fn default_dedup_capacity() -> usize {
    256
}

fn default_stop_atr_multiple() -> f64 {
    2.0
}

fn default_price_precision() -> u32 {
    2
}

fn default_time_bucket_secs() -> i64 {
    300
}

fn default_model_timeout_ms() -> u64 {
    250
}

fn default_sentiment_timeout_ms() -> u64 {
    250
}

fn default_distribution_alert_threshold() -> u32 {
    3
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.evaluation_interval_ms == 0 {
            return Err(EngineError::Config(
                "pipeline.evaluation_interval_ms must be positive".into(),
            ));
        }
        if self.cooldown_secs <= 0 || self.time_bucket_secs <= 0 {
            return Err(EngineError::Config(
                "pipeline.cooldown_secs and pipeline.time_bucket_secs must be positive".into(),
            ));
        }
        if self.dedup_window_secs < self.cooldown_secs {
            return Err(EngineError::Config(format!(
                "pipeline.dedup_window_secs ({}) must be at least cooldown_secs ({})",
                self.dedup_window_secs, self.cooldown_secs
            )));
        }
        if self.dedup_capacity == 0 {
            return Err(EngineError::Config("pipeline.dedup_capacity must be positive".into()));
        }
        if !self.stop_atr_multiple.is_finite() || self.stop_atr_multiple <= 0.0 {
            return Err(EngineError::Config(
                "pipeline.stop_atr_multiple must be positive".into(),
            ));
        }
        if self.model_timeout_ms == 0 || self.sentiment_timeout_ms == 0 {
            return Err(EngineError::Config("pipeline timeouts must be positive".into()));
        }
        if self.distribution_alert_threshold == 0 {
            return Err(EngineError::Config(
                "pipeline.distribution_alert_threshold must be positive".into(),
            ));
        }
        self.gates.validate()
    }
}

/// Pipeline state. Every evaluation runs
/// `Idle -> Evaluating -> {Emitted, Suppressed, Cooldown} -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    Evaluating,
    Emitted,
    Suppressed,
    Cooldown,
}

/// Why a cycle produced no signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    InsufficientData,
    NeutralTrend,
    Disagreement,
    LowConfidence,
    PositionTooSmall,
    InvalidLevels,
    /// A quality gate rejected the sized candidate
    QualityGate(&'static str),
    /// Unexpected analyzer failure
    AnalysisError,
}

impl SuppressReason {
    fn from_error(error: &EngineError) -> Self {
        match error {
            EngineError::InsufficientData { .. } => SuppressReason::InsufficientData,
            EngineError::PositionTooSmall { .. } => SuppressReason::PositionTooSmall,
            EngineError::InvalidLevels(_) => SuppressReason::InvalidLevels,
            _ => SuppressReason::AnalysisError,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SuppressReason::InsufficientData => "insufficient_data",
            SuppressReason::NeutralTrend => "neutral_trend",
            SuppressReason::Disagreement => "disagreement",
            SuppressReason::LowConfidence => "low_confidence",
            SuppressReason::PositionTooSmall => "position_too_small",
            SuppressReason::InvalidLevels => "invalid_levels",
            SuppressReason::QualityGate(gate) => *gate,
            SuppressReason::AnalysisError => "analysis_error",
        }
    }
}

/// Result of one evaluation cycle
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    Emitted(Signal),
    Suppressed(SuppressReason),
    /// An identical signal was emitted within the cooldown window
    Cooldown { fingerprint: String },
}

impl EvaluationOutcome {
    pub fn state(&self) -> PipelineState {
        match self {
            EvaluationOutcome::Emitted(_) => PipelineState::Emitted,
            EvaluationOutcome::Suppressed(_) => PipelineState::Suppressed,
            EvaluationOutcome::Cooldown { .. } => PipelineState::Cooldown,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EvaluationOutcome::Emitted(_) => "emitted",
            EvaluationOutcome::Suppressed(reason) => reason.label(),
            EvaluationOutcome::Cooldown { .. } => "cooldown",
        }
    }

    pub fn signal(&self) -> Option<&Signal> {
        match self {
            EvaluationOutcome::Emitted(signal) => Some(signal),
            _ => None,
        }
    }
}

/// Per-instrument counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub evaluations: u64,
    pub emitted: u64,
    pub cooldowns: u64,
    pub suppressed: HashMap<String, u64>,
    pub distribution_failures: u64,
    pub last_emitted_at: Option<DateTime<Utc>>,
    emission_intervals: u64,
    emission_interval_total_secs: f64,
}

impl PipelineStats {
    pub fn suppressed_total(&self) -> u64 {
        self.suppressed.values().sum()
    }

    /// Mean time between consecutive emissions
    pub fn mean_emission_interval_secs(&self) -> Option<f64> {
        (self.emission_intervals > 0)
            .then(|| self.emission_interval_total_secs / self.emission_intervals as f64)
    }
}

/// Escalation target for repeated model failures
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn alert(&self, instrument: &str, consecutive_failures: u32, error: &EngineError);
}

/// Logs alerts at error level
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn alert(&self, instrument: &str, consecutive_failures: u32, error: &EngineError) {
        error!(
            instrument = %instrument,
            consecutive_failures,
            "🚨 Predictive model unavailable: {}",
            error
        );
    }
}

/// One instrument's evaluation pipeline.
///
/// `evaluate` takes `&mut self`, so a pipeline can only run one evaluation
/// at a time; the engine wraps each pipeline in its own lock.
pub struct InstrumentPipeline {
    instrument: String,
    config: PipelineConfig,
    chart: ChartAnalyzer,
    features: FeatureExtractor,
    model: Arc<dyn PredictiveModel>,
    sentiment: Option<(Arc<dyn SentimentSource>, Arc<SentimentAggregator>)>,
    fusion: FusionConfig,
    risk: RiskManager,
    extra_validators: Vec<Box<dyn SignalValidator>>,
    alerts: Arc<dyn AlertSink>,
    metrics: Option<SignalMetrics>,
    recent: RecentSignals,
    state: PipelineState,
    consecutive_distribution_failures: u32,
    stats: PipelineStats,
}

impl InstrumentPipeline {
    /// Create a pipeline with default analyzers and no sentiment source
    pub fn new(
        instrument: impl Into<String>,
        config: PipelineConfig,
        model: Arc<dyn PredictiveModel>,
    ) -> Self {
        let recent = RecentSignals::new(
            config.dedup_capacity,
            Duration::seconds(config.cooldown_secs),
            Duration::seconds(config.dedup_window_secs),
        );
        Self {
            instrument: instrument.into(),
            config,
            chart: ChartAnalyzer::default(),
            features: FeatureExtractor::default(),
            model,
            sentiment: None,
            fusion: FusionConfig::default(),
            risk: RiskManager::default(),
            extra_validators: Vec::new(),
            alerts: Arc::new(LogAlertSink),
            metrics: None,
            recent,
            state: PipelineState::Idle,
            consecutive_distribution_failures: 0,
            stats: PipelineStats::default(),
        }
    }

    pub fn with_chart(mut self, config: ChartConfig) -> Self {
        self.chart = ChartAnalyzer::new(config);
        self
    }

    pub fn with_features(mut self, config: FeatureConfig) -> Self {
        self.features = FeatureExtractor::new(config);
        self
    }

    pub fn with_fusion(mut self, config: FusionConfig) -> Self {
        self.fusion = config;
        self
    }

    pub fn with_risk(mut self, risk: RiskManager) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_sentiment(
        mut self,
        source: Arc<dyn SentimentSource>,
        aggregator: Arc<SentimentAggregator>,
    ) -> Self {
        self.sentiment = Some((source, aggregator));
        self
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    pub fn with_metrics(mut self, metrics: SignalMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Add a gate run after the default ones
    pub fn add_validator(mut self, validator: Box<dyn SignalValidator>) -> Self {
        info!(instrument = %self.instrument, gate = validator.name(), "Adding signal validator");
        self.extra_validators.push(validator);
        self
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Restore cooldown state from previously emitted signals
    pub fn rehydrate(&mut self, signals: &[Signal]) -> usize {
        let instrument = self.instrument.clone();
        self.recent
            .rehydrate(signals.iter().filter(|s| s.instrument == instrument))
    }

    /// Run one evaluation cycle. Never fails: every analyzer error degrades to
    /// a lower confidence or a suppressed cycle.
    pub async fn evaluate(
        &mut self,
        series: &TimeSeries,
        params: &RiskParameters,
        now: DateTime<Utc>,
    ) -> EvaluationOutcome {
        self.transition(PipelineState::Evaluating);
        let outcome = self.run_cycle(series, params, now).await;
        self.transition(outcome.state());
        self.record(&outcome);
        self.transition(PipelineState::Idle);
        outcome
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(instrument = %self.instrument, from = ?self.state, to = ?next, "State transition");
        self.state = next;
    }

    async fn run_cycle(
        &mut self,
        series: &TimeSeries,
        params: &RiskParameters,
        now: DateTime<Utc>,
    ) -> EvaluationOutcome {
        let trend = match self.chart.assess(series) {
            Ok(trend) => trend,
            Err(e) => return self.suppress(SuppressReason::from_error(&e), &e.to_string()),
        };

        let prediction = self.predict(series, &trend).await;
        let (sentiment_value, sentiment_confidence) = self.gather_sentiment(now).await;

        let inputs = FusionInputs {
            trend: &trend,
            prediction: prediction.as_ref(),
            sentiment_value,
            sentiment_confidence,
            gap_detected: series.gap_detected(),
        };
        let (direction, confidence) = match fuse(&self.fusion, &inputs) {
            Fusion::Directional {
                direction,
                confidence,
            } => (direction, confidence),
            Fusion::NeutralTrend => {
                return self.suppress(SuppressReason::NeutralTrend, "no trend")
            }
            Fusion::Disagreement => {
                let detail = format!(
                    "trend {:?} vs prediction {:?}",
                    trend.direction,
                    prediction.as_ref().map(PredictionResult::direction)
                );
                return self.suppress(SuppressReason::Disagreement, &detail);
            }
        };

        if confidence < self.fusion.min_confidence {
            let detail = format!("{:.3} < {:.3}", confidence, self.fusion.min_confidence);
            return self.suppress(SuppressReason::LowConfidence, &detail);
        }

        let entry = trend.last_price;
        let naive_stop = entry - direction.sign() * trend.atr * self.config.stop_atr_multiple;
        let sized = match self
            .risk
            .size(direction, entry, naive_stop, &trend.levels(), params)
        {
            Ok(sized) => sized,
            Err(e) => return self.suppress(SuppressReason::from_error(&e), &e.to_string()),
        };

        let key = FingerprintKey::new(
            &self.instrument,
            direction,
            (entry, sized.stop_loss, sized.take_profit),
            now,
            self.config.price_precision,
            self.config.time_bucket_secs,
        );
        let candidate = Signal {
            id: Uuid::new_v4(),
            instrument: self.instrument.clone(),
            direction,
            entry,
            stop_loss: sized.stop_loss,
            take_profit: sized.take_profit,
            size: sized.size,
            confidence,
            risk_level: sized.risk_level,
            created_at: now,
            source_fingerprint: key.digest(),
        };

        if let Some(gate) = self.failed_gate(&candidate).await {
            return self.suppress(SuppressReason::QualityGate(gate), "quality gate");
        }

        if let Some(fingerprint) = self.cooldown_hit(&key, now) {
            debug!(instrument = %self.instrument, fingerprint = %fingerprint, "Duplicate within cooldown");
            return EvaluationOutcome::Cooldown { fingerprint };
        }

        self.recent.record(&candidate.source_fingerprint, now);
        info!(
            instrument = %self.instrument,
            direction = %candidate.direction,
            entry = candidate.entry,
            stop_loss = candidate.stop_loss,
            take_profit = candidate.take_profit,
            size = candidate.size,
            confidence = candidate.confidence,
            "Signal emitted"
        );
        EvaluationOutcome::Emitted(candidate)
    }

    fn suppress(&self, reason: SuppressReason, detail: &str) -> EvaluationOutcome {
        debug!(instrument = %self.instrument, reason = reason.label(), detail, "Cycle suppressed");
        EvaluationOutcome::Suppressed(reason)
    }

    /// Model inference on a blocking thread with a bounded wait.
    /// A late result is dropped with its task.
    async fn predict(
        &mut self,
        series: &TimeSeries,
        trend: &TrendAssessment,
    ) -> Option<PredictionResult> {
        let features = match self.features.extract(series, trend) {
            Ok(features) => features,
            Err(e) => {
                debug!(instrument = %self.instrument, "Features unavailable: {}", e);
                return None;
            }
        };

        let model = Arc::clone(&self.model);
        let task = tokio::task::spawn_blocking(move || model.predict(&features));
        let timeout = StdDuration::from_millis(self.config.model_timeout_ms);

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(prediction))) => {
                self.consecutive_distribution_failures = 0;
                Some(prediction)
            }
            Ok(Ok(Err(e))) => {
                self.on_model_error(e).await;
                None
            }
            Ok(Err(e)) => {
                warn!(instrument = %self.instrument, "Model task failed: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    instrument = %self.instrument,
                    timeout_ms = self.config.model_timeout_ms,
                    "Model timed out, ignoring prediction"
                );
                None
            }
        }
    }

    async fn on_model_error(&mut self, error: EngineError) {
        if error.category() != ErrorCategory::Distribution {
            warn!(instrument = %self.instrument, "Model failed: {}", error);
            return;
        }

        self.consecutive_distribution_failures += 1;
        self.stats.distribution_failures += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_distribution_failure(&self.instrument);
        }
        warn!(
            instrument = %self.instrument,
            consecutive = self.consecutive_distribution_failures,
            "Invalid model distribution: {}",
            error
        );

        if self.consecutive_distribution_failures % self.config.distribution_alert_threshold == 0 {
            self.alerts
                .alert(&self.instrument, self.consecutive_distribution_failures, &error)
                .await;
        }
    }

    /// (value, effective confidence); (0, 0) when unavailable
    async fn gather_sentiment(&self, now: DateTime<Utc>) -> (f64, f64) {
        let Some((source, aggregator)) = &self.sentiment else {
            return (0.0, 0.0);
        };

        let since = now - Duration::seconds(aggregator.config().staleness_secs);
        let timeout = StdDuration::from_millis(self.config.sentiment_timeout_ms);
        let raw = match tokio::time::timeout(timeout, source.collect(&self.instrument, since)).await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(instrument = %self.instrument, "Sentiment collection failed: {:#}", e);
                return (0.0, 0.0);
            }
            Err(_) => {
                warn!(instrument = %self.instrument, "Sentiment collection timed out");
                return (0.0, 0.0);
            }
        };

        let (valid, rejected): (Vec<RawSentiment>, Vec<RawSentiment>) =
            raw.into_iter().partition(|s| s.validate().is_ok());
        if !rejected.is_empty() {
            warn!(
                instrument = %self.instrument,
                rejected = rejected.len(),
                "Dropped malformed sentiment samples"
            );
        }

        match aggregator.aggregate(&valid, now) {
            Ok(score) => (
                score.value,
                score.effective_confidence(now, aggregator.config()),
            ),
            Err(e) => {
                warn!(instrument = %self.instrument, "Sentiment aggregation failed: {}", e);
                (0.0, 0.0)
            }
        }
    }

    /// Name of the first gate the candidate fails
    async fn failed_gate(&self, candidate: &Signal) -> Option<&'static str> {
        let defaults = default_validators(self.fusion.min_confidence, &self.config.gates);
        for validator in defaults.iter().chain(self.extra_validators.iter()) {
            match validator.validate(candidate).await {
                Ok(true) => {}
                Ok(false) => return Some(validator.name()),
                Err(e) => {
                    warn!(gate = validator.name(), "Validator failed: {:#}", e);
                    return Some(validator.name());
                }
            }
        }
        None
    }

    /// Fingerprint of a recent emission of the same levels still in cooldown.
    ///
    /// Checks every time bucket the cooldown window can reach back into.
    fn cooldown_hit(&mut self, key: &FingerprintKey, now: DateTime<Utc>) -> Option<String> {
        let bucket_secs = self.config.time_bucket_secs.max(1);
        let span = (self.recent.cooldown().num_seconds() + bucket_secs - 1) / bucket_secs;
        (0..=span)
            .map(|back| key.at_bucket(key.bucket() - back).digest())
            .find(|fingerprint| self.recent.in_cooldown(fingerprint, now))
    }

    fn record(&mut self, outcome: &EvaluationOutcome) {
        self.stats.evaluations += 1;
        match outcome {
            EvaluationOutcome::Emitted(signal) => {
                if let Some(last) = self.stats.last_emitted_at {
                    let interval = (signal.created_at - last).num_milliseconds() as f64 / 1000.0;
                    self.stats.emission_interval_total_secs += interval;
                    self.stats.emission_intervals += 1;
                }
                self.stats.last_emitted_at = Some(signal.created_at);
                self.stats.emitted += 1;
            }
            EvaluationOutcome::Suppressed(reason) => {
                *self
                    .stats
                    .suppressed
                    .entry(reason.label().to_string())
                    .or_insert(0) += 1;
            }
            EvaluationOutcome::Cooldown { .. } => self.stats.cooldowns += 1,
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_outcome(&self.instrument, outcome.label());
        }
    }
}
