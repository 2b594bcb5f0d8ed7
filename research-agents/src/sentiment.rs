//! Sentiment aggregation
//!
//! Collapses a batch of raw sentiment samples into one score:
//! - each sample is weighted by exponential recency decay, source
//!   reliability and its own confidence
//! - samples older than the staleness window are ignored
//! - an empty or fully stale batch yields confidence 0 (neutral), not an error

use super::lexicon::Lexicon;
use chrono::{DateTime, Utc};
use common::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// A single sentiment observation from a collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSentiment {
    pub source: String,
    pub timestamp: DateTime<Utc>,
    /// Polarity: -1.0 (very negative) to 1.0 (very positive)
    pub value: f64,
    /// Collector's own certainty, 0.0 to 1.0
    #[serde(default = "default_sample_confidence")]
    pub confidence: f64,
}

fn default_sample_confidence() -> f64 {
    1.0
}

impl RawSentiment {
    pub fn new(source: impl Into<String>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            source: source.into(),
            timestamp,
            value,
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Score free text with a lexicon.
    pub fn from_text(
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
        text: &str,
        lexicon: &Lexicon,
    ) -> Self {
        Self::new(source, timestamp, lexicon.score(text))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.value.is_finite() || !(-1.0..=1.0).contains(&self.value) {
            return Err(EngineError::MalformedSignal(format!(
                "{}: value {} outside [-1, 1]",
                self.source, self.value
            )));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(EngineError::MalformedSignal(format!(
                "{}: confidence {} outside [0, 1]",
                self.source, self.confidence
            )));
        }
        Ok(())
    }
}

/// Aggregated sentiment for one evaluation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentScore {
    /// -1.0 to 1.0
    pub value: f64,
    /// 0.0 to 1.0; 0.0 means "ignore this input"
    pub confidence: f64,
    pub sample_count: u32,
    pub computed_at: DateTime<Utc>,
}

impl SentimentScore {
    pub fn neutral(computed_at: DateTime<Utc>) -> Self {
        Self {
            value: 0.0,
            confidence: 0.0,
            sample_count: 0,
            computed_at,
        }
    }

    /// Confidence as seen at `now`: unchanged inside the staleness window,
    /// halving every half-life beyond it.
    pub fn effective_confidence(&self, now: DateTime<Utc>, config: &SentimentConfig) -> f64 {
        let age = (now - self.computed_at).num_milliseconds() as f64 / 1000.0;
        let staleness = config.staleness_secs as f64;
        if age <= staleness {
            return self.confidence;
        }
        self.confidence * decay(age - staleness, config.half_life_secs)
    }
}

/// Sentiment aggregation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentConfig {
    /// Recency half-life for sample weights
    #[serde(default = "default_half_life_secs")]
    pub half_life_secs: f64,

    /// Samples older than this are dropped
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: i64,

    /// Total weight at which confidence reaches 0.5
    #[serde(default = "default_confidence_saturation")]
    pub confidence_saturation: f64,

    /// Reliability weight per source name
    #[serde(default = "default_source_weights")]
    pub source_weights: HashMap<String, f64>,

    /// Reliability for sources not listed above
    #[serde(default = "default_source_weight")]
    pub default_source_weight: f64,
}

impl Default for SentimentConfig {
    fn default() -> Self {
        Self {
            half_life_secs: default_half_life_secs(),
            staleness_secs: default_staleness_secs(),
            confidence_saturation: default_confidence_saturation(),
            source_weights: default_source_weights(),
            default_source_weight: default_source_weight(),
        }
    }
}

fn default_half_life_secs() -> f64 {
    1800.0
}

fn default_staleness_secs() -> i64 {
    3600
}

fn default_confidence_saturation() -> f64 {
    3.0
}

fn default_source_weights() -> HashMap<String, f64> {
    let mut weights = HashMap::new();
    weights.insert("market".to_string(), 0.4);
    weights.insert("social".to_string(), 0.3);
    weights.insert("dex".to_string(), 0.3);
    weights
}

fn default_source_weight() -> f64 {
    0.3
}

impl SentimentConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.half_life_secs > 0.0) {
            return Err(EngineError::Config("sentiment.half_life_secs must be positive".into()));
        }
        if self.staleness_secs <= 0 {
            return Err(EngineError::Config("sentiment.staleness_secs must be positive".into()));
        }
        if !(self.confidence_saturation > 0.0) {
            return Err(EngineError::Config(
                "sentiment.confidence_saturation must be positive".into(),
            ));
        }
        let weights = self
            .source_weights
            .values()
            .chain(std::iter::once(&self.default_source_weight));
        for w in weights {
            if !w.is_finite() || *w < 0.0 {
                return Err(EngineError::Config(format!(
                    "sentiment source weight {} must be non-negative",
                    w
                )));
            }
        }
        Ok(())
    }

    fn reliability(&self, source: &str) -> f64 {
        self.source_weights
            .get(source)
            .copied()
            .unwrap_or(self.default_source_weight)
    }
}

fn decay(age_secs: f64, half_life_secs: f64) -> f64 {
    0.5_f64.powf(age_secs.max(0.0) / half_life_secs)
}

/// Recency- and reliability-weighted sentiment aggregator
#[derive(Debug, Clone, Default)]
pub struct SentimentAggregator {
    config: SentimentConfig,
}

impl SentimentAggregator {
    pub fn new(config: SentimentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SentimentConfig {
        &self.config
    }

    /// Aggregate a batch as of `now`.
    ///
    /// Fails only if a sample is out of range; the whole batch is rejected
    /// so a single bad collector cannot skew the score.
    pub fn aggregate(&self, raw: &[RawSentiment], now: DateTime<Utc>) -> Result<SentimentScore> {
        for sample in raw {
            sample.validate()?;
        }

        let staleness = chrono::Duration::seconds(self.config.staleness_secs);
        let weighted: Vec<(f64, f64)> = raw
            .iter()
            .filter(|s| now - s.timestamp <= staleness)
            .map(|s| {
                // Samples stamped slightly in the future count as fresh
                let age = (now - s.timestamp).num_milliseconds() as f64 / 1000.0;
                let weight = decay(age, self.config.half_life_secs)
                    * self.config.reliability(&s.source)
                    * s.confidence;
                (weight, s.value)
            })
            .collect();

        let total_weight: f64 = weighted.iter().map(|(w, _)| w).sum();
        if weighted.is_empty() || total_weight <= f64::EPSILON {
            debug!(
                samples = raw.len(),
                "No fresh sentiment samples, returning neutral score"
            );
            return Ok(SentimentScore {
                sample_count: weighted.len() as u32,
                ..SentimentScore::neutral(now)
            });
        }

        let mean = weighted.iter().map(|(w, v)| w * v).sum::<f64>() / total_weight;
        let variance =
            weighted.iter().map(|(w, v)| w * (v - mean).powi(2)).sum::<f64>() / total_weight;

        // Volume of evidence, discounted by disagreement between samples
        let evidence = total_weight / (total_weight + self.config.confidence_saturation);
        let consistency = 1.0 - variance.sqrt().min(1.0);
        let confidence = (evidence * consistency).clamp(0.0, 1.0);

        debug!(
            samples = weighted.len(),
            value = mean,
            confidence,
            "Aggregated sentiment"
        );

        Ok(SentimentScore {
            value: mean.clamp(-1.0, 1.0),
            confidence,
            sample_count: weighted.len() as u32,
            computed_at: now,
        })
    }
}
