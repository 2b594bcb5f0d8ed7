//! Inference contract for short-horizon direction models

use crate::features::{FeatureConfig, FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
use anyhow::Context;
use chrono::{DateTime, Utc};
use common::{EngineError, Result, TrendDirection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Tolerance on the probability sum
pub const DISTRIBUTION_EPSILON: f64 = 1e-6;

/// Probability distribution over the next move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub p_up: f64,
    pub p_down: f64,
    pub p_neutral: f64,
    pub horizon_secs: i64,
    pub computed_at: DateTime<Utc>,
}

impl PredictionResult {
    /// Build a result, rejecting anything that is not a probability simplex
    pub fn new(
        p_up: f64,
        p_down: f64,
        p_neutral: f64,
        horizon_secs: i64,
        computed_at: DateTime<Utc>,
    ) -> Result<Self> {
        validate_distribution(p_up, p_down, p_neutral)?;
        Ok(Self {
            p_up,
            p_down,
            p_neutral,
            horizon_secs,
            computed_at,
        })
    }

    /// Most likely outcome; ties resolve to neutral
    pub fn direction(&self) -> TrendDirection {
        if self.p_up > self.p_down && self.p_up > self.p_neutral {
            TrendDirection::Up
        } else if self.p_down > self.p_up && self.p_down > self.p_neutral {
            TrendDirection::Down
        } else {
            TrendDirection::Neutral
        }
    }

    pub fn max_probability(&self) -> f64 {
        self.p_up.max(self.p_down).max(self.p_neutral)
    }

    /// (max probability - 0.5) * 2, clamped to [0, 1]
    pub fn margin(&self) -> f64 {
        ((self.max_probability() - 0.5) * 2.0).clamp(0.0, 1.0)
    }
}

pub fn validate_distribution(p_up: f64, p_down: f64, p_neutral: f64) -> Result<()> {
    for (name, p) in [("p_up", p_up), ("p_down", p_down), ("p_neutral", p_neutral)] {
        if !p.is_finite() || p < -DISTRIBUTION_EPSILON || p > 1.0 + DISTRIBUTION_EPSILON {
            return Err(EngineError::InvalidDistribution(format!(
                "{} = {} is not a probability",
                name, p
            )));
        }
    }
    let sum = p_up + p_down + p_neutral;
    if (sum - 1.0).abs() > DISTRIBUTION_EPSILON {
        return Err(EngineError::InvalidDistribution(format!(
            "probabilities sum to {}",
            sum
        )));
    }
    Ok(())
}

/// A trained direction model.
///
/// `predict` must not mutate hidden state; the pipeline runs it on a blocking
/// thread and may discard late results.
pub trait PredictiveModel: Send + Sync + 'static {
    fn predict(&self, features: &FeatureVector) -> Result<PredictionResult>;

    fn name(&self) -> &str;
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Forecast horizon reported on every prediction
    #[serde(default = "default_horizon_secs")]
    pub horizon_secs: i64,

    /// JSON file with `SoftmaxWeights`; built-in momentum weights if unset
    #[serde(default)]
    pub weights_path: Option<String>,

    #[serde(default)]
    pub features: FeatureConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            horizon_secs: default_horizon_secs(),
            weights_path: None,
            features: FeatureConfig::default(),
        }
    }
}

fn default_horizon_secs() -> i64 {
    300
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.horizon_secs <= 0 {
            return Err(EngineError::Config("model.horizon_secs must be positive".into()));
        }
        self.features.validate()
    }
}

/// Linear logits per outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxWeights {
    pub up: [f64; FEATURE_COUNT],
    pub down: [f64; FEATURE_COUNT],
    pub neutral: [f64; FEATURE_COUNT],
    /// Bias for (up, down, neutral)
    pub bias: [f64; 3],
}

impl Default for SoftmaxWeights {
    /// Momentum-following weights
    fn default() -> Self {
        let up = [0.4, 0.2, 0.0, 0.3, 1.5, 0.8, 0.1];
        let down = up.map(|w| -w);
        Self {
            up,
            down,
            neutral: [0.0, 0.0, 0.3, 0.0, 0.0, 0.0, 0.0],
            bias: [0.0, 0.0, 0.2],
        }
    }
}

/// Multinomial logistic model over the feature vector
#[derive(Debug, Clone)]
pub struct SoftmaxModel {
    weights: SoftmaxWeights,
    horizon_secs: i64,
}

impl Default for SoftmaxModel {
    fn default() -> Self {
        Self::new(SoftmaxWeights::default(), default_horizon_secs())
    }
}

impl SoftmaxModel {
    pub fn new(weights: SoftmaxWeights, horizon_secs: i64) -> Self {
        Self {
            weights,
            horizon_secs,
        }
    }

    pub fn from_config(config: &ModelConfig) -> anyhow::Result<Self> {
        let weights = match &config.weights_path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading model weights {}", path))?;
                let weights: SoftmaxWeights = serde_json::from_str(&content)
                    .with_context(|| format!("parsing model weights {}", path))?;
                info!(path = %path, "Loaded model weights");
                weights
            }
            None => SoftmaxWeights::default(),
        };
        Ok(Self::new(weights, config.horizon_secs))
    }

    fn logit(row: &[f64; FEATURE_COUNT], bias: f64, x: &[f64; FEATURE_COUNT]) -> f64 {
        row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + bias
    }
}

impl PredictiveModel for SoftmaxModel {
    fn predict(&self, features: &FeatureVector) -> Result<PredictionResult> {
        let x = &features.values;
        let logits = [
            Self::logit(&self.weights.up, self.weights.bias[0], x),
            Self::logit(&self.weights.down, self.weights.bias[1], x),
            Self::logit(&self.weights.neutral, self.weights.bias[2], x),
        ];
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp = logits.map(|l| (l - max).exp());
        let total: f64 = exp.iter().sum();

        if tracing::enabled!(tracing::Level::TRACE) {
            for (name, value) in FEATURE_NAMES.iter().zip(x) {
                tracing::trace!(feature = *name, value, "Model input");
            }
        }
        debug!(?logits, "Softmax logits");

        PredictionResult::new(
            exp[0] / total,
            exp[1] / total,
            exp[2] / total,
            self.horizon_secs,
            features.computed_at,
        )
    }

    fn name(&self) -> &str {
        "softmax"
    }
}
