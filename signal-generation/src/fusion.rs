//! Weighted fusion of trend, prediction and sentiment into one confidence

use crate::chart::TrendAssessment;
use crate::model::PredictionResult;
use common::{Direction, EngineError, Result};
use serde::{Deserialize, Serialize};

/// Fusion weights and gating threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "default_trend_weight")]
    pub trend_weight: f64,

    #[serde(default = "default_prediction_weight")]
    pub prediction_weight: f64,

    #[serde(default = "default_sentiment_weight")]
    pub sentiment_weight: f64,

    /// Fused confidence below this suppresses the cycle
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Multiplier applied while the feed reports a gap
    #[serde(default = "default_gap_penalty")]
    pub gap_penalty: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            trend_weight: default_trend_weight(),
            prediction_weight: default_prediction_weight(),
            sentiment_weight: default_sentiment_weight(),
            min_confidence: default_min_confidence(),
            gap_penalty: default_gap_penalty(),
        }
    }
}

fn default_trend_weight() -> f64 {
    0.4
}

fn default_prediction_weight() -> f64 {
    0.4
}

fn default_sentiment_weight() -> f64 {
    0.2
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_gap_penalty() -> f64 {
    0.75
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [self.trend_weight, self.prediction_weight, self.sentiment_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::Config("fusion weights must be >= 0".into()));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(EngineError::Config("fusion weights must not all be zero".into()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(EngineError::Config("fusion.min_confidence must be in [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&self.gap_penalty) {
            return Err(EngineError::Config("fusion.gap_penalty must be in [0, 1]".into()));
        }
        Ok(())
    }

    fn total_weight(&self) -> f64 {
        self.trend_weight + self.prediction_weight + self.sentiment_weight
    }
}

/// Analyzer outputs gathered for one cycle
#[derive(Debug, Clone)]
pub struct FusionInputs<'a> {
    pub trend: &'a TrendAssessment,
    /// `None` when the model timed out or returned an invalid distribution
    pub prediction: Option<&'a PredictionResult>,
    /// Sentiment in [-1, 1]
    pub sentiment_value: f64,
    /// Sentiment confidence after staleness decay; 0 means ignore
    pub sentiment_confidence: f64,
    pub gap_detected: bool,
}

/// Result of fusing one cycle's inputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fusion {
    Directional { direction: Direction, confidence: f64 },
    /// The chart reports no trend
    NeutralTrend,
    /// Prediction is neutral or points against the trend
    Disagreement,
}

/// Combine the inputs into a direction and confidence in [0, 1].
///
/// Each agreeing input adds its weight times its own confidence: trend
/// strength, prediction margin, and sentiment confidence scaled by how far the
/// sentiment leans the same way. A missing prediction contributes 0.
pub fn fuse(config: &FusionConfig, inputs: &FusionInputs<'_>) -> Fusion {
    let Some(direction) = inputs.trend.direction.to_direction() else {
        return Fusion::NeutralTrend;
    };

    let prediction_component = match inputs.prediction {
        Some(prediction) => {
            if prediction.direction() != inputs.trend.direction {
                return Fusion::Disagreement;
            }
            prediction.margin()
        }
        None => 0.0,
    };

    let sentiment_value = inputs.sentiment_value.clamp(-1.0, 1.0);
    let sentiment_confidence = inputs.sentiment_confidence.clamp(0.0, 1.0);
    let sentiment_component = sentiment_confidence * (1.0 + sentiment_value * direction.sign()) / 2.0;

    let weighted = config.trend_weight * inputs.trend.strength.clamp(0.0, 1.0)
        + config.prediction_weight * prediction_component
        + config.sentiment_weight * sentiment_component;

    let mut confidence = weighted / config.total_weight();
    if inputs.gap_detected {
        confidence *= config.gap_penalty;
    }

    Fusion::Directional {
        direction,
        confidence: confidence.clamp(0.0, 1.0),
    }
}
