// Signal Validators
// Quality gates applied to a sized candidate before it is emitted

use crate::signals::Signal;
use anyhow::Result;
use common::EngineError;
use portfolio_risk::RiskLevel;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Trait for signal validators
#[async_trait::async_trait]
pub trait SignalValidator: Send + Sync {
    async fn validate(&self, signal: &Signal) -> Result<bool>;

    /// Label used in suppression reasons and metrics
    fn name(&self) -> &'static str;
}

/// Thresholds for the default quality gates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum |take_profit - entry| / entry (0.001 = 0.1%)
    #[serde(default = "default_min_expected_profit")]
    pub min_expected_profit: f64,

    /// Minimum reward:risk of the validated levels
    #[serde(default = "default_min_reward_risk")]
    pub min_reward_risk: f64,

    /// Highest risk level allowed through
    #[serde(default = "default_max_risk_level")]
    pub max_risk_level: RiskLevel,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_expected_profit: default_min_expected_profit(),
            min_reward_risk: default_min_reward_risk(),
            max_risk_level: default_max_risk_level(),
        }
    }
}

fn default_min_expected_profit() -> f64 {
    0.001
}

fn default_min_reward_risk() -> f64 {
    1.0
}

fn default_max_risk_level() -> RiskLevel {
    RiskLevel::High
}

impl GateConfig {
    pub fn validate(&self) -> common::Result<()> {
        if !self.min_expected_profit.is_finite() || self.min_expected_profit < 0.0 {
            return Err(EngineError::Config(
                "pipeline.gates.min_expected_profit must be >= 0".into(),
            ));
        }
        if !self.min_reward_risk.is_finite() || self.min_reward_risk < 0.0 {
            return Err(EngineError::Config(
                "pipeline.gates.min_reward_risk must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

/// Validates that the signal has sufficient confidence
pub struct ConfidenceValidator {
    min_confidence: f64,
}

impl ConfidenceValidator {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }
}

#[async_trait::async_trait]
impl SignalValidator for ConfidenceValidator {
    async fn validate(&self, signal: &Signal) -> Result<bool> {
        let passes = (0.0..=1.0).contains(&signal.confidence)
            && signal.confidence >= self.min_confidence;
        debug!(
            "Confidence validation: {:.2} >= {:.2}? {}",
            signal.confidence, self.min_confidence, passes
        );
        Ok(passes)
    }

    fn name(&self) -> &'static str {
        "confidence"
    }
}

/// Validates that the target is far enough from entry to be worth trading
pub struct ExpectedProfitValidator {
    min_expected_profit: f64,
}

impl ExpectedProfitValidator {
    pub fn new(min_expected_profit: f64) -> Self {
        Self { min_expected_profit }
    }
}

#[async_trait::async_trait]
impl SignalValidator for ExpectedProfitValidator {
    async fn validate(&self, signal: &Signal) -> Result<bool> {
        let expected = signal.expected_profit();
        let passes = expected >= self.min_expected_profit;
        debug!(
            "Expected profit validation: {:.4} >= {:.4}? {}",
            expected, self.min_expected_profit, passes
        );
        Ok(passes)
    }

    fn name(&self) -> &'static str {
        "expected_profit"
    }
}

/// Validates the reward:risk of the final levels
pub struct RiskRewardValidator {
    min_reward_risk: f64,
}

impl RiskRewardValidator {
    pub fn new(min_reward_risk: f64) -> Self {
        Self { min_reward_risk }
    }
}

#[async_trait::async_trait]
impl SignalValidator for RiskRewardValidator {
    async fn validate(&self, signal: &Signal) -> Result<bool> {
        let ratio = signal.reward_risk();
        let passes = ratio >= self.min_reward_risk;
        debug!(
            "Reward:risk validation: {:.2} >= {:.2}? {}",
            ratio, self.min_reward_risk, passes
        );
        Ok(passes)
    }

    fn name(&self) -> &'static str {
        "reward_risk"
    }
}

/// Rejects positions classified above a risk level
pub struct RiskLevelValidator {
    max_risk_level: RiskLevel,
}

impl RiskLevelValidator {
    pub fn new(max_risk_level: RiskLevel) -> Self {
        Self { max_risk_level }
    }
}

#[async_trait::async_trait]
impl SignalValidator for RiskLevelValidator {
    async fn validate(&self, signal: &Signal) -> Result<bool> {
        let passes = signal.risk_level <= self.max_risk_level;
        debug!(
            "Risk level validation: {} <= {}? {}",
            signal.risk_level, self.max_risk_level, passes
        );
        Ok(passes)
    }

    fn name(&self) -> &'static str {
        "risk_level"
    }
}

/// The default gate set, in evaluation order
pub fn default_validators(min_confidence: f64, gates: &GateConfig) -> Vec<Box<dyn SignalValidator>> {
    vec![
        Box::new(ConfidenceValidator::new(min_confidence)),
        Box::new(ExpectedProfitValidator::new(gates.min_expected_profit)),
        Box::new(RiskRewardValidator::new(gates.min_reward_risk)),
        Box::new(RiskLevelValidator::new(gates.max_risk_level)),
    ]
}
