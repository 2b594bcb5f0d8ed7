//! Risk management configuration

use common::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Account risk budget, supplied by the account/config service.
/// Read-only while signals are generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParameters {
    /// Account equity (quote currency)
    pub account_equity: f64,

    /// Fraction of equity risked between entry and stop (0.01 = 1%)
    pub max_risk_fraction: f64,

    /// Maximum notional of one position as a fraction of equity
    pub max_position_fraction: f64,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            account_equity: 10_000.0,
            max_risk_fraction: 0.01,
            max_position_fraction: 0.1,
        }
    }
}

impl RiskParameters {
    pub fn validate(&self) -> Result<()> {
        if !self.account_equity.is_finite() || self.account_equity <= 0.0 {
            return Err(EngineError::Config(format!(
                "account_equity must be positive, got {}",
                self.account_equity
            )));
        }
        check_fraction("max_risk_fraction", self.max_risk_fraction)?;
        check_fraction("max_position_fraction", self.max_position_fraction)?;
        Ok(())
    }

    /// Quote amount lost if the stop is hit
    pub fn risk_budget(&self) -> f64 {
        self.account_equity * self.max_risk_fraction
    }

    /// Largest allowed position notional
    pub fn max_notional(&self) -> f64 {
        self.account_equity * self.max_position_fraction
    }
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 || value > 1.0 {
        return Err(EngineError::Config(format!(
            "{} must be in (0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

/// Sizing and level-validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Smallest tradable position size (base units)
    #[serde(default = "default_min_position_size")]
    pub min_position_size: f64,

    /// Lot size; positions are rounded down to a multiple of this
    #[serde(default)]
    pub lot_step: Option<f64>,

    /// Half-width of the support/resistance noise band, relative to the level
    #[serde(default = "default_level_tolerance")]
    pub level_tolerance: f64,

    /// Extra distance beyond the band when a stop is widened, relative to entry
    #[serde(default = "default_stop_buffer")]
    pub stop_buffer: f64,

    /// Take-profit distance as a multiple of the stop distance
    #[serde(default = "default_reward_risk_ratio")]
    pub reward_risk_ratio: f64,

    /// Stop distance (relative to entry) that maps to risk score 1.0
    #[serde(default = "default_volatility_threshold")]
    pub volatility_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_position_size: default_min_position_size(),
            lot_step: None,
            level_tolerance: default_level_tolerance(),
            stop_buffer: default_stop_buffer(),
            reward_risk_ratio: default_reward_risk_ratio(),
            volatility_threshold: default_volatility_threshold(),
        }
    }
}

fn default_min_position_size() -> f64 {
    0.001
}

fn default_level_tolerance() -> f64 {
    0.005
}

fn default_stop_buffer() -> f64 {
    0.001
}

fn default_reward_risk_ratio() -> f64 {
    2.0
}

fn default_volatility_threshold() -> f64 {
    0.1
}

impl RiskConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.min_position_size.is_finite() || self.min_position_size < 0.0 {
            return Err(EngineError::Config("risk.min_position_size must be >= 0".into()));
        }
        if let Some(step) = self.lot_step {
            if !step.is_finite() || step <= 0.0 {
                return Err(EngineError::Config("risk.lot_step must be positive".into()));
            }
        }
        if !(0.0..0.5).contains(&self.level_tolerance) {
            return Err(EngineError::Config("risk.level_tolerance must be in [0, 0.5)".into()));
        }
        if !self.stop_buffer.is_finite() || self.stop_buffer < 0.0 {
            return Err(EngineError::Config("risk.stop_buffer must be >= 0".into()));
        }
        if !self.reward_risk_ratio.is_finite() || self.reward_risk_ratio <= 0.0 {
            return Err(EngineError::Config("risk.reward_risk_ratio must be positive".into()));
        }
        if !self.volatility_threshold.is_finite() || self.volatility_threshold <= 0.0 {
            return Err(EngineError::Config(
                "risk.volatility_threshold must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Write a commented risk parameters template
pub fn create_config_template(path: &str) -> anyhow::Result<()> {
    let template = "# Account risk parameters
# Re-read periodically by the signal engine

# Account equity (quote currency)
account_equity = 10000.0

# Fraction of equity risked per trade (entry to stop)
max_risk_fraction = 0.01

# Maximum position notional as a fraction of equity
max_position_fraction = 0.1
";

    std::fs::write(path, template)?;
    Ok(())
}
