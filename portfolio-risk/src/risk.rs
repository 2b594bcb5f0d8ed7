//! Position sizing and stop/target validation

use crate::config::{RiskConfig, RiskParameters};
use common::{Direction, EngineError, KeyLevels, Result};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Current risk level assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.9 => RiskLevel::Critical,
            s if s >= 0.7 => RiskLevel::High,
            s if s >= 0.4 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Sized position with validated levels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Quote amount lost if the stop is hit
    pub risk_amount: f64,
    pub reward_risk: f64,
    pub risk_level: RiskLevel,
}

/// Converts a trade idea into a position that respects the risk budget
#[derive(Debug, Clone, Default)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Size a position and validate its stop-loss and take-profit.
    ///
    /// A stop inside the support (long) or resistance (short) noise band is
    /// widened to just outside the band before sizing. Fails with
    /// `PositionTooSmall` if the capped size is below the minimum unit.
    pub fn size(
        &self,
        direction: Direction,
        entry: f64,
        stop_loss: f64,
        levels: &KeyLevels,
        params: &RiskParameters,
    ) -> Result<RiskAssessment> {
        Self::check_levels(direction, entry, stop_loss)?;

        let stop_loss = self.widen_stop(direction, entry, stop_loss, levels);
        Self::check_levels(direction, entry, stop_loss)?;

        let distance = (entry - stop_loss).abs();
        let take_profit = self.take_profit(direction, entry, distance, levels);
        if !take_profit.is_finite() || take_profit <= 0.0 {
            return Err(EngineError::InvalidLevels(format!(
                "{} target {} is not a positive price (entry {}, stop {})",
                direction, take_profit, entry, stop_loss
            )));
        }

        let raw_size = params.risk_budget() / distance;
        let max_notional = params.max_notional();
        let mut size = raw_size.min(max_notional / entry);
        if size * entry > max_notional {
            size -= size * f64::EPSILON;
        }
        let size = self.quantize(size);

        if !(size > 0.0) || size < self.config.min_position_size {
            return Err(EngineError::PositionTooSmall {
                size,
                minimum: self.config.min_position_size,
            });
        }

        let risk_score = (distance / entry) / self.config.volatility_threshold;
        let assessment = RiskAssessment {
            size,
            stop_loss,
            take_profit,
            risk_amount: size * distance,
            reward_risk: (take_profit - entry).abs() / distance,
            risk_level: RiskLevel::from_score(risk_score),
        };

        debug!(
            direction = %direction,
            entry,
            raw_size,
            size = assessment.size,
            stop_loss = assessment.stop_loss,
            take_profit = assessment.take_profit,
            "Position sized"
        );

        Ok(assessment)
    }

    fn check_levels(direction: Direction, entry: f64, stop_loss: f64) -> Result<()> {
        if !entry.is_finite() || entry <= 0.0 {
            return Err(EngineError::InvalidLevels(format!("entry {} must be positive", entry)));
        }
        if !stop_loss.is_finite() || stop_loss <= 0.0 {
            return Err(EngineError::InvalidLevels(format!(
                "stop {} must be positive",
                stop_loss
            )));
        }
        let loss_side = match direction {
            Direction::Long => stop_loss < entry,
            Direction::Short => stop_loss > entry,
        };
        if !loss_side {
            return Err(EngineError::InvalidLevels(format!(
                "{} stop {} is not on the loss side of entry {}",
                direction, stop_loss, entry
            )));
        }
        Ok(())
    }

    /// (lower, upper) noise band around a level
    fn band(&self, level: f64) -> (f64, f64) {
        let tol = self.config.level_tolerance;
        (level * (1.0 - tol), level * (1.0 + tol))
    }

    fn widen_stop(&self, direction: Direction, entry: f64, stop: f64, levels: &KeyLevels) -> f64 {
        let buffer = entry * self.config.stop_buffer;
        match direction {
            Direction::Long => {
                let (low, high) = self.band(levels.support);
                if stop >= low && stop <= high {
                    debug!(stop, support = levels.support, "Stop inside support band, widening");
                    return low - buffer;
                }
                stop
            }
            Direction::Short => {
                let (low, high) = self.band(levels.resistance);
                if stop >= low && stop <= high {
                    debug!(stop, resistance = levels.resistance, "Stop inside resistance band, widening");
                    return high + buffer;
                }
                stop
            }
        }
    }

    /// Target at `reward_risk_ratio` times the stop distance, pulled in front
    /// of the opposing level's band if it would land inside it.
    fn take_profit(&self, direction: Direction, entry: f64, distance: f64, levels: &KeyLevels) -> f64 {
        let buffer = entry * self.config.stop_buffer;
        let reach = distance * self.config.reward_risk_ratio;
        match direction {
            Direction::Long => {
                let target = entry + reach;
                let (low, high) = self.band(levels.resistance);
                let pulled = low - buffer;
                if target >= low && target <= high && pulled > entry {
                    return pulled;
                }
                target
            }
            Direction::Short => {
                let target = entry - reach;
                let (low, high) = self.band(levels.support);
                let pulled = high + buffer;
                if target >= low && target <= high && pulled < entry {
                    return pulled;
                }
                target
            }
        }
    }

    /// Round down to the lot step
    fn quantize(&self, size: f64) -> f64 {
        let Some(step) = self.config.lot_step else {
            return size;
        };
        match (Decimal::from_f64(size), Decimal::from_f64(step)) {
            (Some(size_d), Some(step_d)) if !step_d.is_zero() => {
                let lots = (size_d / step_d).floor();
                (lots * step_d).to_f64().unwrap_or(0.0)
            }
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn far_levels() -> KeyLevels {
        KeyLevels {
            support: 80.0,
            resistance: 150.0,
        }
    }

    fn params(max_position_fraction: f64) -> RiskParameters {
        RiskParameters {
            account_equity: 10_000.0,
            max_risk_fraction: 0.01,
            max_position_fraction,
        }
    }

    #[test]
    fn test_size_from_risk_budget() {
        let manager = RiskManager::default();
        let sized = manager
            .size(Direction::Long, 100.0, 95.0, &far_levels(), &params(1.0))
            .unwrap();
        assert!((sized.size - 20.0).abs() < 1e-9);
        assert_eq!(sized.stop_loss, 95.0);
        assert!((sized.risk_amount - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_size_capped_by_position_fraction() {
        let manager = RiskManager::default();
        let p = params(0.1);
        let sized = manager
            .size(Direction::Long, 100.0, 95.0, &far_levels(), &p)
            .unwrap();
        assert!((sized.size - 10.0).abs() < 1e-9);
        assert!(sized.size * 100.0 <= p.max_notional());
    }

    #[test]
    fn test_levels_on_correct_sides() {
        let manager = RiskManager::default();
        let p = params(0.5);

        let long = manager
            .size(Direction::Long, 100.0, 97.0, &far_levels(), &p)
            .unwrap();
        assert!(long.stop_loss < 100.0 && long.take_profit > 100.0);
        assert!((long.take_profit - 106.0).abs() < 1e-9);

        let short = manager
            .size(Direction::Short, 100.0, 103.0, &far_levels(), &p)
            .unwrap();
        assert!(short.stop_loss > 100.0 && short.take_profit < 100.0);
        assert!((short.take_profit - 94.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_target_below_zero_rejected() {
        let manager = RiskManager::default();
        let levels = KeyLevels {
            support: 10.0,
            resistance: 500.0,
        };
        // 60 above entry, target 100 - 2 * 60 = -20
        let result = manager.size(Direction::Short, 100.0, 160.0, &levels, &params(1.0));
        assert!(matches!(result, Err(EngineError::InvalidLevels(_))));

        let exact_zero = manager.size(Direction::Short, 100.0, 150.0, &levels, &params(1.0));
        assert!(matches!(exact_zero, Err(EngineError::InvalidLevels(_))));
    }

    #[test]
    fn test_stop_inside_support_band_is_widened() {
        let manager = RiskManager::default();
        let levels = KeyLevels {
            support: 96.0,
            resistance: 150.0,
        };
        // Band: [95.52, 96.48]; naive stop 96.2 sits inside
        let sized = manager
            .size(Direction::Long, 100.0, 96.2, &levels, &params(1.0))
            .unwrap();
        let expected = 96.0 * (1.0 - 0.005) - 100.0 * 0.001;
        assert!((sized.stop_loss - expected).abs() < 1e-9);
        assert!(sized.stop_loss < 95.52);
    }

    #[test]
    fn test_stop_inside_resistance_band_is_widened() {
        let manager = RiskManager::default();
        let levels = KeyLevels {
            support: 50.0,
            resistance: 104.0,
        };
        let sized = manager
            .size(Direction::Short, 100.0, 104.1, &levels, &params(1.0))
            .unwrap();
        assert!(sized.stop_loss > 104.0 * 1.005);
    }

    #[test]
    fn test_take_profit_pulled_before_resistance() {
        let manager = RiskManager::default();
        let levels = KeyLevels {
            support: 80.0,
            resistance: 106.0,
        };
        // Naive target 106.0 lands on resistance
        let sized = manager
            .size(Direction::Long, 100.0, 97.0, &levels, &params(1.0))
            .unwrap();
        assert!(sized.take_profit < 106.0 * 0.995);
        assert!(sized.take_profit > 100.0);
    }

    #[test]
    fn test_position_too_small() {
        let config = RiskConfig {
            min_position_size: 5.0,
            ..Default::default()
        };
        let manager = RiskManager::new(config);
        let p = RiskParameters {
            account_equity: 100.0,
            max_risk_fraction: 0.01,
            max_position_fraction: 1.0,
        };
        let result = manager.size(Direction::Long, 100.0, 95.0, &far_levels(), &p);
        assert!(matches!(result, Err(EngineError::PositionTooSmall { .. })));
    }

    #[test]
    fn test_stop_on_wrong_side_rejected() {
        let manager = RiskManager::default();
        let result = manager.size(Direction::Long, 100.0, 101.0, &far_levels(), &params(1.0));
        assert!(matches!(result, Err(EngineError::InvalidLevels(_))));
        let result = manager.size(Direction::Short, 100.0, 100.0, &far_levels(), &params(1.0));
        assert!(matches!(result, Err(EngineError::InvalidLevels(_))));
    }

    #[test]
    fn test_lot_quantization_rounds_down() {
        let config = RiskConfig {
            lot_step: Some(0.5),
            ..Default::default()
        };
        let manager = RiskManager::new(config);
        // raw = 100 / 3 = 33.33
        let sized = manager
            .size(Direction::Long, 100.0, 97.0, &far_levels(), &params(1.0))
            .unwrap();
        assert_eq!(sized.size, 33.0);
    }

    #[test]
    fn test_risk_level_from_stop_distance() {
        let manager = RiskManager::default();
        let tight = manager
            .size(Direction::Long, 100.0, 99.0, &far_levels(), &params(1.0))
            .unwrap();
        assert_eq!(tight.risk_level, RiskLevel::Low);
        let wide = manager
            .size(Direction::Long, 100.0, 89.0, &far_levels(), &params(1.0))
            .unwrap();
        assert_eq!(wide.risk_level, RiskLevel::Critical);
    }
}
