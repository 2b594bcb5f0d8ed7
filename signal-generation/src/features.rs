//! Fixed-shape feature vectors for the predictive model

use crate::chart::TrendAssessment;
use chrono::{DateTime, Utc};
use common::{EngineError, Result};
use data_ingestion::TimeSeries;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Number of features produced per evaluation
pub const FEATURE_COUNT: usize = 7;

/// Feature names, in vector order
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "short_return_pct",
    "long_return_pct",
    "volatility_pct",
    "momentum_pct",
    "trend",
    "rsi",
    "volume_ratio",
];

const PCT_CLAMP: f64 = 10.0;
const VOLUME_CLAMP: f64 = 3.0;

/// Feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_short_return_window")]
    pub short_return_window: usize,

    #[serde(default = "default_long_return_window")]
    pub long_return_window: usize,

    #[serde(default = "default_volatility_window")]
    pub volatility_window: usize,

    #[serde(default = "default_rsi_window")]
    pub rsi_window: usize,

    #[serde(default = "default_volume_window")]
    pub volume_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            short_return_window: default_short_return_window(),
            long_return_window: default_long_return_window(),
            volatility_window: default_volatility_window(),
            rsi_window: default_rsi_window(),
            volume_window: default_volume_window(),
        }
    }
}

fn default_short_return_window() -> usize {
    5
}

fn default_long_return_window() -> usize {
    20
}

fn default_volatility_window() -> usize {
    20
}

fn default_rsi_window() -> usize {
    14
}

fn default_volume_window() -> usize {
    20
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.short_return_window == 0
            || self.long_return_window == 0
            || self.volatility_window < 2
            || self.rsi_window == 0
            || self.volume_window == 0
        {
            return Err(EngineError::Config(
                "model.features windows must be positive (volatility_window >= 2)".into(),
            ));
        }
        Ok(())
    }

    pub fn min_points(&self) -> usize {
        [
            self.short_return_window,
            self.long_return_window,
            self.volatility_window,
            self.rsi_window,
            self.volume_window,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1
    }
}

/// Model input for one evaluation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: [f64; FEATURE_COUNT],
    /// Timestamp of the last point the features were derived from
    pub computed_at: DateTime<Utc>,
}

/// Derives model features from a snapshot and its trend reading
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn extract(&self, series: &TimeSeries, trend: &TrendAssessment) -> Result<FeatureVector> {
        let required = self.config.min_points();
        if series.len() < required {
            return Err(EngineError::InsufficientData {
                required,
                available: series.len(),
            });
        }

        let prices = series.prices();
        let volumes = series.volumes();
        let n = prices.len();
        let last = prices[n - 1];

        let short_return = pct(last / prices[n - 1 - self.config.short_return_window] - 1.0);
        let long_return = pct(last / prices[n - 1 - self.config.long_return_window] - 1.0);

        let returns: Vec<f64> = prices[n - 1 - self.config.volatility_window..]
            .windows(2)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        let std_dev = returns.iter().copied().std_dev();
        let volatility = if std_dev.is_finite() {
            (std_dev * 100.0).clamp(0.0, PCT_CLAMP)
        } else {
            0.0
        };

        let mean_price = prices[n - self.config.long_return_window..].iter().copied().mean();
        let momentum = pct(last / mean_price - 1.0);

        let rsi = relative_strength(&prices[n - 1 - self.config.rsi_window..]);

        let mean_volume = volumes[n - self.config.volume_window..].iter().copied().mean();
        let volume_ratio = if mean_volume > 0.0 && volumes[n - 1] > 0.0 {
            (volumes[n - 1] / mean_volume).ln().clamp(-VOLUME_CLAMP, VOLUME_CLAMP)
        } else {
            0.0
        };

        Ok(FeatureVector {
            values: [
                short_return,
                long_return,
                volatility,
                momentum,
                trend.signed_strength(),
                rsi,
                volume_ratio,
            ],
            computed_at: trend.computed_at,
        })
    }
}

fn pct(fraction: f64) -> f64 {
    (fraction * 100.0).clamp(-PCT_CLAMP, PCT_CLAMP)
}

/// RSI rescaled from [0, 100] to [-1, 1]
fn relative_strength(prices: &[f64]) -> f64 {
    let (gains, losses) = prices.windows(2).fold((0.0, 0.0), |(g, l), w| {
        let change = w[1] - w[0];
        if change > 0.0 {
            (g + change, l)
        } else {
            (g, l - change)
        }
    });
    if gains + losses == 0.0 {
        return 0.0;
    }
    let rsi = 100.0 * gains / (gains + losses);
    (rsi - 50.0) / 50.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::ChartAnalyzer;
    use chrono::TimeZone;

    fn series(prices: &[f64]) -> TimeSeries {
        TimeSeries::from_prices(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 60, prices)
    }

    #[test]
    fn test_rising_series_features() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + 0.1 * i as f64).collect();
        let series = series(&prices);
        let trend = ChartAnalyzer::default().assess(&series).unwrap();
        let features = FeatureExtractor::default().extract(&series, &trend).unwrap();

        let [short, long, vol, momentum, trend_f, rsi, volume] = features.values;
        assert!(short > 0.0 && long > short);
        assert!(vol >= 0.0);
        assert!(momentum > 0.0);
        assert!(trend_f > 0.0);
        assert_eq!(rsi, 1.0);
        assert_eq!(volume, 0.0);
        assert_eq!(features.computed_at, trend.computed_at);
    }

    #[test]
    fn test_insufficient_points() {
        let prices: Vec<f64> = (0..60).map(|i| 100.0 + 0.1 * i as f64).collect();
        let full = series(&prices);
        let trend = ChartAnalyzer::default().assess(&full).unwrap();
        let short = series(&prices[..10]);
        let result = FeatureExtractor::default().extract(&short, &trend);
        assert!(matches!(result, Err(EngineError::InsufficientData { .. })));
    }

    #[test]
    fn test_flat_rsi_is_zero() {
        assert_eq!(relative_strength(&[1.0, 1.0, 1.0]), 0.0);
        assert_eq!(relative_strength(&[1.0, 2.0, 1.0]), 0.0);
    }
}
