//! Trend and support/resistance analysis over a price snapshot

use chrono::{DateTime, Utc};
use common::{EngineError, KeyLevels, Result, TrendDirection};
use data_ingestion::TimeSeries;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Chart analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartConfig {
    /// Short moving-average window (points)
    #[serde(default = "default_short_window")]
    pub short_window: usize,

    /// Long moving-average window (points)
    #[serde(default = "default_long_window")]
    pub long_window: usize,

    /// Minimum |short - long| relative to price before a trend is called
    #[serde(default = "default_noise_threshold")]
    pub noise_threshold: f64,

    /// Average true range window (points)
    #[serde(default = "default_atr_window")]
    pub atr_window: usize,

    /// MA separation, in ATRs, that maps to full strength
    #[serde(default = "default_strength_atr_multiple")]
    pub strength_atr_multiple: f64,

    /// Points on each side a pivot must dominate
    #[serde(default = "default_pivot_width")]
    pub pivot_width: usize,

    /// Points scanned for support/resistance pivots
    #[serde(default = "default_sr_lookback")]
    pub sr_lookback: usize,

    /// Pivots within this relative distance merge into one level
    #[serde(default = "default_cluster_tolerance")]
    pub cluster_tolerance: f64,

    /// Level distance used when no pivot exists on one side of price
    #[serde(default = "default_fallback_band")]
    pub fallback_band: f64,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            short_window: default_short_window(),
            long_window: default_long_window(),
            noise_threshold: default_noise_threshold(),
            atr_window: default_atr_window(),
            strength_atr_multiple: default_strength_atr_multiple(),
            pivot_width: default_pivot_width(),
            sr_lookback: default_sr_lookback(),
            cluster_tolerance: default_cluster_tolerance(),
            fallback_band: default_fallback_band(),
        }
    }
}

fn default_short_window() -> usize {
    10
}

fn default_long_window() -> usize {
    30
}

fn default_noise_threshold() -> f64 {
    0.001
}

fn default_atr_window() -> usize {
    14
}

fn default_strength_atr_multiple() -> f64 {
    4.0
}

fn default_pivot_width() -> usize {
    2
}

fn default_sr_lookback() -> usize {
    100
}

fn default_cluster_tolerance() -> f64 {
    0.005
}

fn default_fallback_band() -> f64 {
    0.005
}

impl ChartConfig {
    pub fn validate(&self) -> Result<()> {
        if self.short_window == 0 || self.short_window >= self.long_window {
            return Err(EngineError::Config(format!(
                "chart.short_window ({}) must be positive and below long_window ({})",
                self.short_window, self.long_window
            )));
        }
        if self.atr_window == 0 || self.pivot_width == 0 {
            return Err(EngineError::Config(
                "chart.atr_window and chart.pivot_width must be positive".into(),
            ));
        }
        if self.sr_lookback < 2 * self.pivot_width + 1 {
            return Err(EngineError::Config(
                "chart.sr_lookback must cover at least one pivot window".into(),
            ));
        }
        for (name, value) in [
            ("chart.noise_threshold", self.noise_threshold),
            ("chart.cluster_tolerance", self.cluster_tolerance),
            ("chart.fallback_band", self.fallback_band),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(EngineError::Config(format!("{} must be in [0, 1)", name)));
            }
        }
        if !self.strength_atr_multiple.is_finite() || self.strength_atr_multiple <= 0.0 {
            return Err(EngineError::Config(
                "chart.strength_atr_multiple must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Smallest series the analyzer accepts
    pub fn min_points(&self) -> usize {
        self.long_window
            .max(self.atr_window + 1)
            .max(2 * self.pivot_width + 1)
    }
}

/// Trend reading for one evaluation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAssessment {
    pub direction: TrendDirection,
    /// 0.0 to 1.0
    pub strength: f64,
    pub support: f64,
    pub resistance: f64,
    pub last_price: f64,
    pub atr: f64,
    pub computed_at: DateTime<Utc>,
}

impl TrendAssessment {
    pub fn levels(&self) -> KeyLevels {
        KeyLevels {
            support: self.support,
            resistance: self.resistance,
        }
    }

    /// Strength with the trend's sign, in [-1, 1]
    pub fn signed_strength(&self) -> f64 {
        self.direction.sign() * self.strength
    }
}

/// Computes trend direction, strength and key levels.
///
/// `assess` is a pure function of the series: the same snapshot always yields
/// the same assessment, including `computed_at` (taken from the last point).
#[derive(Debug, Clone, Default)]
pub struct ChartAnalyzer {
    config: ChartConfig,
}

impl ChartAnalyzer {
    pub fn new(config: ChartConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChartConfig {
        &self.config
    }

    pub fn assess(&self, series: &TimeSeries) -> Result<TrendAssessment> {
        let required = self.config.min_points();
        let last_point = match series.last() {
            Some(point) if series.len() >= required => *point,
            _ => {
                return Err(EngineError::InsufficientData {
                    required,
                    available: series.len(),
                })
            }
        };

        let prices = series.prices();
        let last_price = last_point.price;
        let short_ma = tail_mean(&prices, self.config.short_window);
        let long_ma = tail_mean(&prices, self.config.long_window);
        let separation = short_ma - long_ma;
        let atr = average_true_range(&prices, self.config.atr_window);

        let direction = if separation.abs() / last_price > self.config.noise_threshold {
            if separation > 0.0 {
                TrendDirection::Up
            } else {
                TrendDirection::Down
            }
        } else {
            TrendDirection::Neutral
        };

        let strength = if atr > 0.0 {
            (separation.abs() / (atr * self.config.strength_atr_multiple)).clamp(0.0, 1.0)
        } else if direction != TrendDirection::Neutral {
            1.0
        } else {
            0.0
        };

        let levels = self.key_levels(&prices, last_price);

        trace!(
            short_ma,
            long_ma,
            atr,
            strength,
            support = levels.support,
            resistance = levels.resistance,
            "Chart assessed"
        );

        Ok(TrendAssessment {
            direction,
            strength,
            support: levels.support,
            resistance: levels.resistance,
            last_price,
            atr,
            computed_at: last_point.timestamp,
        })
    }

    /// Nearest clustered pivot low below and pivot high above `price`
    fn key_levels(&self, prices: &[f64], price: f64) -> KeyLevels {
        let start = prices.len().saturating_sub(self.config.sr_lookback);
        let window = &prices[start..];
        let (lows, highs) = find_pivots(window, self.config.pivot_width);

        let support = cluster_levels(lows, self.config.cluster_tolerance)
            .into_iter()
            .filter(|level| *level < price)
            .fold(None, |best: Option<f64>, level| Some(best.map_or(level, |b| b.max(level))))
            .unwrap_or(price * (1.0 - self.config.fallback_band));

        let resistance = cluster_levels(highs, self.config.cluster_tolerance)
            .into_iter()
            .filter(|level| *level > price)
            .fold(None, |best: Option<f64>, level| Some(best.map_or(level, |b| b.min(level))))
            .unwrap_or(price * (1.0 + self.config.fallback_band));

        KeyLevels {
            support,
            resistance,
        }
    }
}

fn tail_mean(values: &[f64], window: usize) -> f64 {
    let tail = &values[values.len() - window..];
    tail.iter().sum::<f64>() / tail.len() as f64
}

/// Mean absolute close-to-close move over the last `window` intervals
fn average_true_range(prices: &[f64], window: usize) -> f64 {
    let tail = &prices[prices.len() - (window + 1)..];
    tail.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>() / window as f64
}

/// Local minima and maxima that dominate `width` points on each side
fn find_pivots(prices: &[f64], width: usize) -> (Vec<f64>, Vec<f64>) {
    let mut lows = Vec::new();
    let mut highs = Vec::new();
    if prices.len() < 2 * width + 1 {
        return (lows, highs);
    }

    for i in width..prices.len() - width {
        let p = prices[i];
        let neighbours = prices[i - width..=i + width]
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != width)
            .map(|(_, v)| *v);

        let (mut is_low, mut is_high) = (true, true);
        for v in neighbours {
            is_low &= p <= v;
            is_high &= p >= v;
        }
        // Plateaus report only their first point
        if is_low && p < prices[i - 1] {
            lows.push(p);
        }
        if is_high && p > prices[i - 1] {
            highs.push(p);
        }
    }

    (lows, highs)
}

/// Merge sorted pivots closer than `tolerance` into their mean
fn cluster_levels(mut pivots: Vec<f64>, tolerance: f64) -> Vec<f64> {
    pivots.sort_by(|a, b| a.total_cmp(b));

    let mut levels = Vec::new();
    let mut cluster: Vec<f64> = Vec::new();
    for pivot in pivots {
        if let Some(&anchor) = cluster.first() {
            if (pivot - anchor) / anchor > tolerance {
                levels.push(cluster.iter().sum::<f64>() / cluster.len() as f64);
                cluster.clear();
            }
        }
        cluster.push(pivot);
    }
    if !cluster.is_empty() {
        levels.push(cluster.iter().sum::<f64>() / cluster.len() as f64);
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn rising(n: usize) -> Vec<f64> {
        // Upward drift with a small alternating wiggle
        (0..n)
            .map(|i| 100.0 + 0.2 * i as f64 + if i % 2 == 0 { 0.02 } else { -0.02 })
            .collect()
    }

    #[test]
    fn test_uptrend_low_volatility() {
        let series = TimeSeries::from_prices(start(), 60, &rising(60));
        let assessment = ChartAnalyzer::default().assess(&series).unwrap();

        assert_eq!(assessment.direction, TrendDirection::Up);
        assert!(assessment.strength > 0.5);
        assert!(assessment.support < assessment.last_price);
        assert!(assessment.resistance > assessment.last_price);
    }

    #[test]
    fn test_downtrend() {
        let prices: Vec<f64> = rising(60).into_iter().rev().collect();
        let series = TimeSeries::from_prices(start(), 60, &prices);
        let assessment = ChartAnalyzer::default().assess(&series).unwrap();
        assert_eq!(assessment.direction, TrendDirection::Down);
        assert!(assessment.signed_strength() < 0.0);
    }

    #[test]
    fn test_flat_series_is_neutral() {
        let prices: Vec<f64> = (0..60)
            .map(|i| if i % 2 == 0 { 100.0 } else { 100.05 })
            .collect();
        let series = TimeSeries::from_prices(start(), 60, &prices);
        let assessment = ChartAnalyzer::default().assess(&series).unwrap();
        assert_eq!(assessment.direction, TrendDirection::Neutral);
    }

    #[test]
    fn test_assess_is_deterministic() {
        let series = TimeSeries::from_prices(start(), 60, &rising(80));
        let analyzer = ChartAnalyzer::default();
        let first = analyzer.assess(&series).unwrap();
        let second = analyzer.assess(&series.clone()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.computed_at, series.last().unwrap().timestamp);
    }

    #[test]
    fn test_insufficient_data() {
        let series = TimeSeries::from_prices(start(), 60, &rising(10));
        let result = ChartAnalyzer::default().assess(&series);
        assert_eq!(
            result,
            Err(EngineError::InsufficientData {
                required: 30,
                available: 10
            })
        );
    }

    #[test]
    fn test_levels_cluster_nearby_pivots() {
        let prices = [
            100.0, 98.0, 96.0, 95.0, 96.0, 98.0, 100.0, 102.0, 104.0, 105.0, 104.0, 102.0,
            100.0, 98.0, 96.0, 95.2, 96.0, 98.0, 100.0, 102.0, 103.0,
        ];
        let config = ChartConfig {
            short_window: 3,
            long_window: 8,
            atr_window: 5,
            sr_lookback: 50,
            ..Default::default()
        };
        let series = TimeSeries::from_prices(start(), 60, &prices);
        let assessment = ChartAnalyzer::new(config).assess(&series).unwrap();

        // 95.0 and 95.2 merge into one level
        assert!((assessment.support - 95.1).abs() < 1e-9);
        assert!((assessment.resistance - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_levels_without_pivots() {
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let series = TimeSeries::from_prices(start(), 60, &prices);
        let assessment = ChartAnalyzer::default().assess(&series).unwrap();
        assert!((assessment.support - 139.0 * 0.995).abs() < 1e-9);
        assert!((assessment.resistance - 139.0 * 1.005).abs() < 1e-9);
    }

    #[test]
    fn test_config_validation() {
        assert!(ChartConfig::default().validate().is_ok());
        let bad = ChartConfig {
            short_window: 30,
            long_window: 30,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(EngineError::Config(_))));
    }
}
