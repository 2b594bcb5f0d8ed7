use crate::series::TimeSeries;
use chrono::{DateTime, Duration, Utc};
use common::{EngineError, PricePoint, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Number of points retained (oldest evicted first)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Maximum interval between consecutive points before a gap is flagged
    #[serde(default = "default_max_gap_secs")]
    pub max_gap_secs: i64,

    /// Consecutive regular intervals needed to clear the gap flag
    #[serde(default = "default_gap_recovery_points")]
    pub gap_recovery_points: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            max_gap_secs: default_max_gap_secs(),
            gap_recovery_points: default_gap_recovery_points(),
        }
    }
}

fn default_capacity() -> usize {
    500
}

fn default_max_gap_secs() -> i64 {
    60
}

fn default_gap_recovery_points() -> usize {
    30
}

impl FeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity < 2 {
            return Err(EngineError::Config("feed.capacity must be at least 2".into()));
        }
        if self.max_gap_secs <= 0 {
            return Err(EngineError::Config("feed.max_gap_secs must be positive".into()));
        }
        Ok(())
    }
}

/// Ingestion counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedStats {
    pub accepted: u64,
    pub rejected: u64,
    pub evicted: u64,
    pub gaps: u64,
}

struct FeedState {
    points: VecDeque<PricePoint>,
    last_timestamp: Option<DateTime<Utc>>,
    /// Regular intervals observed since the last gap; None if no gap seen.
    intervals_since_gap: Option<usize>,
    stats: FeedStats,
}

/// Single-writer, many-reader market data feed for one instrument.
///
/// `ingest` appends under a write lock; `snapshot` copies the retained
/// points under a read lock, so a reader never sees a half-applied append.
pub struct MarketDataFeed {
    instrument: String,
    config: FeedConfig,
    state: RwLock<FeedState>,
}

impl MarketDataFeed {
    pub fn new(instrument: impl Into<String>, config: FeedConfig) -> Self {
        let capacity = config.capacity;
        Self {
            instrument: instrument.into(),
            config,
            state: RwLock::new(FeedState {
                points: VecDeque::with_capacity(capacity),
                last_timestamp: None,
                intervals_since_gap: None,
                stats: FeedStats::default(),
            }),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    /// Record a new point. Rejected points leave the series untouched.
    pub async fn ingest(&self, point: PricePoint) -> Result<()> {
        let mut state = self.state.write().await;

        if let Err(e) = Self::check_point(&point, state.last_timestamp) {
            state.stats.rejected += 1;
            debug!(instrument = %self.instrument, error = %e, "Rejected price point");
            return Err(e);
        }

        if let Some(last) = state.last_timestamp {
            let interval = point.timestamp - last;
            if interval > Duration::seconds(self.config.max_gap_secs) {
                state.intervals_since_gap = Some(0);
                state.stats.gaps += 1;
                warn!(
                    instrument = %self.instrument,
                    gap_secs = interval.num_seconds(),
                    "Feed gap detected"
                );
            } else if let Some(n) = state.intervals_since_gap.as_mut() {
                *n += 1;
            }
        }

        if state.points.len() >= self.config.capacity {
            state.points.pop_front();
            state.stats.evicted += 1;
        }
        state.points.push_back(point);
        state.last_timestamp = Some(point.timestamp);
        state.stats.accepted += 1;

        Ok(())
    }

    fn check_point(point: &PricePoint, last: Option<DateTime<Utc>>) -> Result<()> {
        if !point.price.is_finite() || point.price <= 0.0 {
            return Err(EngineError::InvalidData(format!(
                "price must be positive, got {}",
                point.price
            )));
        }
        if !point.volume.is_finite() || point.volume < 0.0 {
            return Err(EngineError::InvalidData(format!(
                "volume must be non-negative, got {}",
                point.volume
            )));
        }
        if let Some(last) = last {
            if point.timestamp <= last {
                return Err(EngineError::OutOfOrder {
                    timestamp: point.timestamp,
                    last,
                });
            }
        }
        Ok(())
    }

    /// Consistent copy of the retained series.
    pub async fn snapshot(&self) -> TimeSeries {
        let state = self.state.read().await;
        let gap_detected = state
            .intervals_since_gap
            .map(|n| n < self.config.gap_recovery_points)
            .unwrap_or(false);
        TimeSeries::new(state.points.iter().copied().collect(), gap_detected)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.points.len()
    }

    pub async fn stats(&self) -> FeedStats {
        self.state.read().await.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts: DateTime<Utc>, price: f64) -> PricePoint {
        PricePoint::new(ts, price, 10.0)
    }

    #[tokio::test]
    async fn test_rejects_out_of_order() {
        let feed = MarketDataFeed::new("SOL/USDC", FeedConfig::default());
        let t0 = Utc::now();
        feed.ingest(point(t0, 100.0)).await.unwrap();

        let same = feed.ingest(point(t0, 101.0)).await;
        assert!(matches!(same, Err(EngineError::OutOfOrder { .. })));

        let earlier = feed.ingest(point(t0 - Duration::seconds(1), 101.0)).await;
        assert!(matches!(earlier, Err(EngineError::OutOfOrder { .. })));

        assert_eq!(feed.len().await, 1);
        assert_eq!(feed.stats().await.rejected, 2);
    }

    #[tokio::test]
    async fn test_rejects_invalid_data() {
        let feed = MarketDataFeed::new("SOL/USDC", FeedConfig::default());
        let t0 = Utc::now();
        assert!(matches!(
            feed.ingest(point(t0, 0.0)).await,
            Err(EngineError::InvalidData(_))
        ));
        assert!(matches!(
            feed.ingest(PricePoint::new(t0, 10.0, -1.0)).await,
            Err(EngineError::InvalidData(_))
        ));
        assert!(matches!(
            feed.ingest(point(t0, f64::NAN)).await,
            Err(EngineError::InvalidData(_))
        ));
        // A rejected point does not advance the ordering watermark
        feed.ingest(point(t0, 10.0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_evicts_oldest_on_overflow() {
        let config = FeedConfig {
            capacity: 3,
            ..Default::default()
        };
        let feed = MarketDataFeed::new("SOL/USDC", config);
        let t0 = Utc::now();
        for i in 0..5 {
            feed.ingest(point(t0 + Duration::seconds(i), 100.0 + i as f64))
                .await
                .unwrap();
        }
        let series = feed.snapshot().await;
        assert_eq!(series.prices(), vec![102.0, 103.0, 104.0]);
        assert_eq!(feed.stats().await.evicted, 2);
    }

    #[tokio::test]
    async fn test_gap_flag_set_and_cleared() {
        let config = FeedConfig {
            capacity: 50,
            max_gap_secs: 10,
            gap_recovery_points: 2,
        };
        let feed = MarketDataFeed::new("SOL/USDC", config);
        let t0 = Utc::now();
        feed.ingest(point(t0, 100.0)).await.unwrap();
        feed.ingest(point(t0 + Duration::seconds(5), 100.0)).await.unwrap();
        assert!(!feed.snapshot().await.gap_detected());

        feed.ingest(point(t0 + Duration::seconds(60), 100.0)).await.unwrap();
        assert!(feed.snapshot().await.gap_detected());

        feed.ingest(point(t0 + Duration::seconds(65), 100.0)).await.unwrap();
        feed.ingest(point(t0 + Duration::seconds(70), 100.0)).await.unwrap();
        assert!(!feed.snapshot().await.gap_detected());
        assert_eq!(feed.stats().await.gaps, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_independent_copy() {
        let feed = MarketDataFeed::new("SOL/USDC", FeedConfig::default());
        let t0 = Utc::now();
        feed.ingest(point(t0, 100.0)).await.unwrap();
        let snapshot = feed.snapshot().await;
        feed.ingest(point(t0 + Duration::seconds(1), 101.0)).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(feed.snapshot().await.len(), 2);
    }
}
