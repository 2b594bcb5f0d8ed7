// Signal Storage Interface
// Keeps emitted signals so cooldown state survives restarts

use super::signals::Signal;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Trait for signal storage backends
#[async_trait::async_trait]
pub trait SignalStore: Send + Sync {
    /// Store an emitted signal
    async fn record(&self, signal: &Signal) -> Result<()>;

    /// Signals for an instrument created at or after `since`, oldest first
    async fn recent(&self, instrument: &str, since: DateTime<Utc>) -> Result<Vec<Signal>>;

    /// Retrieve a signal by ID
    async fn get(&self, signal_id: Uuid) -> Result<Option<Signal>>;

    /// Get storage statistics
    async fn stats(&self) -> Result<StorageStats>;
}

/// Storage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_signals: usize,
    pub signals_by_instrument: HashMap<String, usize>,
    pub oldest_signal: Option<DateTime<Utc>>,
    pub newest_signal: Option<DateTime<Utc>>,
}

/// In-memory signal storage, bounded per instrument
pub struct InMemorySignalStore {
    signals: tokio::sync::RwLock<HashMap<String, VecDeque<Signal>>>,
    max_per_instrument: usize,
}

impl InMemorySignalStore {
    pub fn new(max_per_instrument: usize) -> Self {
        Self {
            signals: tokio::sync::RwLock::new(HashMap::new()),
            max_per_instrument: max_per_instrument.max(1),
        }
    }

    /// Store pre-seeded with signals from a previous run
    pub async fn with_signals(signals: impl IntoIterator<Item = Signal>) -> Result<Self> {
        let store = Self::default();
        for signal in signals {
            store.record(&signal).await?;
        }
        Ok(store)
    }
}

impl Default for InMemorySignalStore {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait::async_trait]
impl SignalStore for InMemorySignalStore {
    async fn record(&self, signal: &Signal) -> Result<()> {
        let mut signals = self.signals.write().await;
        let history = signals.entry(signal.instrument.clone()).or_default();
        history.push_back(signal.clone());
        while history.len() > self.max_per_instrument {
            history.pop_front();
        }
        Ok(())
    }

    async fn recent(&self, instrument: &str, since: DateTime<Utc>) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        let mut recent: Vec<Signal> = signals
            .get(instrument)
            .map(|history| {
                history
                    .iter()
                    .filter(|s| s.created_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        recent.sort_by_key(|s| s.created_at);
        Ok(recent)
    }

    async fn get(&self, signal_id: Uuid) -> Result<Option<Signal>> {
        let signals = self.signals.read().await;
        Ok(signals
            .values()
            .flat_map(|history| history.iter())
            .find(|s| s.id == signal_id)
            .cloned())
    }

    async fn stats(&self) -> Result<StorageStats> {
        let signals = self.signals.read().await;

        let mut stats = StorageStats::default();
        for (instrument, history) in signals.iter() {
            stats.total_signals += history.len();
            stats
                .signals_by_instrument
                .insert(instrument.clone(), history.len());

            for signal in history {
                if stats.oldest_signal.map_or(true, |t| signal.created_at < t) {
                    stats.oldest_signal = Some(signal.created_at);
                }
                if stats.newest_signal.map_or(true, |t| signal.created_at > t) {
                    stats.newest_signal = Some(signal.created_at);
                }
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use common::Direction;
    use portfolio_risk::RiskLevel;

    fn signal(instrument: &str, minutes: i64) -> Signal {
        Signal {
            id: Uuid::new_v4(),
            instrument: instrument.to_string(),
            direction: Direction::Long,
            entry: 100.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            size: 1.0,
            confidence: 0.8,
            risk_level: RiskLevel::Low,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::minutes(minutes),
            source_fingerprint: format!("fp-{}", minutes),
        }
    }

    #[tokio::test]
    async fn test_recent_filters_by_instrument_and_time() {
        let store = InMemorySignalStore::default();
        for s in [signal("BTC", 0), signal("BTC", 30), signal("ETH", 40)] {
            store.record(&s).await.unwrap();
        }

        let since = signal("BTC", 10).created_at;
        let recent = store.recent("BTC", since).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].source_fingerprint, "fp-30");
        assert!(store.recent("SOL", since).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bounded_history() {
        let store = InMemorySignalStore::new(2);
        for minutes in 0..5 {
            store.record(&signal("BTC", minutes)).await.unwrap();
        }
        let all = store.recent("BTC", signal("BTC", -1).created_at).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].source_fingerprint, "fp-3");
    }

    #[tokio::test]
    async fn test_get_and_stats() {
        let first = signal("BTC", 0);
        let store = InMemorySignalStore::with_signals([first.clone(), signal("ETH", 5)])
            .await
            .unwrap();

        assert_eq!(store.get(first.id).await.unwrap(), Some(first.clone()));
        assert_eq!(store.get(Uuid::new_v4()).await.unwrap(), None);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_signals, 2);
        assert_eq!(stats.signals_by_instrument["ETH"], 1);
        assert_eq!(stats.oldest_signal, Some(first.created_at));
    }
}
