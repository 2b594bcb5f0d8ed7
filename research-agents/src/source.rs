//! Collector boundary for sentiment samples.

use super::sentiment::RawSentiment;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

/// Supplies raw sentiment samples for an instrument, batched per cycle.
#[async_trait]
pub trait SentimentSource: Send + Sync {
    /// Samples observed at or after `since`.
    async fn collect(&self, instrument: &str, since: DateTime<Utc>) -> Result<Vec<RawSentiment>>;
}

/// Push-style buffer: external collectors `push`, the engine `collect`s.
pub struct InMemorySentimentSource {
    buffers: DashMap<String, Vec<RawSentiment>>,
    max_per_instrument: usize,
}

impl InMemorySentimentSource {
    pub fn new(max_per_instrument: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            max_per_instrument,
        }
    }

    pub fn push(&self, instrument: &str, sample: RawSentiment) {
        let mut buffer = self.buffers.entry(instrument.to_string()).or_default();
        buffer.push(sample);
        if buffer.len() > self.max_per_instrument {
            let excess = buffer.len() - self.max_per_instrument;
            buffer.drain(..excess);
        }
    }

    pub fn len(&self, instrument: &str) -> usize {
        self.buffers.get(instrument).map(|b| b.len()).unwrap_or(0)
    }
}

impl Default for InMemorySentimentSource {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl SentimentSource for InMemorySentimentSource {
    async fn collect(&self, instrument: &str, since: DateTime<Utc>) -> Result<Vec<RawSentiment>> {
        let Some(mut buffer) = self.buffers.get_mut(instrument) else {
            return Ok(Vec::new());
        };

        // Anything older than `since` will never be requested again
        let before = buffer.len();
        buffer.retain(|s| s.timestamp >= since);
        if buffer.len() < before {
            debug!(instrument, pruned = before - buffer.len(), "Pruned stale sentiment");
        }

        Ok(buffer.to_vec())
    }
}
