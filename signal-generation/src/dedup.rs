//! Bounded cache of recently emitted fingerprints

use crate::signals::Signal;
use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use tracing::debug;

/// Fingerprint -> last emission time, for one instrument.
///
/// Holds at most `capacity` fingerprints; entries older than `retention` are
/// dropped on lookup.
pub struct RecentSignals {
    cache: LruCache<String, DateTime<Utc>>,
    cooldown: Duration,
    retention: Duration,
}

impl RecentSignals {
    pub fn new(capacity: usize, cooldown: Duration, retention: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
            cooldown,
            retention: retention.max(cooldown),
        }
    }

    /// True if `fingerprint` was emitted less than one cooldown before `now`
    pub fn in_cooldown(&mut self, fingerprint: &str, now: DateTime<Utc>) -> bool {
        let Some(&emitted_at) = self.cache.peek(fingerprint) else {
            return false;
        };
        let age = now - emitted_at;
        if age >= self.retention {
            self.cache.pop(fingerprint);
            return false;
        }
        age < self.cooldown
    }

    pub fn record(&mut self, fingerprint: &str, at: DateTime<Utc>) {
        match self.cache.get_mut(fingerprint) {
            Some(existing) => {
                if at > *existing {
                    *existing = at;
                }
            }
            None => {
                self.cache.put(fingerprint.to_string(), at);
            }
        }
    }

    /// Seed from signals emitted before a restart
    pub fn rehydrate<'a>(&mut self, signals: impl IntoIterator<Item = &'a Signal>) -> usize {
        let mut restored = 0;
        for signal in signals {
            self.record(&signal.source_fingerprint, signal.created_at);
            restored += 1;
        }
        debug!(restored, cached = self.cache.len(), "Dedup cache rehydrated");
        restored
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::Direction;
    use portfolio_risk::RiskLevel;
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn cache() -> RecentSignals {
        RecentSignals::new(4, Duration::minutes(15), Duration::hours(1))
    }

    #[test]
    fn test_cooldown_window() {
        let mut recent = cache();
        recent.record("fp", t0());

        assert!(recent.in_cooldown("fp", t0() + Duration::minutes(5)));
        assert!(!recent.in_cooldown("fp", t0() + Duration::minutes(15)));
        assert!(!recent.in_cooldown("other", t0()));
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_retention_expiry() {
        let mut recent = cache();
        recent.record("fp", t0());
        assert!(!recent.in_cooldown("fp", t0() + Duration::hours(2)));
        assert!(recent.is_empty());
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let mut recent = cache();
        for i in 0..5 {
            recent.record(&format!("fp{}", i), t0());
        }
        assert_eq!(recent.len(), 4);
        assert!(!recent.in_cooldown("fp0", t0()));
        assert!(recent.in_cooldown("fp4", t0()));
    }

    #[test]
    fn test_record_keeps_latest() {
        let mut recent = cache();
        recent.record("fp", t0() + Duration::minutes(10));
        recent.record("fp", t0());
        assert!(recent.in_cooldown("fp", t0() + Duration::minutes(20)));
    }

    #[test]
    fn test_rehydrate() {
        let signal = Signal {
            id: Uuid::new_v4(),
            instrument: "BTC-USD".into(),
            direction: Direction::Long,
            entry: 100.0,
            stop_loss: 95.0,
            take_profit: 110.0,
            size: 1.0,
            confidence: 0.8,
            risk_level: RiskLevel::Low,
            created_at: t0(),
            source_fingerprint: "restored".into(),
        };
        let mut recent = cache();
        assert_eq!(recent.rehydrate([&signal]), 1);
        assert!(recent.in_cooldown("restored", t0() + Duration::minutes(1)));
    }
}
