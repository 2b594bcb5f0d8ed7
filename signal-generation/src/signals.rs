//! Emitted trade signals and their de-duplication fingerprints

use chrono::{DateTime, Utc};
use common::Direction;
use portfolio_risk::RiskLevel;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Finalized trade recommendation. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub instrument: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub size: f64,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub created_at: DateTime<Utc>,
    pub source_fingerprint: String,
}

impl Signal {
    /// Reward-to-risk of the validated levels
    pub fn reward_risk(&self) -> f64 {
        let risk = (self.entry - self.stop_loss).abs();
        if risk > 0.0 {
            (self.take_profit - self.entry).abs() / risk
        } else {
            0.0
        }
    }

    /// Take-profit distance relative to entry
    pub fn expected_profit(&self) -> f64 {
        (self.take_profit - self.entry).abs() / self.entry
    }

    pub fn payload(&self) -> SignalPayload {
        SignalPayload::from(self)
    }
}

/// JSON shape delivered to display, notification and webhook consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub instrument: String,
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

impl From<&Signal> for SignalPayload {
    fn from(signal: &Signal) -> Self {
        Self {
            instrument: signal.instrument.clone(),
            direction: signal.direction,
            entry: signal.entry,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            confidence: signal.confidence,
            created_at: signal.created_at,
        }
    }
}

/// Inputs that identify "substantially the same" signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintKey {
    instrument: String,
    direction: Direction,
    entry: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    bucket: i64,
}

impl FingerprintKey {
    /// Prices are rounded to `precision` decimal places; time is bucketed
    /// into `bucket_secs` slots.
    pub fn new(
        instrument: &str,
        direction: Direction,
        levels: (f64, f64, f64),
        at: DateTime<Utc>,
        precision: u32,
        bucket_secs: i64,
    ) -> Self {
        let round = |price: f64| {
            Decimal::from_f64(price)
                .map(|d| d.round_dp(precision).normalize())
                .unwrap_or(Decimal::ZERO)
        };
        Self {
            instrument: instrument.to_string(),
            direction,
            entry: round(levels.0),
            stop_loss: round(levels.1),
            take_profit: round(levels.2),
            bucket: at.timestamp().div_euclid(bucket_secs.max(1)),
        }
    }

    pub fn bucket(&self) -> i64 {
        self.bucket
    }

    /// Same levels in a different time slot
    pub fn at_bucket(&self, bucket: i64) -> Self {
        Self {
            bucket,
            ..self.clone()
        }
    }

    /// Hex SHA-256 of the key
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.instrument.as_bytes());
        hasher.update(b"|");
        hasher.update(self.direction.as_str().as_bytes());
        for price in [self.entry, self.stop_loss, self.take_profit] {
            hasher.update(b"|");
            hasher.update(price.to_string().as_bytes());
        }
        hasher.update(b"|");
        hasher.update(self.bucket.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}
