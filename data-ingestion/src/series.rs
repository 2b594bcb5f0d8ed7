use chrono::{DateTime, Utc};
use common::PricePoint;
use std::sync::Arc;

/// Immutable view of a feed's recent points, oldest first.
///
/// Cloning is cheap; the points are shared, never mutated after the
/// snapshot is taken.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    points: Arc<[PricePoint]>,
    gap_detected: bool,
}

impl TimeSeries {
    pub fn new(points: Vec<PricePoint>, gap_detected: bool) -> Self {
        Self {
            points: points.into(),
            gap_detected,
        }
    }

    /// Build a gap-free series from bare prices spaced `step_secs` apart.
    /// Volumes are set to 1.0.
    pub fn from_prices(start: DateTime<Utc>, step_secs: i64, prices: &[f64]) -> Self {
        let points = prices
            .iter()
            .enumerate()
            .map(|(i, &price)| {
                PricePoint::new(
                    start + chrono::Duration::seconds(step_secs * i as i64),
                    price,
                    1.0,
                )
            })
            .collect();
        Self::new(points, false)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn prices(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.price).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.volume).collect()
    }

    pub fn last(&self) -> Option<&PricePoint> {
        self.points.last()
    }

    /// True if a recent inter-point interval exceeded the feed's maximum gap.
    pub fn gap_detected(&self) -> bool {
        self.gap_detected
    }
}
