//! Error taxonomy shared by every pipeline stage.

use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// How the orchestrator reacts to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Reject the offending input, keep running.
    Input,
    /// Suppress the current cycle only.
    Insufficiency,
    /// Treat the predictive model as unavailable for this cycle.
    Distribution,
    /// Fatal at startup.
    Configuration,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("out of order point: {timestamp} is not after last recorded {last}")]
    OutOfOrder {
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("invalid market data: {0}")]
    InvalidData(String),

    #[error("malformed sentiment signal: {0}")]
    MalformedSignal(String),

    #[error("insufficient data: need {required} points, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("position size {size:.6} below minimum tradable unit {minimum:.6}")]
    PositionTooSmall { size: f64, minimum: f64 },

    #[error("invalid probability distribution: {0}")]
    InvalidDistribution(String),

    #[error("invalid price levels: {0}")]
    InvalidLevels(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::OutOfOrder { .. }
            | EngineError::InvalidData(_)
            | EngineError::MalformedSignal(_) => ErrorCategory::Input,
            EngineError::InsufficientData { .. }
            | EngineError::PositionTooSmall { .. }
            | EngineError::InvalidLevels(_) => ErrorCategory::Insufficiency,
            EngineError::InvalidDistribution(_) => ErrorCategory::Distribution,
            EngineError::Config(_) => ErrorCategory::Configuration,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }
}
