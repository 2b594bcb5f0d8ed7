//! Shared types for the signal engine crates.
//!
//! Holds the market data primitives, directional enums and the error
//! taxonomy every layer reports through.

pub mod error;
pub mod logging;
pub mod market;

pub use error::{EngineError, ErrorCategory, Result};
pub use market::{Direction, KeyLevels, PricePoint, TrendDirection};

pub use chrono::{DateTime, Utc};
