//! Position sizing & risk management (Layer 3)
//!
//! Converts an analytic trade idea (direction, entry, naive stop) into a
//! concrete position size with validated stop-loss and take-profit, given
//! the account risk budget.

mod config;
mod provider;
mod risk;

pub use config::{create_config_template, RiskConfig, RiskParameters};
pub use provider::{FileRiskParameters, RiskParametersProvider, StaticRiskParameters};
pub use risk::{RiskAssessment, RiskLevel, RiskManager};
