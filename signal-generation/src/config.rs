// Engine Configuration
// Layered TOML file + SIGNAL_ENGINE__* environment variables

use crate::chart::ChartConfig;
use crate::emission::EmissionConfig;
use crate::fusion::FusionConfig;
use crate::model::ModelConfig;
use crate::pipeline::PipelineConfig;
use anyhow::Context;
use common::{EngineError, Result};
use data_ingestion::FeedConfig;
use portfolio_risk::{RiskConfig, RiskParameters};
use research_agents::SentimentConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const ENV_PREFIX: &str = "SIGNAL_ENGINE";

/// Complete engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Instruments tracked from startup
    pub instruments: Vec<String>,

    /// Optional TOML file re-read for risk parameters
    pub risk_parameters_file: Option<String>,

    pub risk_refresh_secs: u64,

    pub feed: FeedConfig,
    pub chart: ChartConfig,
    pub sentiment: SentimentConfig,
    pub model: ModelConfig,
    pub fusion: FusionConfig,
    pub risk: RiskConfig,
    pub risk_parameters: RiskParameters,
    pub pipeline: PipelineConfig,
    pub emission: EmissionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instruments: Vec::new(),
            risk_parameters_file: None,
            risk_refresh_secs: 60,
            feed: FeedConfig::default(),
            chart: ChartConfig::default(),
            sentiment: SentimentConfig::default(),
            model: ModelConfig::default(),
            fusion: FusionConfig::default(),
            risk: RiskConfig::default(),
            risk_parameters: RiskParameters::default(),
            pipeline: PipelineConfig::default(),
            emission: EmissionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults, overlaid by `path` (if any), overlaid by the environment.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `SIGNAL_ENGINE__PIPELINE__COOLDOWN_SECS=600`.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("reading configuration sources")?;

        settings
            .try_deserialize()
            .context("deserializing engine configuration")
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("parsing engine configuration")
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Every violation here is fatal at startup
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for name in &self.instruments {
            if name.trim().is_empty() {
                return Err(EngineError::Config("instrument names must not be blank".into()));
            }
            if !seen.insert(name.as_str()) {
                return Err(EngineError::Config(format!("duplicate instrument {}", name)));
            }
        }
        if self.risk_refresh_secs == 0 {
            return Err(EngineError::Config("risk_refresh_secs must be positive".into()));
        }

        self.feed.validate()?;
        self.chart.validate()?;
        self.sentiment.validate()?;
        self.model.validate()?;
        self.fusion.validate()?;
        self.risk.validate()?;
        self.risk_parameters.validate()?;
        self.pipeline.validate()?;
        self.emission.validate()?;

        let required = self
            .chart
            .min_points()
            .max(self.model.features.min_points());
        if self.feed.capacity < required {
            return Err(EngineError::Config(format!(
                "feed.capacity ({}) is smaller than the {} points analysis needs",
                self.feed.capacity, required
            )));
        }
        Ok(())
    }
}

/// Write the default configuration as a commented TOML file
pub fn create_config_template(path: impl AsRef<Path>) -> anyhow::Result<()> {
    let body = EngineConfig::default().to_toml()?;
    let template = format!(
        "# Signal engine configuration\n\
         # Any key can be overridden with {}__<SECTION>__<KEY> environment variables\n\n{}",
        ENV_PREFIX, body
    );
    std::fs::write(path.as_ref(), template)
        .with_context(|| format!("writing {}", path.as_ref().display()))?;
    Ok(())
}
