//! Sources of the account risk budget

use crate::config::RiskParameters;
use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Supplies the current risk parameters. Polled by the signal engine.
#[async_trait]
pub trait RiskParametersProvider: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<RiskParameters>;
}

/// Fixed parameters, set at startup
#[derive(Debug, Clone, Default)]
pub struct StaticRiskParameters {
    params: RiskParameters,
}

impl StaticRiskParameters {
    pub fn new(params: RiskParameters) -> Self {
        Self { params }
    }
}

#[async_trait]
impl RiskParametersProvider for StaticRiskParameters {
    async fn fetch(&self) -> anyhow::Result<RiskParameters> {
        Ok(self.params.clone())
    }
}

/// Parameters re-read from a TOML file on every fetch
#[derive(Debug, Clone)]
pub struct FileRiskParameters {
    path: PathBuf,
}

impl FileRiskParameters {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RiskParametersProvider for FileRiskParameters {
    async fn fetch(&self) -> anyhow::Result<RiskParameters> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let params: RiskParameters = toml::from_str(&content)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        debug!(path = %self.path.display(), "Risk parameters loaded");
        Ok(params)
    }
}
