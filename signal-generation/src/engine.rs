//! Multi-instrument scheduler: owns feeds and pipelines, distributes risk
//! parameters and publishes emitted signals

use crate::config::EngineConfig;
use crate::emission::SignalBus;
use crate::metrics::SignalMetrics;
use crate::model::PredictiveModel;
use crate::pipeline::{
    AlertSink, EvaluationOutcome, InstrumentPipeline, LogAlertSink, PipelineStats,
};
use crate::signals::Signal;
use crate::storage::SignalStore;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use common::{EngineError, PricePoint};
use dashmap::DashMap;
use data_ingestion::MarketDataFeed;
use portfolio_risk::{RiskManager, RiskParameters, RiskParametersProvider};
use research_agents::{SentimentAggregator, SentimentSource};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Clone)]
struct InstrumentHandle {
    feed: Arc<MarketDataFeed>,
    pipeline: Arc<Mutex<InstrumentPipeline>>,
}

/// Runs one pipeline per tracked instrument.
///
/// Instruments evaluate concurrently; a tick that arrives while the same
/// instrument is still evaluating is skipped. The only state shared across
/// instruments is the read-only risk parameters.
pub struct SignalEngine {
    config: EngineConfig,
    model: Arc<dyn PredictiveModel>,
    sentiment: Option<Arc<dyn SentimentSource>>,
    aggregator: Arc<SentimentAggregator>,
    alerts: Arc<dyn AlertSink>,
    store: Arc<dyn SignalStore>,
    bus: SignalBus,
    metrics: SignalMetrics,
    risk_params: watch::Sender<RiskParameters>,
    instruments: DashMap<String, InstrumentHandle>,
}

impl SignalEngine {
    /// Validates the configuration; this is the only fatal failure point.
    pub fn new(
        config: EngineConfig,
        model: Arc<dyn PredictiveModel>,
        store: Arc<dyn SignalStore>,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid engine configuration")?;

        let metrics = SignalMetrics::new().context("registering metrics")?;
        let (risk_params, _) = watch::channel(config.risk_parameters.clone());

        Ok(Self {
            aggregator: Arc::new(SentimentAggregator::new(config.sentiment.clone())),
            bus: SignalBus::new(config.emission.channel_capacity),
            model,
            sentiment: None,
            alerts: Arc::new(LogAlertSink),
            store,
            metrics,
            risk_params,
            instruments: DashMap::new(),
            config,
        })
    }

    /// Applies to instruments added afterwards
    pub fn with_sentiment_source(mut self, source: Arc<dyn SentimentSource>) -> Self {
        self.sentiment = Some(source);
        self
    }

    /// Applies to instruments added afterwards
    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = alerts;
        self
    }

    /// Register an instrument and restore its cooldown state from the store.
    /// A store failure is logged and the instrument starts with an empty cache.
    pub async fn add_instrument(&self, instrument: &str, now: DateTime<Utc>) {
        if self.instruments.contains_key(instrument) {
            return;
        }

        let feed = Arc::new(MarketDataFeed::new(instrument, self.config.feed.clone()));
        let mut pipeline = self.build_pipeline(instrument);

        let since = now - Duration::seconds(self.config.pipeline.dedup_window_secs);
        match self.store.recent(instrument, since).await {
            Ok(signals) => {
                let restored = pipeline.rehydrate(&signals);
                info!(instrument = %instrument, restored, "Cooldown state rehydrated");
            }
            Err(e) => {
                warn!(instrument = %instrument, "Could not load recent signals: {:#}", e);
            }
        }

        let mut inserted = false;
        self.instruments
            .entry(instrument.to_string())
            .or_insert_with(|| {
                inserted = true;
                InstrumentHandle {
                    feed,
                    pipeline: Arc::new(Mutex::new(pipeline)),
                }
            });
        if !inserted {
            debug!(instrument = %instrument, "Instrument registered concurrently, keeping existing");
        }
    }

    fn build_pipeline(&self, instrument: &str) -> InstrumentPipeline {
        let pipeline = InstrumentPipeline::new(
            instrument,
            self.config.pipeline.clone(),
            Arc::clone(&self.model),
        )
        .with_chart(self.config.chart.clone())
        .with_features(self.config.model.features.clone())
        .with_fusion(self.config.fusion.clone())
        .with_risk(RiskManager::new(self.config.risk.clone()))
        .with_alerts(Arc::clone(&self.alerts))
        .with_metrics(self.metrics.clone());

        match &self.sentiment {
            Some(source) => pipeline.with_sentiment(Arc::clone(source), Arc::clone(&self.aggregator)),
            None => pipeline,
        }
    }

    fn handle(&self, instrument: &str) -> Option<InstrumentHandle> {
        self.instruments.get(instrument).map(|h| h.value().clone())
    }

    pub fn instruments(&self) -> Vec<String> {
        let mut names: Vec<String> = self.instruments.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn feed(&self, instrument: &str) -> Option<Arc<MarketDataFeed>> {
        self.handle(instrument).map(|h| h.feed)
    }

    /// Append a tick to the instrument's feed
    pub async fn ingest(&self, instrument: &str, point: PricePoint) -> common::Result<()> {
        let handle = self.handle(instrument).ok_or_else(|| {
            EngineError::InvalidData(format!("unknown instrument {}", instrument))
        })?;
        handle.feed.ingest(point).await
    }

    /// Evaluate one instrument. `None` if it is unknown or already evaluating.
    pub async fn evaluate(&self, instrument: &str, now: DateTime<Utc>) -> Option<EvaluationOutcome> {
        let params = self.risk_parameters();
        self.evaluate_with(instrument, &params, now).await
    }

    async fn evaluate_with(
        &self,
        instrument: &str,
        params: &RiskParameters,
        now: DateTime<Utc>,
    ) -> Option<EvaluationOutcome> {
        let handle = self.handle(instrument)?;
        let Ok(mut pipeline) = handle.pipeline.try_lock() else {
            debug!(instrument = %instrument, "Evaluation already in flight, skipping tick");
            self.metrics.record_skipped_tick(instrument);
            return None;
        };

        let series = handle.feed.snapshot().await;
        let outcome = pipeline.evaluate(&series, params, now).await;
        drop(pipeline);

        if let EvaluationOutcome::Emitted(signal) = &outcome {
            self.publish(signal).await;
        }
        Some(outcome)
    }

    /// Evaluate every instrument concurrently
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> Vec<(String, EvaluationOutcome)> {
        let names = self.instruments();
        let outcomes =
            futures::future::join_all(names.iter().map(|name| self.evaluate(name, now))).await;
        names
            .into_iter()
            .zip(outcomes)
            .filter_map(|(name, outcome)| outcome.map(|o| (name, o)))
            .collect()
    }

    async fn publish(&self, signal: &Signal) {
        if let Err(e) = self.store.record(signal).await {
            warn!(signal_id = %signal.id, "Failed to store signal: {:#}", e);
        }
        let consumers = self.bus.publish(signal.clone());
        debug!(signal_id = %signal.id, consumers, "Signal published");
    }

    pub fn risk_parameters(&self) -> RiskParameters {
        self.risk_params.borrow().clone()
    }

    /// Replace the risk parameters; invalid values are rejected and the
    /// previous ones kept
    pub fn update_risk_parameters(&self, params: RiskParameters) -> common::Result<()> {
        params.validate()?;
        info!(
            equity = params.account_equity,
            max_risk_fraction = params.max_risk_fraction,
            max_position_fraction = params.max_position_fraction,
            "Risk parameters updated"
        );
        self.risk_params.send_replace(params);
        Ok(())
    }

    /// Read-only view of the risk parameters; sees every accepted refresh
    pub fn watch_risk_parameters(&self) -> watch::Receiver<RiskParameters> {
        self.risk_params.subscribe()
    }

    /// Poll `provider` every `every`
    pub fn spawn_risk_refresh(
        self: &Arc<Self>,
        provider: Arc<dyn RiskParametersProvider>,
        every: StdDuration,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match provider.fetch().await {
                    Ok(params) => {
                        if let Err(e) = engine.update_risk_parameters(params) {
                            warn!("Rejected risk parameter refresh, keeping previous: {}", e);
                        }
                    }
                    Err(e) => warn!("Risk parameter refresh failed: {:#}", e),
                }
            }
        })
    }

    /// One timer-driven evaluation loop per registered instrument
    pub fn spawn_evaluation_loops(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let every = StdDuration::from_millis(self.config.pipeline.evaluation_interval_ms);
        self.instruments()
            .into_iter()
            .map(|name| {
                let engine = Arc::clone(self);
                let mut risk = self.watch_risk_parameters();
                tokio::spawn(async move {
                    info!(instrument = %name, interval_ms = every.as_millis() as u64, "Evaluation loop started");
                    let mut ticker = tokio::time::interval(every);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    loop {
                        ticker.tick().await;
                        let params = risk.borrow_and_update().clone();
                        engine.evaluate_with(&name, &params, Utc::now()).await;
                    }
                })
            })
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Signal>> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn metrics(&self) -> &SignalMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn stats(&self, instrument: &str) -> Option<PipelineStats> {
        let handle = self.handle(instrument)?;
        let pipeline = handle.pipeline.lock().await;
        Some(pipeline.stats().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SoftmaxModel;
    use crate::storage::InMemorySignalStore;
    use chrono::TimeZone;

    fn engine() -> SignalEngine {
        SignalEngine::new(
            EngineConfig::default(),
            Arc::new(SoftmaxModel::default()),
            Arc::new(InMemorySignalStore::default()),
        )
        .unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let mut config = EngineConfig::default();
        config.risk_parameters.max_risk_fraction = -0.01;
        let result = SignalEngine::new(
            config,
            Arc::new(SoftmaxModel::default()),
            Arc::new(InMemorySignalStore::default()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unknown_instrument() {
        let engine = engine();
        let result = engine
            .ingest("NOPE", PricePoint::new(t0(), 1.0, 1.0))
            .await;
        assert!(matches!(result, Err(EngineError::InvalidData(_))));
        assert!(engine.evaluate("NOPE", t0()).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_risk_refresh_keeps_previous() {
        let engine = engine();
        let before = engine.risk_parameters();

        let bad = RiskParameters {
            max_position_fraction: 1.5,
            ..before.clone()
        };
        assert!(engine.update_risk_parameters(bad).is_err());
        assert_eq!(engine.risk_parameters(), before);

        let good = RiskParameters {
            account_equity: 50_000.0,
            ..before
        };
        engine.update_risk_parameters(good.clone()).unwrap();
        assert_eq!(engine.risk_parameters(), good);
    }

    #[tokio::test]
    async fn test_risk_watchers_see_accepted_updates_only() {
        let engine = engine();
        let mut risk = engine.watch_risk_parameters();
        assert!(!risk.has_changed().unwrap());

        let bad = RiskParameters {
            account_equity: -1.0,
            ..engine.risk_parameters()
        };
        assert!(engine.update_risk_parameters(bad).is_err());
        assert!(!risk.has_changed().unwrap());

        let good = RiskParameters {
            account_equity: 25_000.0,
            ..engine.risk_parameters()
        };
        engine.update_risk_parameters(good.clone()).unwrap();
        assert!(risk.has_changed().unwrap());
        assert_eq!(*risk.borrow_and_update(), good);
    }

    struct SlowStore {
        inner: InMemorySignalStore,
    }

    #[async_trait::async_trait]
    impl SignalStore for SlowStore {
        async fn record(&self, signal: &Signal) -> anyhow::Result<()> {
            self.inner.record(signal).await
        }

        async fn recent(
            &self,
            instrument: &str,
            since: DateTime<Utc>,
        ) -> anyhow::Result<Vec<Signal>> {
            tokio::time::sleep(StdDuration::from_millis(200)).await;
            self.inner.recent(instrument, since).await
        }

        async fn get(&self, signal_id: uuid::Uuid) -> anyhow::Result<Option<Signal>> {
            self.inner.get(signal_id).await
        }

        async fn stats(&self) -> anyhow::Result<crate::storage::StorageStats> {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_concurrent_add_keeps_first_registration() {
        let engine = SignalEngine::new(
            EngineConfig::default(),
            Arc::new(SoftmaxModel::default()),
            Arc::new(SlowStore {
                inner: InMemorySignalStore::default(),
            }),
        )
        .unwrap();

        // Both calls pass the registration check before either finishes
        // rehydrating; a tick lands between the two inserts.
        tokio::join!(
            engine.add_instrument("BTC-USD", t0()),
            async {
                tokio::time::sleep(StdDuration::from_millis(100)).await;
                engine.add_instrument("BTC-USD", t0()).await;
            },
            async {
                tokio::time::sleep(StdDuration::from_millis(250)).await;
                engine
                    .ingest("BTC-USD", PricePoint::new(t0(), 100.0, 1.0))
                    .await
                    .unwrap();
            },
        );

        assert_eq!(engine.instruments(), vec!["BTC-USD".to_string()]);
        assert_eq!(engine.feed("BTC-USD").unwrap().len().await, 1);
    }

    #[tokio::test]
    async fn test_busy_instrument_skips_tick() {
        let engine = engine();
        engine.add_instrument("BTC-USD", t0()).await;

        let handle = engine.handle("BTC-USD").unwrap();
        let _guard = handle.pipeline.lock().await;

        assert!(engine.evaluate("BTC-USD", t0()).await.is_none());
        assert!(engine.metrics().render().contains("skipped_ticks_total"));
    }
}
