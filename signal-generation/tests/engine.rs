use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{Direction, EngineError, KeyLevels, Result, TrendDirection};
use data_ingestion::TimeSeries;
use portfolio_risk::{RiskManager, RiskParameters, StaticRiskParameters};
use research_agents::{InMemorySentimentSource, RawSentiment, SentimentAggregator};
use signal_generation::{
    ChartAnalyzer, EngineConfig, EvaluationOutcome, FeatureVector, InMemorySignalStore,
    PredictionResult, PredictiveModel, SignalEngine, SignalStore, SuppressReason,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;

const INSTRUMENT: &str = "BTC-USD";

struct FixedModel {
    p: (f64, f64, f64),
}

impl PredictiveModel for FixedModel {
    fn predict(&self, features: &FeatureVector) -> Result<PredictionResult> {
        PredictionResult::new(self.p.0, self.p.1, self.p.2, 300, features.computed_at)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// One evaluation after the last of 60 one-minute points
fn now() -> DateTime<Utc> {
    start() + Duration::minutes(60)
}

fn rising() -> Vec<f64> {
    (0..60)
        .map(|i| 100.0 + 0.2 * i as f64 + if i % 2 == 0 { 0.05 } else { -0.05 })
        .collect()
}

fn falling() -> Vec<f64> {
    rising().into_iter().rev().collect()
}

fn config() -> EngineConfig {
    let mut config = EngineConfig {
        instruments: vec![INSTRUMENT.to_string()],
        ..EngineConfig::default()
    };
    config.risk_parameters = RiskParameters {
        account_equity: 10_000.0,
        max_risk_fraction: 0.01,
        max_position_fraction: 0.5,
    };
    config
}

async fn engine_with(
    p: (f64, f64, f64),
    store: Arc<InMemorySignalStore>,
    at: DateTime<Utc>,
) -> SignalEngine {
    let engine = SignalEngine::new(config(), Arc::new(FixedModel { p }), store).unwrap();
    engine.add_instrument(INSTRUMENT, at).await;
    engine
}

async fn feed(engine: &SignalEngine, prices: &[f64]) {
    let series = TimeSeries::from_prices(start(), 60, prices);
    for point in series.points() {
        engine.ingest(INSTRUMENT, *point).await.unwrap();
    }
}

#[test]
fn scenario_a_rising_series_is_strong_uptrend() {
    let series = TimeSeries::from_prices(start(), 60, &rising());
    let assessment = ChartAnalyzer::default().assess(&series).unwrap();

    assert_eq!(assessment.direction, TrendDirection::Up);
    assert!(assessment.strength > 0.5);
}

#[tokio::test]
async fn scenario_b_disagreement_is_suppressed() {
    let engine = engine_with((0.52, 0.48, 0.0), Arc::default(), now()).await;
    feed(&engine, &falling()).await;

    let outcome = engine.evaluate(INSTRUMENT, now()).await.unwrap();
    assert_eq!(
        outcome,
        EvaluationOutcome::Suppressed(SuppressReason::Disagreement)
    );
    assert_eq!(engine.metrics().outcome_count(INSTRUMENT, "disagreement"), 1);
}

#[test]
fn scenario_c_fixed_fractional_sizing() {
    let levels = KeyLevels {
        support: 50.0,
        resistance: 200.0,
    };
    let manager = RiskManager::default();

    let uncapped = RiskParameters {
        account_equity: 10_000.0,
        max_risk_fraction: 0.01,
        max_position_fraction: 1.0,
    };
    let sized = manager
        .size(Direction::Long, 100.0, 95.0, &levels, &uncapped)
        .unwrap();
    assert!((sized.size - 20.0).abs() < 1e-9);

    let capped = RiskParameters {
        max_position_fraction: 0.1,
        ..uncapped
    };
    let sized = manager
        .size(Direction::Long, 100.0, 95.0, &levels, &capped)
        .unwrap();
    assert!((sized.size - 10.0).abs() < 1e-9);
    assert!(sized.size * 100.0 <= 1000.0 + 1e-9);
}

#[tokio::test]
async fn scenario_d_stale_sentiment_does_not_block_evaluation() {
    let stale_at = now() - Duration::days(2);
    let aggregator = SentimentAggregator::default();
    let samples = vec![
        RawSentiment::new("news", stale_at, 0.8),
        RawSentiment::new("social", stale_at, -0.4),
    ];
    let score = aggregator.aggregate(&samples, now()).unwrap();
    assert_eq!(score.confidence, 0.0);

    let source = Arc::new(InMemorySentimentSource::default());
    for sample in samples {
        source.push(INSTRUMENT, sample);
    }
    let engine = SignalEngine::new(
        config(),
        Arc::new(FixedModel {
            p: (0.9, 0.05, 0.05),
        }),
        Arc::new(InMemorySignalStore::default()),
    )
    .unwrap()
    .with_sentiment_source(source);
    engine.add_instrument(INSTRUMENT, now()).await;
    feed(&engine, &rising()).await;

    let outcome = engine.evaluate(INSTRUMENT, now()).await.unwrap();
    let signal = outcome.signal().expect("evaluation proceeds on trend and model");
    assert_eq!(signal.direction, Direction::Long);
}

#[tokio::test]
async fn scenario_e_duplicate_within_cooldown() {
    let engine = engine_with((0.9, 0.05, 0.05), Arc::default(), now()).await;
    let mut rx = engine.subscribe();
    feed(&engine, &rising()).await;

    let first = engine.evaluate(INSTRUMENT, now()).await.unwrap();
    assert!(first.signal().is_some());

    let second = engine
        .evaluate(INSTRUMENT, now() + Duration::seconds(45))
        .await
        .unwrap();
    assert!(matches!(second, EvaluationOutcome::Cooldown { .. }));

    assert!(rx.try_recv().is_ok());
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

    let stats = engine.stats(INSTRUMENT).await.unwrap();
    assert_eq!(stats.emitted, 1);
    assert_eq!(stats.cooldowns, 1);
}

#[tokio::test]
async fn emitted_signals_are_recorded_and_rehydrated() {
    let store = Arc::new(InMemorySignalStore::default());

    let first = engine_with((0.9, 0.05, 0.05), store.clone(), now()).await;
    feed(&first, &rising()).await;
    let signal = first
        .evaluate(INSTRUMENT, now())
        .await
        .and_then(|o| o.signal().cloned())
        .unwrap();

    let stored = store.get(signal.id).await.unwrap();
    assert_eq!(stored.as_ref().map(|s| s.source_fingerprint.as_str()), Some(signal.source_fingerprint.as_str()));

    // Restart: same store, fresh engine
    let restart_at = now() + Duration::seconds(120);
    let second = engine_with((0.9, 0.05, 0.05), store, restart_at).await;
    feed(&second, &rising()).await;
    let outcome = second.evaluate(INSTRUMENT, restart_at).await.unwrap();
    assert!(matches!(outcome, EvaluationOutcome::Cooldown { .. }));
}

#[tokio::test]
async fn evaluate_all_covers_every_instrument() {
    let engine = engine_with((0.9, 0.05, 0.05), Arc::default(), now()).await;
    engine.add_instrument("ETH-USD", now()).await;
    feed(&engine, &rising()).await;

    let outcomes = engine.evaluate_all(now()).await;
    assert_eq!(outcomes.len(), 2);

    let eth = outcomes.iter().find(|(name, _)| name == "ETH-USD").unwrap();
    assert_eq!(
        eth.1,
        EvaluationOutcome::Suppressed(SuppressReason::InsufficientData)
    );
    let btc = outcomes.iter().find(|(name, _)| name == INSTRUMENT).unwrap();
    assert!(btc.1.signal().is_some());
}

#[tokio::test]
async fn invalid_risk_refresh_keeps_previous_parameters() {
    let engine = Arc::new(engine_with((0.9, 0.05, 0.05), Arc::default(), now()).await);
    let before = engine.risk_parameters();

    let invalid = RiskParameters {
        max_risk_fraction: 2.0,
        ..before.clone()
    };
    let task = engine.spawn_risk_refresh(
        Arc::new(StaticRiskParameters::new(invalid)),
        std::time::Duration::from_millis(10),
    );
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    task.abort();

    assert_eq!(engine.risk_parameters(), before);
}

#[tokio::test]
async fn out_of_order_tick_is_rejected() {
    let engine = engine_with((0.9, 0.05, 0.05), Arc::default(), now()).await;
    feed(&engine, &rising()).await;

    let stale = common::PricePoint::new(start(), 100.0, 1.0);
    let result = engine.ingest(INSTRUMENT, stale).await;
    assert!(matches!(result, Err(EngineError::OutOfOrder { .. })));
    assert_eq!(engine.feed(INSTRUMENT).unwrap().len().await, 60);
}

#[test]
fn invalid_configuration_is_fatal() {
    let mut config = config();
    config.fusion.trend_weight = 0.0;
    config.fusion.prediction_weight = 0.0;
    config.fusion.sentiment_weight = 0.0;

    let err = match SignalEngine::new(
        config,
        Arc::new(FixedModel {
            p: (0.9, 0.05, 0.05),
        }),
        Arc::new(InMemorySignalStore::default()),
    ) {
        Ok(_) => panic!("zero fusion weights must be rejected"),
        Err(e) => e,
    };
    let cause = err.downcast_ref::<EngineError>().unwrap();
    assert!(cause.is_fatal());
}
