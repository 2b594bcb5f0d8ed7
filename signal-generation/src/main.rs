use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use common::logging::init_logging;
use common::PricePoint;
use portfolio_risk::FileRiskParameters;
use research_agents::{InMemorySentimentSource, Lexicon, RawSentiment};
use serde::Deserialize;
use signal_generation::{
    create_config_template, DisplaySink, EngineConfig, InMemorySignalStore, LogNotifier,
    NotificationSink, SignalEngine, SoftmaxModel, WebhookSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// One line of NDJSON on stdin: a price tick, a headline or post scored
/// with the keyword lexicon (`source`, `timestamp`, `text`), or a
/// pre-scored sentiment sample (`source`, `timestamp`, `value`, optional
/// `confidence`)
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Input {
    Tick {
        instrument: String,
        timestamp: DateTime<Utc>,
        price: f64,
        volume: f64,
    },
    Text {
        instrument: String,
        source: String,
        timestamp: DateTime<Utc>,
        text: String,
    },
    Sentiment {
        instrument: String,
        #[serde(flatten)]
        sample: RawSentiment,
    },
}

async fn read_stdin(engine: Arc<SignalEngine>, sentiment: Arc<InMemorySentimentSource>) {
    let lexicon = Lexicon::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Input stream closed");
                break;
            }
            Err(e) => {
                warn!("Failed to read input: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Input>(&line) {
            Ok(Input::Tick {
                instrument,
                timestamp,
                price,
                volume,
            }) => {
                let point = PricePoint::new(timestamp, price, volume);
                if let Err(e) = engine.ingest(&instrument, point).await {
                    warn!(instrument = %instrument, "Rejected tick: {}", e);
                }
            }
            Ok(Input::Text {
                instrument,
                source,
                timestamp,
                text,
            }) => {
                let sample = RawSentiment::from_text(source, timestamp, &text, &lexicon);
                sentiment.push(&instrument, sample);
            }
            Ok(Input::Sentiment { instrument, sample }) => sentiment.push(&instrument, sample),
            Err(e) => warn!("Skipping malformed input line: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info");

    let mut args = std::env::args().skip(1);
    let mut config_path: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--template" => {
                let path = args.next().unwrap_or_else(|| "signal-engine.toml".to_string());
                create_config_template(&path)?;
                info!("Wrote configuration template to {}", path);
                return Ok(());
            }
            "--config" => config_path = args.next().map(PathBuf::from),
            other => bail!("unknown argument {}", other),
        }
    }

    let config = EngineConfig::load(config_path.as_deref())?;
    if config.instruments.is_empty() {
        bail!("no instruments configured");
    }

    info!("🚀 Starting Signal Generation Engine");

    let model = Arc::new(SoftmaxModel::from_config(&config.model)?);
    let store = Arc::new(InMemorySignalStore::default());
    let sentiment = Arc::new(InMemorySentimentSource::new(1000));

    let engine = SignalEngine::new(config.clone(), model, store)?
        .with_sentiment_source(sentiment.clone());
    let engine = Arc::new(engine);

    let now = Utc::now();
    for instrument in &config.instruments {
        engine.add_instrument(instrument, now).await;
        info!("📈 Tracking {}", instrument);
    }

    let mut tasks = Vec::new();
    if config.emission.display {
        tasks.push(engine.bus().spawn_sink(Arc::new(DisplaySink::stdout())));
    }
    if config.emission.notifications {
        let sink = NotificationSink::new(Arc::new(LogNotifier));
        tasks.push(engine.bus().spawn_sink(Arc::new(sink)));
    }
    if let Some(webhook) = &config.emission.webhook {
        tasks.push(engine.bus().spawn_sink(Arc::new(WebhookSink::new(webhook.clone())?)));
    }

    if let Some(path) = &config.risk_parameters_file {
        let provider = Arc::new(FileRiskParameters::new(path));
        tasks.push(engine.spawn_risk_refresh(
            provider,
            Duration::from_secs(config.risk_refresh_secs),
        ));
    }

    tasks.extend(engine.spawn_evaluation_loops());
    tasks.push(tokio::spawn(read_stdin(engine.clone(), sentiment)));

    tokio::signal::ctrl_c().await?;
    info!("👋 Shutting down gracefully...");

    for task in &tasks {
        task.abort();
    }

    for instrument in engine.instruments() {
        if let Some(stats) = engine.stats(&instrument).await {
            info!(
                "📊 {}: {} evaluations, {} emitted, {} cooldown, {} suppressed",
                instrument,
                stats.evaluations,
                stats.emitted,
                stats.cooldowns,
                stats.suppressed_total()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_lines() {
        let tick = r#"{"instrument":"BTC-USD","timestamp":"2024-05-01T12:00:00Z","price":100.5,"volume":3.0}"#;
        assert!(matches!(
            serde_json::from_str::<Input>(tick).unwrap(),
            Input::Tick { price, .. } if price == 100.5
        ));

        let scored = r#"{"instrument":"BTC-USD","source":"news","timestamp":"2024-05-01T12:00:00Z","value":-0.4}"#;
        assert!(matches!(
            serde_json::from_str::<Input>(scored).unwrap(),
            Input::Sentiment { sample, .. } if sample.value == -0.4 && sample.confidence == 1.0
        ));
    }

    #[test]
    fn test_text_line_is_scored_with_lexicon() {
        let line = r#"{"instrument":"BTC-USD","source":"social","timestamp":"2024-05-01T12:00:00Z","text":"Bullish breakout, huge rally on ETF adoption"}"#;
        let Input::Text {
            source,
            timestamp,
            text,
            ..
        } = serde_json::from_str::<Input>(line).unwrap()
        else {
            panic!("expected a text line");
        };

        let sample = RawSentiment::from_text(source, timestamp, &text, &Lexicon::default());
        assert_eq!(sample.source, "social");
        assert!(sample.value > 0.0);
        assert!(sample.validate().is_ok());
    }
}
