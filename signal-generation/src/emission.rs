//! Fan-out of emitted signals to display, notification and webhook consumers

use crate::signals::{Signal, SignalPayload};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use common::{Direction, EngineError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Emission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmissionConfig {
    /// Per-consumer queue depth; the oldest signal is dropped on overflow
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Print JSON lines to stdout
    #[serde(default = "default_true")]
    pub display: bool,

    /// Render text notifications
    #[serde(default = "default_true")]
    pub notifications: bool,

    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl Default for EmissionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            display: true,
            notifications: true,
            webhook: None,
        }
    }
}

fn default_channel_capacity() -> usize {
    64
}

fn default_true() -> bool {
    true
}

impl EmissionConfig {
    pub fn validate(&self) -> common::Result<()> {
        if self.channel_capacity == 0 {
            return Err(EngineError::Config(
                "emission.channel_capacity must be positive".into(),
            ));
        }
        if let Some(webhook) = &self.webhook {
            webhook.validate()?;
        }
        Ok(())
    }
}

/// In-process signal bus.
///
/// Each subscriber gets its own bounded queue; a consumer that falls behind
/// loses its oldest signals without slowing the publisher.
#[derive(Clone)]
pub struct SignalBus {
    sender: broadcast::Sender<Arc<Signal>>,
}

impl SignalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Never blocks; returns the number of consumers that will see the signal
    pub fn publish(&self, signal: Signal) -> usize {
        self.sender.send(Arc::new(signal)).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Signal>> {
        self.sender.subscribe()
    }

    /// Drive `sink` from a dedicated subscription until the bus closes
    pub fn spawn_sink(&self, sink: Arc<dyn SignalSink>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            info!(sink = sink.name(), "Signal sink started");
            loop {
                match rx.recv().await {
                    Ok(signal) => {
                        if let Err(e) = sink.deliver(&signal).await {
                            error!(sink = sink.name(), signal_id = %signal.id, "Delivery failed: {:#}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(sink = sink.name(), "Sink lagged behind, dropped {} signals", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(sink = sink.name(), "Signal bus closed, stopping sink");
                        break;
                    }
                }
            }
        })
    }
}

/// Downstream consumer of emitted signals
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn deliver(&self, signal: &Signal) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Real-time display channel: one JSON object per line
pub struct DisplaySink {
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl DisplaySink {
    pub fn new(out: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(tokio::io::stdout()))
    }

    pub fn render(signal: &Signal) -> Result<String> {
        let line = serde_json::to_string(&signal.payload())?;
        Ok(line)
    }
}

#[async_trait]
impl SignalSink for DisplaySink {
    async fn deliver(&self, signal: &Signal) -> Result<()> {
        let mut line = Self::render(signal)?;
        line.push('\n');
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "display"
    }
}

/// Delivery channel for rendered notification text (chat bot, pager)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Writes notifications to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<()> {
        info!("📣 {}", text.replace('\n', " | "));
        Ok(())
    }
}

/// Notification channel: same payload, rendered as text
pub struct NotificationSink {
    notifier: Arc<dyn Notifier>,
}

impl NotificationSink {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn render(signal: &Signal) -> String {
        let headline = match signal.direction {
            Direction::Long => "🟢 LONG",
            Direction::Short => "🔴 SHORT",
        };
        format!(
            "{} {}\nEntry: {:.4}\nStop-loss: {:.4}\nTake-profit: {:.4}\nSize: {:.4}\nConfidence: {:.0}%\nRisk: {}\nTime: {}",
            headline,
            signal.instrument,
            signal.entry,
            signal.stop_loss,
            signal.take_profit,
            signal.size,
            signal.confidence * 100.0,
            signal.risk_level,
            signal.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        )
    }
}

#[async_trait]
impl SignalSink for NotificationSink {
    async fn deliver(&self, signal: &Signal) -> Result<()> {
        self.notifier.send(&Self::render(signal)).await
    }

    fn name(&self) -> &'static str {
        "notification"
    }
}

/// Webhook delivery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }

    pub fn validate(&self) -> common::Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(EngineError::Config(format!(
                "emission.webhook.url must be http(s), got {:?}",
                self.url
            )));
        }
        if self.initial_backoff_ms == 0 || self.max_backoff_ms < self.initial_backoff_ms {
            return Err(EngineError::Config(
                "emission.webhook backoff must satisfy 0 < initial <= max".into(),
            ));
        }
        Ok(())
    }

    /// Exponential backoff before retry `attempt` (1-based), capped, plus up
    /// to 50% jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_backoff_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(20));
        let base = exp.min(self.max_backoff_ms);
        let jitter = fastrand::u64(0..=base / 2);
        Duration::from_millis(base + jitter)
    }
}

/// Generic webhook: POSTs the JSON payload, retrying with backoff
pub struct WebhookSink {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookSink {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("building webhook client")?;
        Ok(Self { client, config })
    }

    async fn post(&self, payload: &SignalPayload) -> Result<()> {
        let response = self.client.post(&self.config.url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("webhook returned {}", status);
        }
        Ok(())
    }
}

#[async_trait]
impl SignalSink for WebhookSink {
    async fn deliver(&self, signal: &Signal) -> Result<()> {
        let payload = signal.payload();
        let mut attempt = 0;
        loop {
            match self.post(&payload).await {
                Ok(()) => {
                    debug!(signal_id = %signal.id, attempt, "Webhook delivered");
                    return Ok(());
                }
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = self.config.backoff(attempt);
                    warn!(
                        "Webhook delivery failed ({:#}), retrying in {:?} (attempt {}/{})",
                        e, delay, attempt, self.config.max_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(e.context(format!(
                        "webhook delivery failed after {} attempts",
                        attempt + 1
                    )))
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
