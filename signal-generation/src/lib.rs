// Signal Generation Engine (Layer 2)
// Fuses chart analysis, sentiment and model predictions into risk-sized trade signals

pub mod chart;
pub mod config;
pub mod dedup;
pub mod emission;
pub mod engine;
pub mod features;
pub mod fusion;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod signals;
pub mod storage;
pub mod validators;

pub use chart::{ChartAnalyzer, ChartConfig, TrendAssessment};
pub use config::{create_config_template, EngineConfig};
pub use emission::{
    DisplaySink, EmissionConfig, LogNotifier, NotificationSink, Notifier, SignalBus, SignalSink,
    WebhookConfig, WebhookSink,
};
pub use engine::SignalEngine;
pub use features::{FeatureConfig, FeatureExtractor, FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
pub use fusion::{fuse, Fusion, FusionConfig, FusionInputs};
pub use metrics::SignalMetrics;
pub use model::{ModelConfig, PredictionResult, PredictiveModel, SoftmaxModel, SoftmaxWeights};
pub use pipeline::{
    AlertSink, EvaluationOutcome, InstrumentPipeline, LogAlertSink, PipelineConfig,
    PipelineState, PipelineStats, SuppressReason,
};
pub use signals::{FingerprintKey, Signal, SignalPayload};
pub use storage::{InMemorySignalStore, SignalStore, StorageStats};
pub use validators::{
    ConfidenceValidator, ExpectedProfitValidator, GateConfig, RiskLevelValidator,
    RiskRewardValidator, SignalValidator,
};
