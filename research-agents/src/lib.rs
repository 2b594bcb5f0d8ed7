//! Research Agents - sentiment layer
//!
//! This crate turns heterogeneous text/social signals into a bounded
//! sentiment score. It includes:
//! - A keyword lexicon for scoring raw text
//! - The recency-weighted sentiment aggregator
//! - The collector boundary (`SentimentSource`) with an in-memory buffer

pub mod lexicon;
pub mod sentiment;
pub mod source;

pub use lexicon::Lexicon;
pub use sentiment::{RawSentiment, SentimentAggregator, SentimentConfig, SentimentScore};
pub use source::{InMemorySentimentSource, SentimentSource};
