//! Keyword lexicon for scoring free text into [-1, 1].

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[a-z][a-z']*").unwrap();
}

const NEGATIVE_WORDS: &[&str] = &[
    "crash", "drop", "fall", "falling", "decline", "loss", "fail", "bad", "negative",
    "worst", "downward", "bearish", "sell", "dump", "collapse", "risk", "danger",
    "threat", "hack", "exploit", "rug", "scam", "fear", "panic", "liquidation",
];

const POSITIVE_WORDS: &[&str] = &[
    "growth", "rise", "rising", "increase", "gain", "profit", "success", "good",
    "positive", "best", "upward", "bullish", "buy", "recovery", "boom",
    "breakthrough", "win", "rally", "pump", "moon", "adoption", "partnership",
    "upgrade", "record",
];

/// Positive/negative word sets.
#[derive(Debug, Clone)]
pub struct Lexicon {
    positive: HashSet<String>,
    negative: HashSet<String>,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::new(POSITIVE_WORDS, NEGATIVE_WORDS)
    }
}

impl Lexicon {
    pub fn new(positive: &[&str], negative: &[&str]) -> Self {
        Self {
            positive: positive.iter().map(|w| w.to_lowercase()).collect(),
            negative: negative.iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    /// Net polarity of `text`: (positive hits - negative hits) / total hits.
    /// Returns 0.0 when no lexicon word occurs.
    pub fn score(&self, text: &str) -> f64 {
        let lowered = text.to_lowercase();
        let mut positive = 0u32;
        let mut negative = 0u32;

        for word in WORD.find_iter(&lowered) {
            let w = word.as_str();
            if self.positive.contains(w) {
                positive += 1;
            } else if self.negative.contains(w) {
                negative += 1;
            }
        }

        let total = positive + negative;
        if total == 0 {
            return 0.0;
        }
        ((positive as f64 - negative as f64) / total as f64).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_polarity() {
        let lexicon = Lexicon::default();
        assert_eq!(lexicon.score("Bullish breakout, huge rally!"), 1.0);
        assert_eq!(lexicon.score("Exchange hack triggers panic"), -1.0);
        assert_eq!(lexicon.score("Validators meet on Tuesday"), 0.0);
        assert_eq!(lexicon.score("rally then crash"), 0.0);
    }

    #[test]
    fn test_matches_whole_words_only() {
        let lexicon = Lexicon::default();
        // "buyback" and "falls" are not lexicon words
        assert_eq!(lexicon.score("buyback falls"), 0.0);
    }
}
