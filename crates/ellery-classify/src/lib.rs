//! Transcript complexity classification for provider routing.
//!
//! The orchestrator routes SIMPLE/MODERATE turns to the fast backend and
//! COMPLEX turns to the accurate one. Classification is a pluggable policy
//! behind the [`Classifier`] trait so the heuristic can be replaced without
//! touching the orchestrator; the shipped implementation is deterministic
//! keyword/length scoring with tunable thresholds.

use ellery_types::{ComplexityClass, Message};
use serde::Deserialize;

/// Routing policy: assigns a complexity class to a transcript.
///
/// Implementations must be deterministic given identical inputs — the class
/// feeds cache-key-stable routing decisions and the tests rely on it.
pub trait Classifier: Send + Sync {
    fn classify(&self, transcript: &str, prior_context: &[Message]) -> ComplexityClass;
}

/// Tunable thresholds for [`HeuristicClassifier`].
///
/// Exact cutoffs are configuration rather than hard-coded: deployments tune
/// them against their own traffic.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Transcripts with at most this many words are greeting candidates.
    #[serde(default = "default_short_max_words")]
    pub short_transcript_max_words: usize,
    /// Transcripts with at least this many words classify COMPLEX outright.
    #[serde(default = "default_long_min_words")]
    pub long_transcript_min_words: usize,
    /// Domain-keyword hits at or above this count push a turn to COMPLEX
    /// when the transcript also has multi-clause shape.
    #[serde(default = "default_keyword_min_hits")]
    pub domain_keyword_min_hits: usize,
}

fn default_short_max_words() -> usize {
    6
}

fn default_long_min_words() -> usize {
    28
}

fn default_keyword_min_hits() -> usize {
    2
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            short_transcript_max_words: default_short_max_words(),
            long_transcript_min_words: default_long_min_words(),
            domain_keyword_min_hits: default_keyword_min_hits(),
        }
    }
}

/// Greeting / smalltalk lexicon. A short transcript made of these (plus
/// politeness filler) classifies SIMPLE.
const GREETING_WORDS: &[&str] = &[
    "hello", "hi", "hey", "thanks", "thank", "goodbye", "bye", "morning", "afternoon", "evening",
    "please", "ok", "okay", "yes", "no", "you", "how", "are", "there", "good",
];

/// Domain lexicon for the legal-assistant deployment. Presence of several of
/// these in a multi-clause query signals a COMPLEX turn.
const DOMAIN_KEYWORDS: &[&str] = &[
    "contract",
    "agreement",
    "liability",
    "lawsuit",
    "attorney",
    "lawyer",
    "statute",
    "regulation",
    "compliance",
    "clause",
    "negligence",
    "damages",
    "plaintiff",
    "defendant",
    "jurisdiction",
    "indemnification",
    "arbitration",
    "tort",
];

/// Deterministic keyword/length heuristic.
#[derive(Debug, Clone, Default)]
pub struct HeuristicClassifier {
    config: ClassifierConfig,
}

impl HeuristicClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }
}

/// Lowercased alphanumeric words of a transcript.
fn words(transcript: &str) -> Vec<String> {
    transcript
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

/// Counts clause separators as a cheap proxy for multi-clause structure.
fn clause_count(transcript: &str) -> usize {
    1 + transcript
        .chars()
        .filter(|c| matches!(c, ',' | ';' | '?' | '.'))
        .count()
}

impl Classifier for HeuristicClassifier {
    fn classify(&self, transcript: &str, prior_context: &[Message]) -> ComplexityClass {
        let words = words(transcript);
        if words.is_empty() {
            return ComplexityClass::Simple;
        }

        let keyword_hits = words
            .iter()
            .filter(|w| DOMAIN_KEYWORDS.contains(&w.as_str()))
            .count();

        // Long transcripts are complex regardless of lexicon: length alone
        // exceeds the tie-break-toward-cheap rule.
        if words.len() >= self.config.long_transcript_min_words {
            return ComplexityClass::Complex;
        }

        // Dense domain vocabulary plus multi-clause shape.
        if keyword_hits >= self.config.domain_keyword_min_hits && clause_count(transcript) >= 2 {
            return ComplexityClass::Complex;
        }

        // Short smalltalk with no domain vocabulary. A domain keyword in the
        // prior turn keeps even a short follow-up at MODERATE, since it is
        // likely a continuation of the harder thread.
        if words.len() <= self.config.short_transcript_max_words && keyword_hits == 0 {
            let prior_domain = prior_context.iter().rev().take(2).any(|m| {
                let prior_words = crate::words(&m.text);
                prior_words
                    .iter()
                    .any(|w| DOMAIN_KEYWORDS.contains(&w.as_str()))
            });
            let greeting_like = words
                .iter()
                .filter(|w| GREETING_WORDS.contains(&w.as_str()))
                .count()
                * 2
                >= words.len();
            if !prior_domain && greeting_like {
                return ComplexityClass::Simple;
            }
        }

        // Everything else ties toward the cheaper of the remaining classes.
        ComplexityClass::Moderate
    }
}
