//! Expected criteria and the scoring strategies they resolve to.
//!
//! A fixture declares criteria as a tagged [`Criteria`] value. At load time
//! each one is resolved into an `Arc<dyn ScoringStrategy>` (regexes compiled,
//! weights validated), so a malformed criterion is a fixture error rather
//! than a per-task failure. The scheduler and aggregator only ever see the
//! trait object.

use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ScoringError;

/// Computes raw points for a transcript.
///
/// Implementations must be pure: identical transcripts yield identical
/// results. Points outside `[0, 1]` are clamped by the [`Scorer`](super::Scorer).
pub trait ScoringStrategy: Send + Sync + fmt::Debug {
    /// Name of the criteria kind, used in logs and error messages.
    fn kind(&self) -> &'static str;

    fn score(&self, transcript: &str) -> Result<f64, ScoringError>;
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

/// One weighted item of a rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricItem {
    /// Human-readable description of what the item rewards.
    pub criterion: String,
    /// Regex that must match the transcript for the item to count.
    pub pattern: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// Expected criteria for a prompt, as declared in the fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Criteria {
    /// Trimmed transcript equals `expected`.
    ExactMatch {
        expected: String,
        #[serde(default = "default_true")]
        case_sensitive: bool,
    },
    /// Fraction of `substrings` present in the transcript.
    Substring {
        substrings: Vec<String>,
        #[serde(default = "default_true")]
        case_sensitive: bool,
    },
    /// Transcript matches `pattern`.
    Regex { pattern: String },
    /// Matched weight over total weight.
    Rubric { items: Vec<RubricItem> },
    /// Transcript is JSON whose value at `pointer` equals `expected`.
    JsonField {
        pointer: String,
        expected: serde_json::Value,
    },
}

impl Criteria {
    pub fn kind(&self) -> &'static str {
        match self {
            Criteria::ExactMatch { .. } => "exact_match",
            Criteria::Substring { .. } => "substring",
            Criteria::Regex { .. } => "regex",
            Criteria::Rubric { .. } => "rubric",
            Criteria::JsonField { .. } => "json_field",
        }
    }

    /// Builds the scoring strategy for these criteria.
    ///
    /// Returns a description of the problem when the criteria cannot be
    /// evaluated (empty substring list, invalid regex, bad weights, ...).
    pub fn resolve(&self) -> Result<Arc<dyn ScoringStrategy>, String> {
        match self {
            Criteria::ExactMatch {
                expected,
                case_sensitive,
            } => Ok(Arc::new(ExactMatchStrategy {
                expected: expected.trim().to_string(),
                case_sensitive: *case_sensitive,
            })),
            Criteria::Substring {
                substrings,
                case_sensitive,
            } => {
                if substrings.is_empty() {
                    return Err("substring criteria need at least one substring".to_string());
                }
                Ok(Arc::new(SubstringStrategy {
                    substrings: substrings.clone(),
                    case_sensitive: *case_sensitive,
                }))
            }
            Criteria::Regex { pattern } => {
                let regex = Regex::new(pattern)
                    .map_err(|e| format!("invalid regex '{}': {}", pattern, e))?;
                Ok(Arc::new(RegexStrategy { regex }))
            }
            Criteria::Rubric { items } => {
                let strategy = RubricStrategy::new(items)?;
                Ok(Arc::new(strategy))
            }
            Criteria::JsonField { pointer, expected } => {
                if !pointer.is_empty() && !pointer.starts_with('/') {
                    return Err(format!(
                        "json pointer '{}' must be empty or start with '/'",
                        pointer
                    ));
                }
                Ok(Arc::new(JsonFieldStrategy {
                    pointer: pointer.clone(),
                    expected: expected.clone(),
                }))
            }
        }
    }
}

#[derive(Debug)]
struct ExactMatchStrategy {
    expected: String,
    case_sensitive: bool,
}

impl ScoringStrategy for ExactMatchStrategy {
    fn kind(&self) -> &'static str {
        "exact_match"
    }

    fn score(&self, transcript: &str) -> Result<f64, ScoringError> {
        let actual = transcript.trim();
        let matched = if self.case_sensitive {
            actual == self.expected
        } else {
            actual.to_lowercase() == self.expected.to_lowercase()
        };
        Ok(if matched { 1.0 } else { 0.0 })
    }
}

#[derive(Debug)]
struct SubstringStrategy {
    substrings: Vec<String>,
    case_sensitive: bool,
}

impl ScoringStrategy for SubstringStrategy {
    fn kind(&self) -> &'static str {
        "substring"
    }

    fn score(&self, transcript: &str) -> Result<f64, ScoringError> {
        let haystack = if self.case_sensitive {
            transcript.to_string()
        } else {
            transcript.to_lowercase()
        };

        let found = self
            .substrings
            .iter()
            .filter(|needle| {
                if self.case_sensitive {
                    haystack.contains(needle.as_str())
                } else {
                    haystack.contains(&needle.to_lowercase())
                }
            })
            .count();

        Ok(found as f64 / self.substrings.len() as f64)
    }
}

#[derive(Debug)]
struct RegexStrategy {
    regex: Regex,
}

impl ScoringStrategy for RegexStrategy {
    fn kind(&self) -> &'static str {
        "regex"
    }

    fn score(&self, transcript: &str) -> Result<f64, ScoringError> {
        Ok(if self.regex.is_match(transcript) { 1.0 } else { 0.0 })
    }
}

#[derive(Debug)]
struct RubricStrategy {
    items: Vec<(Regex, f64)>,
    total_weight: f64,
}

impl RubricStrategy {
    fn new(items: &[RubricItem]) -> Result<Self, String> {
        if items.is_empty() {
            return Err("rubric criteria need at least one item".to_string());
        }

        let mut compiled = Vec::with_capacity(items.len());
        for item in items {
            if !item.weight.is_finite() || item.weight <= 0.0 {
                return Err(format!(
                    "rubric item '{}' has invalid weight {}",
                    item.criterion, item.weight
                ));
            }
            let regex = RegexBuilder::new(&item.pattern)
                .multi_line(true)
                .build()
                .map_err(|e| format!("rubric item '{}': invalid regex: {}", item.criterion, e))?;
            compiled.push((regex, item.weight));
        }

        let total_weight = compiled.iter().map(|(_, w)| w).sum();
        Ok(Self {
            items: compiled,
            total_weight,
        })
    }
}

impl ScoringStrategy for RubricStrategy {
    fn kind(&self) -> &'static str {
        "rubric"
    }

    fn score(&self, transcript: &str) -> Result<f64, ScoringError> {
        let earned: f64 = self
            .items
            .iter()
            .filter(|(regex, _)| regex.is_match(transcript))
            .map(|(_, weight)| weight)
            .sum();
        Ok(earned / self.total_weight)
    }
}

#[derive(Debug)]
struct JsonFieldStrategy {
    pointer: String,
    expected: serde_json::Value,
}

impl ScoringStrategy for JsonFieldStrategy {
    fn kind(&self) -> &'static str {
        "json_field"
    }

    fn score(&self, transcript: &str) -> Result<f64, ScoringError> {
        let value: serde_json::Value =
            serde_json::from_str(transcript.trim()).map_err(|e| ScoringError::InvalidTranscript {
                kind: "json_field",
                message: e.to_string(),
            })?;

        Ok(match value.pointer(&self.pointer) {
            Some(actual) if *actual == self.expected => 1.0,
            _ => 0.0,
        })
    }
}
