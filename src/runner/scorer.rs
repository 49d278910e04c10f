//! Scorer: turns a raw execution into points and a classification.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigValidationError, ScoringError};

use super::agents::RawExecution;
use super::criteria::ScoringStrategy;
use super::result::Classification;

fn default_success() -> f64 {
    1.0
}

/// Points cut-off for the `SUCCESS` classification.
///
/// Points at or above `success` classify as `SUCCESS`, points above zero as
/// `PARTIAL`, and everything else as `FAIL`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreThresholds {
    #[serde(default = "default_success")]
    pub success: f64,
}

impl Default for ScoreThresholds {
    fn default() -> Self {
        Self {
            success: default_success(),
        }
    }
}

impl ScoreThresholds {
    pub fn new(success: f64) -> Self {
        Self { success }
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.success.is_finite() || self.success <= 0.0 || self.success > 1.0 {
            return Err(ConfigValidationError::InvalidThreshold(self.success));
        }
        Ok(())
    }

    /// Classifies already-clamped points.
    pub fn classify(&self, points: f64) -> Classification {
        if points >= self.success {
            Classification::Success
        } else if points > 0.0 {
            Classification::Partial
        } else {
            Classification::Fail
        }
    }
}

/// Points and classification for one execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub classification: Classification,
    pub points: f64,
}

impl Score {
    /// The forced outcome for failed executions.
    pub fn failed() -> Self {
        Self {
            classification: Classification::Fail,
            points: 0.0,
        }
    }
}

/// Applies a scoring strategy and the thresholds to a raw execution.
///
/// Synchronous and side-effect free, so it can be called from any worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scorer {
    thresholds: ScoreThresholds,
}

impl Scorer {
    pub fn new(thresholds: ScoreThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> ScoreThresholds {
        self.thresholds
    }

    pub fn classify(
        &self,
        strategy: &dyn ScoringStrategy,
        raw: &RawExecution,
    ) -> Result<Score, ScoringError> {
        // Error, timeout and cancellation never earn points, whatever the transcript says.
        if raw.status.is_failure() {
            return Ok(Score::failed());
        }

        let points = strategy.score(&raw.transcript)?;
        if points.is_nan() {
            return Err(ScoringError::NonFinite {
                kind: strategy.kind(),
            });
        }

        let points = points.clamp(0.0, 1.0);
        Ok(Score {
            classification: self.thresholds.classify(points),
            points,
        })
    }
}
