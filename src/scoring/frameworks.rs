//! Evaluation frameworks
//!
//! A framework assigns a weight to each of the four rubric dimensions of a
//! [`SessionEvaluation`]. A session's score is
//! `Σ (rating / 5 × weight) × 100`, clamped to `[0, 100]`.

use serde::Serialize;

use crate::storage::SessionEvaluation;

/// Identifiers accepted by [`framework_by_id`].
pub const FRAMEWORK_IDS: &[&str] = &["space", "raw"];

/// Weights of the four rubric dimensions; they sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RubricWeights {
    pub prompt_quality: f64,
    pub context_provided: f64,
    pub independence_level: f64,
    pub scope_quality: f64,
}

/// A rubric that turns an evaluation into a 0-100 score
pub trait EvaluationFramework: Send + Sync + std::fmt::Debug {
    /// Stable identifier (`"space"`, `"raw"`)
    fn id(&self) -> &'static str;

    /// Human readable name
    fn name(&self) -> &'static str;

    fn weights(&self) -> RubricWeights;

    /// Score one evaluation in `[0, 100]`.
    fn compute_session_score(&self, evaluation: &SessionEvaluation) -> f64 {
        let w = self.weights();
        let score = (rating_fraction(evaluation.prompt_quality) * w.prompt_quality
            + rating_fraction(evaluation.context_provided) * w.context_provided
            + rating_fraction(evaluation.independence_level) * w.independence_level
            + rating_fraction(evaluation.scope_quality) * w.scope_quality)
            * 100.0;
        score.clamp(0.0, 100.0)
    }
}

fn rating_fraction(rating: u8) -> f64 {
    f64::from(rating.min(5)) / 5.0
}

/// SPACE-inspired weighting that favours prompt quality
#[derive(Debug, Clone, Copy, Default)]
pub struct SpaceFramework;

impl EvaluationFramework for SpaceFramework {
    fn id(&self) -> &'static str {
        "space"
    }

    fn name(&self) -> &'static str {
        "SPACE"
    }

    fn weights(&self) -> RubricWeights {
        RubricWeights {
            prompt_quality: 0.30,
            context_provided: 0.25,
            independence_level: 0.25,
            scope_quality: 0.20,
        }
    }
}

/// Unweighted average of the four dimensions
#[derive(Debug, Clone, Copy, Default)]
pub struct RawFramework;

impl EvaluationFramework for RawFramework {
    fn id(&self) -> &'static str {
        "raw"
    }

    fn name(&self) -> &'static str {
        "Raw"
    }

    fn weights(&self) -> RubricWeights {
        RubricWeights {
            prompt_quality: 0.25,
            context_provided: 0.25,
            independence_level: 0.25,
            scope_quality: 0.25,
        }
    }
}

/// Look up a framework by id, case-insensitively.
pub fn framework_by_id(id: &str) -> Option<Box<dyn EvaluationFramework>> {
    match id.trim().to_lowercase().as_str() {
        "space" => Some(Box::new(SpaceFramework)),
        "raw" => Some(Box::new(RawFramework)),
        _ => None,
    }
}
