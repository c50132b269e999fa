//! Session scoring and the AI Proficiency Score (APS)
//!
//! - `frameworks` -- pluggable [`EvaluationFramework`] rubrics (SPACE, RAW)
//! - `aps`        -- the five-component APS composer and streak counting
//!
//! Everything in this module is pure: identical inputs always produce the
//! identical score.

pub mod aps;
pub mod frameworks;

pub use aps::{compute_local_aps, compute_streak_days, complexity_weight, ApsComponents, ApsScore};
pub use frameworks::{
    framework_by_id, EvaluationFramework, RawFramework, RubricWeights, SpaceFramework,
    FRAMEWORK_IDS,
};
