//! AI Proficiency Score
//!
//! The APS is a 0-1000 composite of five components, each in `[0, 1]`:
//!
//! | component        | weight | source                                        |
//! |------------------|--------|-----------------------------------------------|
//! | `output`         | 0.25   | milestone complexity, saturating at 10 points |
//! | `efficiency`     | 0.25   | files touched per hour, saturating at 20      |
//! | `prompt_quality` | 0.20   | mean framework score of evaluated sessions    |
//! | `consistency`    | 0.15   | consecutive active days, saturating at 14     |
//! | `breadth`        | 0.15   | distinct languages, saturating at 5           |

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, NaiveDate};
use serde::Serialize;

use crate::scoring::EvaluationFramework;
use crate::storage::{Milestone, Seal};

const OUTPUT_SATURATION: f64 = 10.0;
const FILES_PER_HOUR_SATURATION: f64 = 20.0;
const STREAK_SATURATION: f64 = 14.0;
const LANGUAGE_SATURATION: f64 = 5.0;

/// The five normalized APS components
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ApsComponents {
    pub output: f64,
    pub efficiency: f64,
    pub prompt_quality: f64,
    pub consistency: f64,
    pub breadth: f64,
}

impl ApsComponents {
    /// Weighted sum in `[0, 1]`
    pub fn weighted(&self) -> f64 {
        0.25 * self.output
            + 0.25 * self.efficiency
            + 0.20 * self.prompt_quality
            + 0.15 * self.consistency
            + 0.15 * self.breadth
    }
}

/// A computed score with the components it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApsScore {
    pub score: u32,
    pub framework: &'static str,
    pub components: ApsComponents,
}

/// Points a milestone contributes to `output`.
pub fn complexity_weight(complexity: &str) -> f64 {
    match complexity.trim().to_lowercase().as_str() {
        "simple" | "trivial" | "easy" | "low" => 1.0,
        "medium" | "moderate" => 2.0,
        "complex" | "hard" | "difficult" | "high" => 4.0,
        _ => 2.0,
    }
}

/// Compute the APS from sealed sessions and milestones.
///
/// Languages are counted across both sessions and milestones. The result
/// depends only on the arguments.
///
/// # Arguments
///
/// * `sessions` - Sealed sessions, typically the whole `sessions.json`
/// * `milestones` - Recorded milestones
/// * `streak_days` - Consecutive active days, see [`compute_streak_days`]
/// * `framework` - Rubric used to turn each evaluation into a 0-100 score
///
/// # Returns
///
/// The 0-1000 score with each capped component.
///
/// # Examples
///
/// ```
/// use proofwork::scoring::{compute_local_aps, SpaceFramework};
///
/// let aps = compute_local_aps(&[], &[], 0, &SpaceFramework);
/// assert_eq!(aps.score, 0);
/// assert_eq!(aps.framework, "space");
/// ```
pub fn compute_local_aps(
    sessions: &[Seal],
    milestones: &[Milestone],
    streak_days: u32,
    framework: &dyn EvaluationFramework,
) -> ApsScore {
    let complexity_points: f64 = milestones
        .iter()
        .map(|m| complexity_weight(&m.complexity))
        .sum();
    let output = complexity_points / OUTPUT_SATURATION;

    let total_files: f64 = sessions
        .iter()
        .map(|s| f64::from(s.summary.files_touched))
        .sum();
    let total_seconds: i64 = sessions
        .iter()
        .map(|s| s.summary.duration_seconds.max(0))
        .sum();
    let total_hours = total_seconds as f64 / 3600.0;
    let efficiency = total_files / total_hours.max(1.0) / FILES_PER_HOUR_SATURATION;

    let evaluated: Vec<f64> = sessions
        .iter()
        .filter_map(|s| s.summary.evaluation.as_ref())
        .map(|e| framework.compute_session_score(e) / 100.0)
        .collect();
    let prompt_quality = if evaluated.is_empty() {
        0.0
    } else {
        evaluated.iter().sum::<f64>() / evaluated.len() as f64
    };

    let consistency = f64::from(streak_days) / STREAK_SATURATION;

    let languages: HashSet<String> = sessions
        .iter()
        .flat_map(|s| s.summary.languages.iter())
        .chain(milestones.iter().flat_map(|m| m.languages.iter()))
        .map(|l| l.trim().to_lowercase())
        .filter(|l| !l.is_empty())
        .collect();
    let breadth = languages.len() as f64 / LANGUAGE_SATURATION;

    let components = ApsComponents {
        output: unit(output),
        efficiency: unit(efficiency),
        prompt_quality: unit(prompt_quality),
        consistency: unit(consistency),
        breadth: unit(breadth),
    };

    // f64::round rounds half away from zero
    let score = (1000.0 * components.weighted()).round() as u32;

    ApsScore {
        score,
        framework: framework.id(),
        components,
    }
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Count consecutive UTC days, ending at `today`, with at least one sealed
/// session.
///
/// A streak still counts when today has no session yet; counting then
/// starts from yesterday. Sessions with an unparseable `ended_at` are
/// ignored.
pub fn compute_streak_days(sessions: &[Seal], today: NaiveDate) -> u32 {
    let days: BTreeSet<NaiveDate> = sessions
        .iter()
        .filter_map(|s| DateTime::parse_from_rfc3339(&s.summary.ended_at).ok())
        .map(|t| t.naive_utc().date())
        .collect();

    let mut cursor = if days.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };

    let mut streak = 0;
    while days.contains(&cursor) {
        streak += 1;
        cursor -= Duration::days(1);
    }
    streak
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{RawFramework, SpaceFramework};
    use crate::storage::{SealSummary, SessionEvaluation};

    fn seal(ended_at: &str, files: u32, seconds: i64, languages: &[&str]) -> Seal {
        Seal {
            summary: SealSummary {
                session_id: "s".into(),
                client: "cursor".into(),
                task_type: "coding".into(),
                languages: languages.iter().map(|l| l.to_string()).collect(),
                files_touched: files,
                started_at: ended_at.into(),
                ended_at: ended_at.into(),
                duration_seconds: seconds,
                heartbeat_count: 0,
                record_count: 3,
                chain_start_hash: "GENESIS".into(),
                chain_end_hash: "abc".into(),
                evaluation: None,
                model: None,
                project: None,
                title: None,
                private_title: None,
                conversation_id: None,
                conversation_index: None,
                auto_sealed: false,
            },
            seal_signature: "unsigned".into(),
        }
    }

    fn milestone(complexity: &str) -> Milestone {
        Milestone {
            id: "m_00000000".into(),
            session_id: "s".into(),
            title: "Add parser".into(),
            category: "feature".into(),
            complexity: complexity.into(),
            duration_minutes: 10,
            languages: vec![],
            client: "cursor".into(),
            created_at: "2026-01-01T00:00:00+00:00".into(),
            published: false,
            private_title: None,
        }
    }

    fn evaluation(p: u8, c: u8, i: u8, s: u8) -> SessionEvaluation {
        SessionEvaluation {
            prompt_quality: p,
            context_provided: c,
            independence_level: i,
            scope_quality: s,
            task_outcome: None,
            iteration_count: None,
            tools_leveraged: None,
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_empty_history_scores_zero() {
        let aps = compute_local_aps(&[], &[], 0, &SpaceFramework);
        assert_eq!(aps.score, 0);
        assert_eq!(aps.components, ApsComponents::default());
        assert_eq!(aps.framework, "space");
    }

    #[test]
    fn test_complexity_weights() {
        assert_eq!(complexity_weight("Trivial"), 1.0);
        assert_eq!(complexity_weight("moderate"), 2.0);
        assert_eq!(complexity_weight("HARD"), 4.0);
        assert_eq!(complexity_weight("galactic"), 2.0);
    }

    #[test]
    fn test_output_saturates() {
        let milestones = vec![milestone("complex"), milestone("complex"), milestone("complex")];
        let aps = compute_local_aps(&[], &milestones, 0, &SpaceFramework);
        assert_eq!(aps.components.output, 1.0);
        assert_eq!(aps.score, 250);
    }

    #[test]
    fn test_efficiency_uses_one_hour_floor() {
        // 10 files in 30 minutes counts as 10 files per hour
        let sessions = vec![seal("2026-03-01T10:00:00+00:00", 10, 1800, &[])];
        let aps = compute_local_aps(&sessions, &[], 0, &SpaceFramework);
        assert!((aps.components.efficiency - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_breadth_is_case_insensitive() {
        let sessions = vec![
            seal("2026-03-01T10:00:00+00:00", 0, 60, &["Rust", "rust"]),
            seal("2026-03-01T11:00:00+00:00", 0, 60, &["TypeScript"]),
        ];
        let aps = compute_local_aps(&sessions, &[], 0, &SpaceFramework);
        assert!((aps.components.breadth - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_prompt_quality_averages_evaluated_sessions_only() {
        let mut evaluated = seal("2026-03-01T10:00:00+00:00", 0, 60, &[]);
        evaluated.summary.evaluation = Some(evaluation(5, 3, 2, 4));
        let plain = seal("2026-03-01T11:00:00+00:00", 0, 60, &[]);
        let sessions = vec![evaluated, plain];

        let space = compute_local_aps(&sessions, &[], 0, &SpaceFramework);
        let raw = compute_local_aps(&sessions, &[], 0, &RawFramework);
        assert!((space.components.prompt_quality - 0.71).abs() < 1e-9);
        assert!((raw.components.prompt_quality - 0.70).abs() < 1e-9);
        assert_eq!(space.score, 142);
        assert_eq!(raw.score, 140);
    }

    #[test]
    fn test_full_marks_score_1000() {
        let mut s = seal("2026-03-01T10:00:00+00:00", 40, 3600, &["a", "b", "c", "d", "e"]);
        s.summary.evaluation = Some(evaluation(5, 5, 5, 5));
        let milestones = vec![milestone("high"); 3];
        let aps = compute_local_aps(&[s], &milestones, 30, &RawFramework);
        assert_eq!(aps.score, 1000);
    }

    #[test]
    fn test_score_is_deterministic() {
        let sessions = vec![seal("2026-03-01T10:00:00+00:00", 7, 5400, &["go"])];
        let milestones = vec![milestone("medium")];
        let a = compute_local_aps(&sessions, &milestones, 3, &SpaceFramework);
        let b = compute_local_aps(&sessions, &milestones, 3, &SpaceFramework);
        assert_eq!(a, b);
    }

    #[test]
    fn test_streak_counts_consecutive_days() {
        let sessions = vec![
            seal("2026-03-10T09:00:00+00:00", 0, 60, &[]),
            seal("2026-03-09T23:30:00+00:00", 0, 60, &[]),
            seal("2026-03-08T01:00:00+00:00", 0, 60, &[]),
            seal("2026-03-06T12:00:00+00:00", 0, 60, &[]),
        ];
        assert_eq!(compute_streak_days(&sessions, date("2026-03-10")), 3);
    }

    #[test]
    fn test_streak_starts_yesterday_when_today_empty() {
        let sessions = vec![
            seal("2026-03-09T09:00:00+00:00", 0, 60, &[]),
            seal("2026-03-08T09:00:00+00:00", 0, 60, &[]),
        ];
        assert_eq!(compute_streak_days(&sessions, date("2026-03-10")), 2);
        assert_eq!(compute_streak_days(&sessions, date("2026-03-11")), 0);
    }

    #[test]
    fn test_streak_uses_utc_dates() {
        // 23:30 at -05:00 is the next day in UTC
        let sessions = vec![seal("2026-03-09T23:30:00-05:00", 0, 60, &[])];
        assert_eq!(compute_streak_days(&sessions, date("2026-03-10")), 1);
    }
}
