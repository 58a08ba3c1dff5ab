use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::aggregate::Aggregator;
use crate::assignments;
use crate::error::{CoreError, CoreResult};
use crate::model::{Actor, AggregateKey, Submission, TrimesterGrade};
use crate::submissions;

pub const MIN_GRADE: f64 = 0.0;
pub const MAX_GRADE: f64 = 10.0;

/// Inputs that mean "no grade" rather than a malformed number.
const CLEAR_TOKENS: [&str; 5] = ["", "null", "undefined", "nan", "none"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeChange {
    Clear,
    /// Grade held as tenths, 0..=100.
    Set(i64),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeOutcome {
    pub submission: Submission,
    pub trimester_grade: Option<TrimesterGrade>,
    /// True when the grade was stored but the trimester aggregate could not be refreshed.
    pub aggregate_stale: bool,
}

/// Nearest tenth, half away from zero: 7.85 -> 79.
pub fn round_to_tenths(value: f64) -> i64 {
    (value * 10.0).round() as i64
}

pub fn normalize_grade(raw: Option<&str>) -> CoreResult<GradeChange> {
    let Some(raw) = raw else {
        return Ok(GradeChange::Clear);
    };
    let trimmed = raw.trim();
    if CLEAR_TOKENS.contains(&trimmed.to_ascii_lowercase().as_str()) {
        return Ok(GradeChange::Clear);
    }

    // A single decimal comma ("7,5") is common in hand-typed grades.
    let normalized = if trimmed.matches(',').count() == 1 && !trimmed.contains('.') {
        trimmed.replace(',', ".")
    } else {
        trimmed.to_string()
    };
    let value: f64 = normalized
        .parse()
        .map_err(|_| CoreError::validation(format!("grade is not a number: {trimmed}")))?;
    if !value.is_finite() {
        return Err(CoreError::validation(format!(
            "grade is not a number: {trimmed}"
        )));
    }
    if !(MIN_GRADE..=MAX_GRADE).contains(&value) {
        return Err(CoreError::validation(format!(
            "grade must be between {MIN_GRADE} and {MAX_GRADE} (got {value})"
        )));
    }
    Ok(GradeChange::Set(round_to_tenths(value)))
}

fn normalize_comment(comment: Option<&str>) -> Option<String> {
    comment
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Records or clears a grade, then refreshes the trimester aggregate.
///
/// The submission row is authoritative: an aggregate failure is logged and
/// reported via `aggregate_stale`, never as an error of this call.
pub fn grade_submission<A: Aggregator + ?Sized>(
    conn: &Connection,
    aggregator: &A,
    actor: &Actor,
    submission_id: &str,
    raw_grade: Option<&str>,
    comment: Option<&str>,
    now: DateTime<Utc>,
) -> CoreResult<GradeOutcome> {
    let submission = submissions::require(conn, submission_id)?;
    let assignment = assignments::require_owned(conn, &submission.assignment_id, actor)?;
    let change = normalize_grade(raw_grade)?;

    match change {
        GradeChange::Clear => submissions::clear_grade(conn, &submission.id)?,
        GradeChange::Set(tenths) => submissions::apply_grade(
            conn,
            &submission.id,
            tenths,
            normalize_comment(comment).as_deref(),
            now,
        )?,
    }

    let key = AggregateKey::new(
        submission.student_id.clone(),
        assignment.subject_id.clone(),
        assignment.trimester.clone(),
    );
    let (trimester_grade, aggregate_stale) = match aggregator.recompute(conn, &key, now) {
        Ok(g) => (g, false),
        Err(e) => {
            let e = CoreError::AggregateRecompute(e.to_string());
            tracing::warn!(
                submission_id = %submission.id,
                student_id = %key.student_id,
                subject_id = %key.subject_id,
                trimester = %key.trimester,
                error = %e,
                "grade stored; trimester aggregate left stale"
            );
            (None, true)
        }
    };

    tracing::info!(
        submission_id = %submission.id,
        grade = ?change,
        "graded submission"
    );
    Ok(GradeOutcome {
        submission: submissions::require(conn, &submission.id)?,
        trimester_grade,
        aggregate_stale,
    })
}
