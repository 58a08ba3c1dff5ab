//! Per-student submissions and their state machine:
//! `pending -> submitted -> graded`, plus `graded -> submitted` when a grade
//! is cleared. There is no terminal state; rows go away only when their
//! assignment is deleted.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::assignments;
use crate::attachments::{AttachmentKind, AttachmentManager, Upload};
use crate::error::{CoreError, CoreResult};
use crate::model::{format_ts, Actor, Assignment, Submission, SubmissionStatus};

const SUBMISSION_COLUMNS: &str = "id, assignment_id, student_id, status, grade_tenths,
    teacher_comment, submitted_at, graded_at, attachment_ref";

/// What a student is handing work in against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionTarget {
    Submission(String),
    /// Opens the student's submission implicitly if none exists yet.
    Assignment(String),
}

fn row_to_submission(row: &rusqlite::Row<'_>) -> rusqlite::Result<Submission> {
    let raw_status: String = row.get(3)?;
    let status = SubmissionStatus::parse(&raw_status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown submission status: {raw_status}").into(),
        )
    })?;
    let grade_tenths: Option<i64> = row.get(4)?;
    Ok(Submission {
        id: row.get(0)?,
        assignment_id: row.get(1)?,
        student_id: row.get(2)?,
        status,
        grade: grade_tenths.map(|t| t as f64 / 10.0),
        teacher_comment: row.get(5)?,
        submitted_at: row.get(6)?,
        graded_at: row.get(7)?,
        attachment_ref: row.get(8)?,
    })
}

pub fn get(conn: &Connection, id: &str) -> CoreResult<Option<Submission>> {
    let s = conn
        .query_row(
            &format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE id = ?"),
            [id],
            row_to_submission,
        )
        .optional()?;
    Ok(s)
}

pub fn require(conn: &Connection, id: &str) -> CoreResult<Submission> {
    get(conn, id)?.ok_or_else(|| CoreError::not_found(format!("submission not found: {id}")))
}

fn find_for_student(
    conn: &Connection,
    assignment_id: &str,
    student_id: &str,
) -> CoreResult<Option<Submission>> {
    let s = conn
        .query_row(
            &format!(
                "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE assignment_id = ? AND student_id = ?"
            ),
            (assignment_id, student_id),
            row_to_submission,
        )
        .optional()?;
    Ok(s)
}

/// Returns the student's submission for the assignment, creating a Pending one if absent.
pub fn ensure_pending(
    conn: &Connection,
    assignment_id: &str,
    student_id: &str,
) -> CoreResult<Submission> {
    conn.execute(
        "INSERT OR IGNORE INTO submissions(id, assignment_id, student_id, status)
         VALUES(?, ?, ?, 'pending')",
        (Uuid::new_v4().to_string(), assignment_id, student_id),
    )?;
    find_for_student(conn, assignment_id, student_id)?.ok_or_else(|| {
        CoreError::not_found(format!(
            "submission for student {student_id} on assignment {assignment_id} not found"
        ))
    })
}

/// A student's first interaction with an assignment.
pub fn open(conn: &Connection, actor: &Actor, assignment_id: &str) -> CoreResult<Submission> {
    actor.require_student()?;
    let assignment = assignments::require(conn, assignment_id)?;
    ensure_pending(conn, &assignment.id, &actor.id)
}

/// Ungraded work first: pending, submitted, graded; then newest submission.
pub fn list_for_assignment(
    conn: &Connection,
    assignment_id: &str,
    requester: &Actor,
) -> CoreResult<Vec<Submission>> {
    let assignment = assignments::require_owned(conn, assignment_id, requester)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUBMISSION_COLUMNS}
         FROM submissions
         WHERE assignment_id = ?
         ORDER BY
           CASE status WHEN 'pending' THEN 1 WHEN 'submitted' THEN 2 ELSE 3 END,
           submitted_at IS NULL,
           submitted_at DESC,
           id"
    ))?;
    let rows = stmt
        .query_map([&assignment.id], row_to_submission)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn check_accepting(assignment: &Assignment, now: DateTime<Utc>) -> CoreResult<()> {
    if !assignment.is_active {
        return Err(CoreError::validation(
            "assignment is not accepting submissions",
        ));
    }
    if assignment.is_past_due(now) && !assignment.allow_late_submission {
        return Err(CoreError::validation(
            "late submission rejected: the due date has passed",
        ));
    }
    Ok(())
}

/// Pending/Submitted -> Submitted with a new attachment. The file is
/// validated before any submission row is created or changed.
pub fn record_student_submission(
    conn: &Connection,
    files: &AttachmentManager,
    actor: &Actor,
    target: SubmissionTarget,
    upload: Upload,
    now: DateTime<Utc>,
) -> CoreResult<Submission> {
    let upload = files.validate(upload)?;
    actor.require_student()?;

    let (assignment, existing) = match target {
        SubmissionTarget::Submission(id) => {
            let s = require(conn, &id)?;
            if s.student_id != actor.id {
                return Err(CoreError::forbidden(
                    "students may only submit their own work",
                ));
            }
            (assignments::require(conn, &s.assignment_id)?, Some(s))
        }
        SubmissionTarget::Assignment(assignment_id) => {
            let a = assignments::require(conn, &assignment_id)?;
            let s = find_for_student(conn, &a.id, &actor.id)?;
            (a, s)
        }
    };
    check_accepting(&assignment, now)?;

    let current = match existing {
        Some(s) => s,
        None => ensure_pending(conn, &assignment.id, &actor.id)?,
    };
    if current.status == SubmissionStatus::Graded {
        return Err(CoreError::validation(
            "submission is already graded; ask the teacher to clear the grade first",
        ));
    }

    let new_ref = files.store(conn, AttachmentKind::Submission, &upload, now)?;
    let submitted_at = format_ts(now);
    let changed = conn.execute(
        "UPDATE submissions
         SET status = 'submitted', submitted_at = ?, attachment_ref = ?
         WHERE id = ? AND status <> 'graded'",
        (&submitted_at, &new_ref, &current.id),
    );
    match changed {
        Ok(1) => {}
        Ok(_) => {
            files.remove_best_effort(conn, &new_ref);
            return Err(CoreError::validation("submission is already graded"));
        }
        Err(e) => {
            files.remove_best_effort(conn, &new_ref);
            return Err(e.into());
        }
    }

    if let Some(old) = current.attachment_ref.as_deref() {
        files.remove_best_effort(conn, old);
    }

    tracing::info!(
        submission_id = %current.id,
        assignment_id = %assignment.id,
        student_id = %actor.id,
        late = assignment.is_past_due(now),
        "recorded submission"
    );
    require(conn, &current.id)
}

/// Grade-set transition: any state -> Graded.
pub fn apply_grade(
    conn: &Connection,
    submission_id: &str,
    grade_tenths: i64,
    comment: Option<&str>,
    now: DateTime<Utc>,
) -> CoreResult<()> {
    conn.execute(
        "UPDATE submissions
         SET status = 'graded', grade_tenths = ?, teacher_comment = ?, graded_at = ?
         WHERE id = ?",
        (grade_tenths, comment, format_ts(now), submission_id),
    )?;
    Ok(())
}

/// Grade-clear transition: Graded -> Submitted; any other state keeps its status.
pub fn clear_grade(conn: &Connection, submission_id: &str) -> CoreResult<()> {
    conn.execute(
        "UPDATE submissions
         SET status = CASE status WHEN 'graded' THEN 'submitted' ELSE status END,
             grade_tenths = NULL,
             graded_at = NULL
         WHERE id = ?",
        [submission_id],
    )?;
    Ok(())
}

pub fn graded_student_ids(conn: &Connection, assignment_id: &str) -> CoreResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT student_id FROM submissions
         WHERE assignment_id = ? AND status = 'graded'
         ORDER BY student_id",
    )?;
    let rows = stmt
        .query_map([assignment_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Removes every submission of the assignment and returns what was removed.
pub fn delete_for_assignment(conn: &Connection, assignment_id: &str) -> CoreResult<Vec<Submission>> {
    let removed = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE assignment_id = ?"
        ))?;
        let rows = stmt
            .query_map([assignment_id], row_to_submission)?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    conn.execute(
        "DELETE FROM submissions WHERE assignment_id = ?",
        [assignment_id],
    )?;
    Ok(removed)
}
