use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::aggregate::{recompute_best_effort, Aggregator};
use crate::attachments::{AttachmentKind, AttachmentManager, Upload};
use crate::error::{CoreError, CoreResult};
use crate::model::{
    format_ts, normalize_trimester, parse_ts, Actor, AggregateKey, Assignment, Role, Subject,
};
use crate::{subjects, submissions};

const ASSIGNMENT_COLUMNS: &str = "id, title, instructions, due_at, allow_late_submission, is_active,
    rubric_text, attachment_ref, owner_teacher_id, subject_id, trimester, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct NewAssignment {
    pub title: Option<String>,
    pub instructions: Option<String>,
    pub due_at: Option<String>,
    pub allow_late_submission: Option<bool>,
    pub is_active: Option<bool>,
    pub rubric_text: Option<String>,
    pub subject_id: Option<String>,
    pub trimester: Option<String>,
    /// Enrolled students whose Pending submissions are created up front.
    pub student_ids: Vec<String>,
}

/// Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default)]
pub struct AssignmentPatch {
    pub title: Option<String>,
    pub instructions: Option<String>,
    pub due_at: Option<String>,
    pub allow_late_submission: Option<bool>,
    pub is_active: Option<bool>,
    pub rubric_text: Option<String>,
    pub subject_id: Option<String>,
    pub trimester: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionCounts {
    pub total: i64,
    pub pending: i64,
    pub submitted: i64,
    pub graded: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentSummary {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub subject: Option<Subject>,
    pub submission_counts: SubmissionCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSummary {
    pub assignment_id: String,
    pub submissions_removed: usize,
    pub attachments_removed: usize,
    pub aggregates_recomputed: usize,
}

impl Assignment {
    pub fn due(&self) -> Option<DateTime<Utc>> {
        parse_ts(&self.due_at)
    }

    pub fn is_past_due(&self, now: DateTime<Utc>) -> bool {
        self.due().map(|d| now > d).unwrap_or(false)
    }
}

fn row_to_assignment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: row.get(0)?,
        title: row.get(1)?,
        instructions: row.get(2)?,
        due_at: row.get(3)?,
        allow_late_submission: row.get(4)?,
        is_active: row.get(5)?,
        rubric_text: row.get(6)?,
        attachment_ref: row.get(7)?,
        owner_teacher_id: row.get(8)?,
        subject_id: row.get(9)?,
        trimester: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

pub fn get(conn: &Connection, id: &str) -> CoreResult<Option<Assignment>> {
    let a = conn
        .query_row(
            &format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE id = ?"),
            [id],
            row_to_assignment,
        )
        .optional()?;
    Ok(a)
}

pub fn require(conn: &Connection, id: &str) -> CoreResult<Assignment> {
    get(conn, id)?.ok_or_else(|| CoreError::not_found(format!("assignment not found: {id}")))
}

pub fn require_owned(conn: &Connection, id: &str, actor: &Actor) -> CoreResult<Assignment> {
    let a = require(conn, id)?;
    if actor.role != Role::Teacher || a.owner_teacher_id != actor.id {
        return Err(CoreError::forbidden(
            "only the owning teacher may access this assignment",
        ));
    }
    Ok(a)
}

fn validate_subject(conn: &Connection, subject_id: &str) -> CoreResult<()> {
    if !subjects::exists(conn, subject_id)? {
        return Err(CoreError::validation(format!(
            "unknown subject: {subject_id}"
        )));
    }
    Ok(())
}

fn validate_due_at(raw: &str, now: DateTime<Utc>) -> CoreResult<String> {
    let Some(due) = parse_ts(raw) else {
        return Err(CoreError::validation(format!(
            "dueAt is not a valid date: {raw}"
        )));
    };
    if due < now {
        return Err(CoreError::validation("dueAt must not be in the past"));
    }
    Ok(format_ts(due))
}

fn required(value: Option<String>, field: &str) -> CoreResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoreError::validation(format!("missing {field}")))
}

/// The assignment row and its Pending submissions land together or not at all.
fn insert_with_students(
    conn: &Connection,
    assignment: &Assignment,
    students: &BTreeSet<String>,
) -> CoreResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        &format!("INSERT INTO assignments({ASSIGNMENT_COLUMNS}) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
        rusqlite::params![
            assignment.id,
            assignment.title,
            assignment.instructions,
            assignment.due_at,
            assignment.allow_late_submission,
            assignment.is_active,
            assignment.rubric_text,
            assignment.attachment_ref,
            assignment.owner_teacher_id,
            assignment.subject_id,
            assignment.trimester,
            assignment.created_at,
            assignment.updated_at,
        ],
    )?;
    for student_id in students {
        submissions::ensure_pending(&tx, &assignment.id, student_id)?;
    }
    tx.commit()?;
    Ok(())
}

pub fn create(
    conn: &Connection,
    files: &AttachmentManager,
    actor: &Actor,
    input: NewAssignment,
    file: Option<Upload>,
    now: DateTime<Utc>,
) -> CoreResult<Assignment> {
    actor.require_teacher()?;
    let upload = file.map(|f| files.validate(f)).transpose()?;

    let title = required(input.title, "title")?;
    let subject_id = required(input.subject_id, "subjectId")?;
    let due_raw = required(input.due_at, "dueAt")?;
    validate_subject(conn, &subject_id)?;
    let due_at = validate_due_at(&due_raw, now)?;
    let trimester = normalize_trimester(input.trimester.as_deref())?;

    let attachment_ref = match &upload {
        Some(u) => Some(files.store(conn, AttachmentKind::Assignment, u, now)?),
        None => None,
    };

    let ts = format_ts(now);
    let assignment = Assignment {
        id: Uuid::new_v4().to_string(),
        title,
        instructions: input.instructions.unwrap_or_default(),
        due_at,
        allow_late_submission: input.allow_late_submission.unwrap_or(false),
        is_active: input.is_active.unwrap_or(true),
        rubric_text: input.rubric_text.unwrap_or_default(),
        attachment_ref,
        owner_teacher_id: actor.id.clone(),
        subject_id,
        trimester,
        created_at: ts.clone(),
        updated_at: ts,
    };

    let students: BTreeSet<String> = input
        .student_ids
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if let Err(e) = insert_with_students(conn, &assignment, &students) {
        if let Some(r) = &assignment.attachment_ref {
            files.remove_best_effort(conn, r);
        }
        return Err(e);
    }

    tracing::info!(
        assignment_id = %assignment.id,
        owner = %assignment.owner_teacher_id,
        subject_id = %assignment.subject_id,
        trimester = %assignment.trimester,
        enrolled = students.len(),
        "created assignment"
    );
    Ok(assignment)
}

#[allow(clippy::too_many_arguments)]
pub fn update<A: Aggregator + ?Sized>(
    conn: &Connection,
    files: &AttachmentManager,
    aggregator: &A,
    actor: &Actor,
    id: &str,
    patch: AssignmentPatch,
    file: Option<Upload>,
    now: DateTime<Utc>,
) -> CoreResult<Assignment> {
    let current = require_owned(conn, id, actor)?;
    let upload = file.map(|f| files.validate(f)).transpose()?;

    let mut next = current.clone();
    if let Some(title) = patch.title {
        next.title = required(Some(title), "title")?;
    }
    if let Some(subject_id) = patch.subject_id {
        let subject_id = required(Some(subject_id), "subjectId")?;
        if subject_id != current.subject_id {
            validate_subject(conn, &subject_id)?;
        }
        next.subject_id = subject_id;
    }
    if let Some(due_raw) = patch.due_at {
        let due_raw = required(Some(due_raw), "dueAt")?;
        // An unchanged due date stays valid after it has passed.
        if parse_ts(&due_raw) != current.due() {
            next.due_at = validate_due_at(&due_raw, now)?;
        }
    }
    if let Some(trimester) = patch.trimester {
        next.trimester = normalize_trimester(Some(&trimester))?;
    }
    if let Some(v) = patch.instructions {
        next.instructions = v;
    }
    if let Some(v) = patch.rubric_text {
        next.rubric_text = v;
    }
    if let Some(v) = patch.allow_late_submission {
        next.allow_late_submission = v;
    }
    if let Some(v) = patch.is_active {
        next.is_active = v;
    }

    if let Some(u) = &upload {
        next.attachment_ref = Some(files.store(conn, AttachmentKind::Assignment, u, now)?);
    }
    next.updated_at = format_ts(now);

    let updated = conn.execute(
        "UPDATE assignments SET
           title = ?, instructions = ?, due_at = ?, allow_late_submission = ?, is_active = ?,
           rubric_text = ?, attachment_ref = ?, subject_id = ?, trimester = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![
            next.title,
            next.instructions,
            next.due_at,
            next.allow_late_submission,
            next.is_active,
            next.rubric_text,
            next.attachment_ref,
            next.subject_id,
            next.trimester,
            next.updated_at,
            next.id,
        ],
    );
    if let Err(e) = updated {
        if upload.is_some() {
            if let Some(r) = &next.attachment_ref {
                files.remove_best_effort(conn, r);
            }
        }
        return Err(e.into());
    }

    if upload.is_some() {
        if let Some(old) = &current.attachment_ref {
            files.remove_best_effort(conn, old);
        }
    }

    // Graded work moves with the assignment between subject/trimester buckets.
    if next.subject_id != current.subject_id || next.trimester != current.trimester {
        let mut keys = Vec::new();
        for student_id in submissions::graded_student_ids(conn, &next.id)? {
            keys.push(AggregateKey::new(
                student_id.clone(),
                current.subject_id.clone(),
                current.trimester.clone(),
            ));
            keys.push(AggregateKey::new(
                student_id,
                next.subject_id.clone(),
                next.trimester.clone(),
            ));
        }
        recompute_best_effort(aggregator, conn, &keys, now);
    }

    tracing::info!(assignment_id = %next.id, "updated assignment");
    Ok(next)
}

/// Removes submissions, their attachments, the assignment row and its
/// attachment, in that order. Returns (submissions, attachments) removed.
fn delete_rows(
    conn: &Connection,
    files: &AttachmentManager,
    assignment: &Assignment,
) -> CoreResult<(usize, usize)> {
    let removed = submissions::delete_for_assignment(conn, &assignment.id)?;

    let mut attachments_removed = 0;
    for r in removed.iter().filter_map(|s| s.attachment_ref.as_deref()) {
        if files.remove_best_effort(conn, r) {
            attachments_removed += 1;
        }
    }

    conn.execute("DELETE FROM assignments WHERE id = ?", [&assignment.id])?;
    if let Some(r) = &assignment.attachment_ref {
        if files.remove_best_effort(conn, r) {
            attachments_removed += 1;
        }
    }
    Ok((removed.len(), attachments_removed))
}

/// Explicit, ordered cascade followed by a recompute of every affected
/// aggregate. The recompute runs even when a cascade step fails, so a
/// retried delete never leaves an aggregate counting removed grades.
pub fn delete<A: Aggregator + ?Sized>(
    conn: &Connection,
    files: &AttachmentManager,
    aggregator: &A,
    actor: &Actor,
    id: &str,
    now: DateTime<Utc>,
) -> CoreResult<DeleteSummary> {
    let assignment = require_owned(conn, id, actor)?;

    let keys: Vec<AggregateKey> = submissions::graded_student_ids(conn, &assignment.id)?
        .into_iter()
        .map(|student_id| {
            AggregateKey::new(
                student_id,
                assignment.subject_id.clone(),
                assignment.trimester.clone(),
            )
        })
        .collect();

    let cascade = delete_rows(conn, files, &assignment);
    let aggregates_recomputed = recompute_best_effort(aggregator, conn, &keys, now);

    let (submissions_removed, attachments_removed) = match cascade {
        Ok(counts) => counts,
        Err(e) => {
            tracing::warn!(
                assignment_id = %assignment.id,
                aggregates = aggregates_recomputed,
                error = %e,
                "assignment delete interrupted"
            );
            return Err(e);
        }
    };

    tracing::info!(
        assignment_id = %assignment.id,
        submissions = submissions_removed,
        attachments = attachments_removed,
        aggregates = aggregates_recomputed,
        "deleted assignment"
    );
    Ok(DeleteSummary {
        assignment_id: assignment.id,
        submissions_removed,
        attachments_removed,
        aggregates_recomputed,
    })
}

/// Owner's assignments, newest first, with subject metadata and submission counts.
pub fn list(conn: &Connection, actor: &Actor, owner_id: &str) -> CoreResult<Vec<AssignmentSummary>> {
    if actor.role != Role::Teacher || actor.id != owner_id {
        return Err(CoreError::forbidden(
            "teachers may only list their own assignments",
        ));
    }

    // Correlated subqueries so the counts are not multiplied by the subject join.
    let mut stmt = conn.prepare(
        "SELECT
           a.id, a.title, a.instructions, a.due_at, a.allow_late_submission, a.is_active,
           a.rubric_text, a.attachment_ref, a.owner_teacher_id, a.subject_id, a.trimester,
           a.created_at, a.updated_at,
           s.id, s.name, s.color, s.icon,
           (SELECT COUNT(*) FROM submissions x WHERE x.assignment_id = a.id),
           (SELECT COUNT(*) FROM submissions x WHERE x.assignment_id = a.id AND x.status = 'pending'),
           (SELECT COUNT(*) FROM submissions x WHERE x.assignment_id = a.id AND x.status = 'submitted'),
           (SELECT COUNT(*) FROM submissions x WHERE x.assignment_id = a.id AND x.status = 'graded')
         FROM assignments a
         LEFT JOIN subjects s ON s.id = a.subject_id
         WHERE a.owner_teacher_id = ?
         ORDER BY a.created_at DESC, a.rowid DESC",
    )?;
    let rows = stmt
        .query_map([owner_id], |row| {
            let assignment = row_to_assignment(row)?;
            let subject_id: Option<String> = row.get(13)?;
            let subject = match subject_id {
                Some(id) => Some(Subject {
                    id,
                    name: row.get(14)?,
                    color: row.get(15)?,
                    icon: row.get(16)?,
                }),
                None => None,
            };
            Ok(AssignmentSummary {
                assignment,
                subject,
                submission_counts: SubmissionCounts {
                    total: row.get(17)?,
                    pending: row.get(18)?,
                    submitted: row.get(19)?,
                    graded: row.get(20)?,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
