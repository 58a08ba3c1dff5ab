//! Derived per-student/subject/trimester averages.
//!
//! `trimester_grades` is a cache over graded submissions: every row can be
//! rebuilt from `submissions` + `assignments`, and nothing else writes it.
//! When a key has no graded submissions left its row is deleted.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use crate::error::{CoreError, CoreResult};
use crate::model::{format_ts, AggregateKey, TrimesterGrade};

pub trait Aggregator {
    /// Recomputes one aggregate. `Ok(None)` means the row no longer exists.
    fn recompute(
        &self,
        conn: &Connection,
        key: &AggregateKey,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<TrimesterGrade>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TrimesterAggregator;

fn row_to_grade(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrimesterGrade> {
    Ok(TrimesterGrade {
        student_id: row.get(0)?,
        subject_id: row.get(1)?,
        trimester: row.get(2)?,
        average: row.get(3)?,
        graded_count: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn get(conn: &Connection, key: &AggregateKey) -> CoreResult<Option<TrimesterGrade>> {
    let grade = conn
        .query_row(
            "SELECT student_id, subject_id, trimester, average, graded_count, updated_at
             FROM trimester_grades
             WHERE student_id = ? AND subject_id = ? AND trimester = ?",
            (&key.student_id, &key.subject_id, &key.trimester),
            row_to_grade,
        )
        .optional()?;
    Ok(grade)
}

fn graded_tenths(conn: &Connection, key: &AggregateKey) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT s.grade_tenths
         FROM submissions s
         JOIN assignments a ON a.id = s.assignment_id
         WHERE s.student_id = ?
           AND a.subject_id = ?
           AND a.trimester = ?
           AND s.status = 'graded'
           AND s.grade_tenths IS NOT NULL",
    )?;
    let rows = stmt
        .query_map(
            (&key.student_id, &key.subject_id, &key.trimester),
            |r| r.get::<_, i64>(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Arithmetic mean of grades held as tenths, in grade units.
pub fn mean_of_tenths(tenths: &[i64]) -> Option<f64> {
    if tenths.is_empty() {
        return None;
    }
    let sum: i64 = tenths.iter().sum();
    Some(sum as f64 / tenths.len() as f64 / 10.0)
}

impl Aggregator for TrimesterAggregator {
    fn recompute(
        &self,
        conn: &Connection,
        key: &AggregateKey,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<TrimesterGrade>> {
        let tenths = graded_tenths(conn, key)?;
        let Some(average) = mean_of_tenths(&tenths) else {
            conn.execute(
                "DELETE FROM trimester_grades
                 WHERE student_id = ? AND subject_id = ? AND trimester = ?",
                (&key.student_id, &key.subject_id, &key.trimester),
            )?;
            return Ok(None);
        };

        // Unchanged values keep their updated_at so repeated runs are no-ops.
        conn.execute(
            "INSERT INTO trimester_grades(student_id, subject_id, trimester, average, graded_count, updated_at)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(student_id, subject_id, trimester) DO UPDATE SET
               average = excluded.average,
               graded_count = excluded.graded_count,
               updated_at = excluded.updated_at
             WHERE trimester_grades.average <> excluded.average
                OR trimester_grades.graded_count <> excluded.graded_count",
            (
                &key.student_id,
                &key.subject_id,
                &key.trimester,
                average,
                tenths.len() as i64,
                format_ts(now),
            ),
        )?;
        get(conn, key)
    }
}

/// Recomputes each key; failures are logged and skipped. Returns how many succeeded.
pub fn recompute_best_effort<A: Aggregator + ?Sized>(
    aggregator: &A,
    conn: &Connection,
    keys: &[AggregateKey],
    now: DateTime<Utc>,
) -> usize {
    let mut done = 0;
    for key in keys {
        match aggregator.recompute(conn, key, now) {
            Ok(_) => done += 1,
            Err(e) => {
                let e = CoreError::AggregateRecompute(e.to_string());
                tracing::warn!(
                    student_id = %key.student_id,
                    subject_id = %key.subject_id,
                    trimester = %key.trimester,
                    error = %e,
                    "trimester aggregate left stale"
                );
            }
        }
    }
    done
}

pub fn list_for_student(conn: &Connection, student_id: &str) -> CoreResult<Vec<TrimesterGrade>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, subject_id, trimester, average, graded_count, updated_at
         FROM trimester_grades
         WHERE student_id = ?
         ORDER BY trimester, subject_id",
    )?;
    let rows = stmt
        .query_map([student_id], row_to_grade)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Drops every aggregate and recomputes from graded submissions.
pub fn rebuild(conn: &Connection, now: DateTime<Utc>) -> CoreResult<usize> {
    let tx = conn.unchecked_transaction()?;
    let keys: Vec<AggregateKey> = {
        let mut stmt = tx.prepare(
            "SELECT DISTINCT s.student_id, a.subject_id, a.trimester
             FROM submissions s
             JOIN assignments a ON a.id = s.assignment_id
             WHERE s.status = 'graded'
             ORDER BY s.student_id, a.subject_id, a.trimester",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok(AggregateKey::new(
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    tx.execute("DELETE FROM trimester_grades", [])?;
    for key in &keys {
        TrimesterAggregator.recompute(&tx, key, now)?;
    }
    tx.commit()?;
    tracing::info!(aggregates = keys.len(), "rebuilt trimester grades");
    Ok(keys.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn seed(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO subjects(id, name) VALUES('math', 'Math'), ('art', 'Art');
             INSERT INTO assignments(id, title, due_at, owner_teacher_id, subject_id, trimester, created_at, updated_at)
             VALUES
               ('a1', 'Fractions', '2030-01-01T00:00:00Z', 't1', 'math', '1', 'x', 'x'),
               ('a2', 'Decimals', '2030-01-01T00:00:00Z', 't1', 'math', '1', 'x', 'x'),
               ('a3', 'Geometry', '2030-01-01T00:00:00Z', 't1', 'math', '2', 'x', 'x'),
               ('a4', 'Colour wheel', '2030-01-01T00:00:00Z', 't1', 'art', '1', 'x', 'x');
             INSERT INTO submissions(id, assignment_id, student_id, status, grade_tenths)
             VALUES
               ('s1', 'a1', 'stu', 'graded', 80),
               ('s2', 'a2', 'stu', 'graded', 95),
               ('s3', 'a3', 'stu', 'graded', 20),
               ('s4', 'a4', 'stu', 'graded', 100),
               ('s5', 'a1', 'other', 'submitted', NULL);",
        )
        .expect("seed");
    }

    #[test]
    fn mean_of_two_math_grades() {
        let conn = db::open_in_memory().expect("db");
        seed(&conn);
        let key = AggregateKey::new("stu", "math", "1");
        let got = TrimesterAggregator
            .recompute(&conn, &key, Utc::now())
            .expect("recompute")
            .expect("row");
        assert_eq!(got.average, 8.75);
        assert_eq!(got.graded_count, 2);
    }

    #[test]
    fn recompute_is_idempotent() {
        let conn = db::open_in_memory().expect("db");
        seed(&conn);
        let key = AggregateKey::new("stu", "math", "1");
        let first = TrimesterAggregator
            .recompute(&conn, &key, Utc::now())
            .expect("first");
        let second = TrimesterAggregator
            .recompute(&conn, &key, Utc::now() + chrono::Duration::seconds(5))
            .expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn row_is_deleted_when_nothing_is_graded() {
        let conn = db::open_in_memory().expect("db");
        seed(&conn);
        let key = AggregateKey::new("stu", "art", "1");
        assert!(TrimesterAggregator
            .recompute(&conn, &key, Utc::now())
            .expect("recompute")
            .is_some());

        conn.execute(
            "UPDATE submissions SET status = 'submitted', grade_tenths = NULL WHERE id = 's4'",
            [],
        )
        .unwrap();
        assert!(TrimesterAggregator
            .recompute(&conn, &key, Utc::now())
            .expect("recompute")
            .is_none());
        assert!(get(&conn, &key).expect("get").is_none());
    }

    #[test]
    fn rebuild_restores_every_key() {
        let conn = db::open_in_memory().expect("db");
        seed(&conn);
        conn.execute(
            "INSERT INTO trimester_grades VALUES('ghost', 'math', '1', 1.0, 1, 'x')",
            [],
        )
        .unwrap();

        let n = rebuild(&conn, Utc::now()).expect("rebuild");
        assert_eq!(n, 3);
        let rows = list_for_student(&conn, "stu").expect("list");
        assert_eq!(rows.len(), 3);
        assert!(list_for_student(&conn, "ghost").expect("list").is_empty());
        assert!(list_for_student(&conn, "other").expect("list").is_empty());
    }
}
