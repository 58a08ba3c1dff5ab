use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub const TRIMESTERS: [&str; 3] = ["1", "2", "3"];
pub const DEFAULT_TRIMESTER: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Role> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }
}

/// Caller identity as handed over by the session collaborator. Trusted as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    #[cfg(test)]
    pub fn teacher(id: impl Into<String>) -> Self {
        Actor {
            id: id.into(),
            role: Role::Teacher,
        }
    }

    #[cfg(test)]
    pub fn student(id: impl Into<String>) -> Self {
        Actor {
            id: id.into(),
            role: Role::Student,
        }
    }

    pub fn require_teacher(&self) -> CoreResult<()> {
        if self.role != Role::Teacher {
            return Err(CoreError::forbidden("only teachers may do this"));
        }
        Ok(())
    }

    pub fn require_student(&self) -> CoreResult<()> {
        if self.role != Role::Student {
            return Err(CoreError::forbidden("only students may do this"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Submitted,
    Graded,
}

impl SubmissionStatus {
    pub fn parse(raw: &str) -> Option<SubmissionStatus> {
        match raw {
            "pending" => Some(SubmissionStatus::Pending),
            "submitted" => Some(SubmissionStatus::Submitted),
            "graded" => Some(SubmissionStatus::Graded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    pub color: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub title: String,
    pub instructions: String,
    pub due_at: String,
    pub allow_late_submission: bool,
    pub is_active: bool,
    pub rubric_text: String,
    pub attachment_ref: Option<String>,
    pub owner_teacher_id: String,
    pub subject_id: String,
    pub trimester: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: String,
    pub assignment_id: String,
    pub student_id: String,
    pub status: SubmissionStatus,
    pub grade: Option<f64>,
    pub teacher_comment: Option<String>,
    pub submitted_at: Option<String>,
    pub graded_at: Option<String>,
    pub attachment_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimesterGrade {
    pub student_id: String,
    pub subject_id: String,
    pub trimester: String,
    pub average: f64,
    pub graded_count: i64,
    pub updated_at: String,
}

/// Identifies one derived trimester aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateKey {
    pub student_id: String,
    pub subject_id: String,
    pub trimester: String,
}

impl AggregateKey {
    pub fn new(
        student_id: impl Into<String>,
        subject_id: impl Into<String>,
        trimester: impl Into<String>,
    ) -> Self {
        AggregateKey {
            student_id: student_id.into(),
            subject_id: subject_id.into(),
            trimester: trimester.into(),
        }
    }
}

pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Accepts RFC 3339, or a bare `YYYY-MM-DD` which means the end of that day (UTC).
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|dt| dt.and_utc())
}

pub fn normalize_trimester(raw: Option<&str>) -> CoreResult<String> {
    let t = raw.map(str::trim).unwrap_or(DEFAULT_TRIMESTER);
    if !TRIMESTERS.contains(&t) {
        return Err(CoreError::validation(format!(
            "trimester must be one of 1, 2, 3 (got {t:?})"
        )));
    }
    Ok(t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_ts_accepts_date_only_as_end_of_day() {
        let got = parse_ts("2026-03-01").expect("date");
        assert_eq!(got, Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 59).unwrap());
        let got = parse_ts("2026-03-01T08:00:00+02:00").expect("rfc3339");
        assert_eq!(got, Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap());
        assert!(parse_ts("next friday").is_none());
    }

    #[test]
    fn trimester_defaults_and_rejects_unknown() {
        assert_eq!(normalize_trimester(None).unwrap(), "1");
        assert_eq!(normalize_trimester(Some(" 3 ")).unwrap(), "3");
        assert!(matches!(
            normalize_trimester(Some("4")),
            Err(CoreError::Validation(_))
        ));
    }
}
