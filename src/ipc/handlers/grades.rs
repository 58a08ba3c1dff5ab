use chrono::Utc;
use serde_json::{json, Value};

use crate::aggregate::{self, Aggregator, TrimesterAggregator};
use crate::error::{CoreError, CoreResult};
use crate::grading;
use crate::ipc::handlers::with_workspace;
use crate::ipc::params;
use crate::ipc::types::{AppState, Request, Workspace};
use crate::model::{normalize_trimester, AggregateKey, Role};

fn set(ws: &Workspace<'_>, p: &Value) -> CoreResult<Value> {
    let actor = params::actor(p)?;
    let submission_id = params::req_str(p, "submissionId")?;
    let raw = params::raw_grade(p, "grade")?;
    let comment = params::opt_str(p, "comment")?;
    let outcome = grading::grade_submission(
        ws.conn,
        &TrimesterAggregator,
        &actor,
        &submission_id,
        raw.as_deref(),
        comment.as_deref(),
        Utc::now(),
    )?;
    Ok(json!(outcome))
}

fn list(ws: &Workspace<'_>, p: &Value) -> CoreResult<Value> {
    let actor = params::actor(p)?;
    let student_id = match actor.role {
        Role::Student => {
            let requested = params::opt_str(p, "studentId")?.unwrap_or_else(|| actor.id.clone());
            if requested != actor.id {
                return Err(CoreError::forbidden(
                    "students may only read their own trimester grades",
                ));
            }
            requested
        }
        Role::Teacher => params::req_str(p, "studentId")?,
    };
    let rows = aggregate::list_for_student(ws.conn, &student_id)?;
    Ok(json!({ "trimesterGrades": rows }))
}

fn recompute(ws: &Workspace<'_>, p: &Value) -> CoreResult<Value> {
    params::actor(p)?.require_teacher()?;
    let key = AggregateKey::new(
        params::req_str(p, "studentId")?,
        params::req_str(p, "subjectId")?,
        normalize_trimester(params::opt_str(p, "trimester")?.as_deref())?,
    );
    let grade = TrimesterAggregator.recompute(ws.conn, &key, Utc::now())?;
    Ok(json!({ "trimesterGrade": grade }))
}

fn rebuild(ws: &Workspace<'_>, p: &Value) -> CoreResult<Value> {
    params::actor(p)?.require_teacher()?;
    let rebuilt = aggregate::rebuild(ws.conn, Utc::now())?;
    Ok(json!({ "rebuilt": rebuilt }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.set" => Some(with_workspace(state, req, set)),
        "trimesterGrades.list" => Some(with_workspace(state, req, list)),
        "trimesterGrades.recompute" => Some(with_workspace(state, req, recompute)),
        "trimesterGrades.rebuild" => Some(with_workspace(state, req, rebuild)),
        _ => None,
    }
}
