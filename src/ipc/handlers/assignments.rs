use chrono::Utc;
use serde_json::{json, Value};

use crate::aggregate::TrimesterAggregator;
use crate::assignments::{self, AssignmentPatch, NewAssignment};
use crate::error::{CoreError, CoreResult};
use crate::ipc::handlers::with_workspace;
use crate::ipc::params;
use crate::ipc::types::{AppState, Request, Workspace};

fn list(ws: &Workspace<'_>, p: &Value) -> CoreResult<Value> {
    let actor = params::actor(p)?;
    let owner_id = params::opt_str(p, "ownerId")?.unwrap_or_else(|| actor.id.clone());
    let rows = assignments::list(ws.conn, &actor, &owner_id)?;
    Ok(json!({ "assignments": rows }))
}

fn create(ws: &Workspace<'_>, p: &Value) -> CoreResult<Value> {
    let actor = params::actor(p)?;
    let file = params::upload(p, "file")?;
    let input = NewAssignment {
        title: params::opt_str(p, "title")?,
        instructions: params::opt_str(p, "instructions")?,
        due_at: params::opt_str(p, "dueAt")?,
        allow_late_submission: params::opt_bool(p, "allowLateSubmission")?,
        is_active: params::opt_bool(p, "isActive")?,
        rubric_text: params::opt_str(p, "rubricText")?,
        subject_id: params::opt_str(p, "subjectId")?,
        trimester: params::opt_str(p, "trimester")?,
        student_ids: params::str_list(p, "studentIds")?,
    };
    let assignment = assignments::create(ws.conn, &ws.files, &actor, input, file, Utc::now())?;
    Ok(json!({ "assignment": assignment }))
}

fn update(ws: &Workspace<'_>, p: &Value) -> CoreResult<Value> {
    let actor = params::actor(p)?;
    let assignment_id = params::req_str(p, "assignmentId")?;
    let file = params::upload(p, "file")?;
    let patch = match p.get("patch") {
        None | Some(Value::Null) => AssignmentPatch::default(),
        Some(raw) if raw.is_object() => AssignmentPatch {
            title: params::opt_str(raw, "title")?,
            instructions: params::opt_str(raw, "instructions")?,
            due_at: params::opt_str(raw, "dueAt")?,
            allow_late_submission: params::opt_bool(raw, "allowLateSubmission")?,
            is_active: params::opt_bool(raw, "isActive")?,
            rubric_text: params::opt_str(raw, "rubricText")?,
            subject_id: params::opt_str(raw, "subjectId")?,
            trimester: params::opt_str(raw, "trimester")?,
        },
        Some(_) => return Err(CoreError::validation("patch must be an object")),
    };
    let assignment = assignments::update(
        ws.conn,
        &ws.files,
        &TrimesterAggregator,
        &actor,
        &assignment_id,
        patch,
        file,
        Utc::now(),
    )?;
    Ok(json!({ "assignment": assignment }))
}

fn delete(ws: &Workspace<'_>, p: &Value) -> CoreResult<Value> {
    let actor = params::actor(p)?;
    let assignment_id = params::req_str(p, "assignmentId")?;
    let summary = assignments::delete(
        ws.conn,
        &ws.files,
        &TrimesterAggregator,
        &actor,
        &assignment_id,
        Utc::now(),
    )?;
    Ok(json!(summary))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignments.list" => Some(with_workspace(state, req, list)),
        "assignments.create" => Some(with_workspace(state, req, create)),
        "assignments.update" => Some(with_workspace(state, req, update)),
        "assignments.delete" => Some(with_workspace(state, req, delete)),
        _ => None,
    }
}
