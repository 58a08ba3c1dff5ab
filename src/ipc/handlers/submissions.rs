use chrono::Utc;
use serde_json::{json, Value};

use crate::error::{CoreError, CoreResult};
use crate::ipc::handlers::with_workspace;
use crate::ipc::params;
use crate::ipc::types::{AppState, Request, Workspace};
use crate::submissions::{self, SubmissionTarget};

fn list(ws: &Workspace<'_>, p: &Value) -> CoreResult<Value> {
    let actor = params::actor(p)?;
    let assignment_id = params::req_str(p, "assignmentId")?;
    let rows = submissions::list_for_assignment(ws.conn, &assignment_id, &actor)?;
    Ok(json!({ "submissions": rows }))
}

fn open(ws: &Workspace<'_>, p: &Value) -> CoreResult<Value> {
    let actor = params::actor(p)?;
    let assignment_id = params::req_str(p, "assignmentId")?;
    let submission = submissions::open(ws.conn, &actor, &assignment_id)?;
    Ok(json!({ "submission": submission }))
}

fn submit(ws: &Workspace<'_>, p: &Value) -> CoreResult<Value> {
    let actor = params::actor(p)?;
    let target = match (
        params::opt_str(p, "submissionId")?,
        params::opt_str(p, "assignmentId")?,
    ) {
        (Some(id), _) => SubmissionTarget::Submission(id),
        (None, Some(id)) => SubmissionTarget::Assignment(id),
        (None, None) => {
            return Err(CoreError::validation(
                "missing submissionId or assignmentId",
            ))
        }
    };
    let Some(file) = params::upload(p, "file")? else {
        return Err(CoreError::validation("missing file"));
    };
    let submission =
        submissions::record_student_submission(ws.conn, &ws.files, &actor, target, file, Utc::now())?;
    Ok(json!({ "submission": submission }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.list" => Some(with_workspace(state, req, list)),
        "submissions.open" => Some(with_workspace(state, req, open)),
        "submissions.submit" => Some(with_workspace(state, req, submit)),
        _ => None,
    }
}
