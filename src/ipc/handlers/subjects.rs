use serde_json::{json, Value};

use crate::error::CoreResult;
use crate::ipc::handlers::with_workspace;
use crate::ipc::params;
use crate::ipc::types::{AppState, Request, Workspace};
use crate::subjects::{self, SubjectInput};

fn list(ws: &Workspace<'_>, _params: &Value) -> CoreResult<Value> {
    Ok(json!({ "subjects": subjects::list(ws.conn)? }))
}

fn upsert(ws: &Workspace<'_>, p: &Value) -> CoreResult<Value> {
    let subject = subjects::upsert(
        ws.conn,
        SubjectInput {
            id: params::opt_str(p, "id")?,
            name: params::req_str(p, "name")?,
            color: params::opt_str(p, "color")?,
            icon: params::opt_str(p, "icon")?,
        },
    )?;
    Ok(json!({ "subject": subject }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(with_workspace(state, req, list)),
        "subjects.upsert" => Some(with_workspace(state, req, upsert)),
        _ => None,
    }
}
