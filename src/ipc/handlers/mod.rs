pub mod assignments;
pub mod core;
pub mod grades;
pub mod subjects;
pub mod submissions;

use serde_json::Value;

use crate::error::CoreResult;
use crate::ipc::error::{err, respond};
use crate::ipc::types::{AppState, Request, Workspace};

/// Runs a domain handler against the open workspace and wraps the outcome in the envelope.
pub(crate) fn with_workspace(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Workspace<'_>, &Value) -> CoreResult<Value>,
) -> Value {
    let Some(ws) = state.open_workspace() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    respond(&req.id, &req.method, f(&ws, &req.params))
}
