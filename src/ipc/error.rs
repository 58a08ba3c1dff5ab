use serde_json::json;

use crate::error::CoreError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps a domain error onto the envelope. Internal detail is logged, not returned.
pub fn core_err(id: &str, method: &str, e: &CoreError) -> serde_json::Value {
    match e {
        CoreError::Validation(_) | CoreError::NotFound(_) | CoreError::Forbidden(_) => {
            tracing::debug!(request_id = %id, method, error = %e, "request rejected");
        }
        _ => {
            tracing::error!(request_id = %id, method, error = %e, "request failed");
        }
    }
    err(id, e.code(), e.public_message(), None)
}

pub fn respond(
    id: &str,
    method: &str,
    result: Result<serde_json::Value, CoreError>,
) -> serde_json::Value {
    match result {
        Ok(v) => ok(id, v),
        Err(e) => core_err(id, method, &e),
    }
}
