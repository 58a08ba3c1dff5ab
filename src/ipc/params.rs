//! Typed extraction of request params. Malformed input is a validation error.

use serde_json::Value;
use std::path::PathBuf;

use crate::attachments::{Upload, UploadSource};
use crate::error::{CoreError, CoreResult};
use crate::model::{Actor, Role};

pub fn opt_str(params: &Value, key: &str) -> CoreResult<Option<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(CoreError::validation(format!("{key} must be a string"))),
    }
}

pub fn req_str(params: &Value, key: &str) -> CoreResult<String> {
    opt_str(params, key)?
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::validation(format!("missing {key}")))
}

pub fn opt_bool(params: &Value, key: &str) -> CoreResult<Option<bool>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(CoreError::validation(format!("{key} must be a boolean"))),
    }
}

pub fn str_list(params: &Value, key: &str) -> CoreResult<Vec<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CoreError::validation(format!("{key} must contain strings")))
            })
            .collect(),
        Some(_) => Err(CoreError::validation(format!("{key} must be an array"))),
    }
}

/// `params.actor = { id, role }`, supplied by the session collaborator.
pub fn actor(params: &Value) -> CoreResult<Actor> {
    let Some(raw) = params.get("actor").filter(|v| v.is_object()) else {
        return Err(CoreError::validation("missing actor"));
    };
    let id = req_str(raw, "id").map_err(|_| CoreError::validation("missing actor.id"))?;
    let role_raw = req_str(raw, "role").map_err(|_| CoreError::validation("missing actor.role"))?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| CoreError::validation(format!("unknown actor.role: {role_raw}")))?;
    Ok(Actor { id, role })
}

/// Optional `{ name, mimeType, contentBase64 | sourcePath }` under `key`.
pub fn upload(params: &Value, key: &str) -> CoreResult<Option<Upload>> {
    let raw = match params.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(v) if v.is_object() => v,
        Some(_) => return Err(CoreError::validation(format!("{key} must be an object"))),
    };
    let name = req_str(raw, "name").map_err(|_| CoreError::validation(format!("missing {key}.name")))?;
    let mime_type = req_str(raw, "mimeType")
        .map_err(|_| CoreError::validation(format!("missing {key}.mimeType")))?;

    let source = match (opt_str(raw, "contentBase64")?, opt_str(raw, "sourcePath")?) {
        (Some(content), None) => UploadSource::Base64(content),
        (None, Some(path)) => UploadSource::Path(PathBuf::from(path)),
        (Some(_), Some(_)) => {
            return Err(CoreError::validation(format!(
                "{key} takes either contentBase64 or sourcePath, not both"
            )))
        }
        (None, None) => {
            return Err(CoreError::validation(format!(
                "{key} needs contentBase64 or sourcePath"
            )))
        }
    };
    Ok(Some(Upload {
        name,
        mime_type,
        source,
    }))
}

/// Raw grade as text: numbers are rendered, strings passed through, null/absent is `None`.
pub fn raw_grade(params: &Value, key: &str) -> CoreResult<Option<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(CoreError::validation(format!(
            "{key} must be a number, a string or null"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn actor_requires_known_role() {
        let a = actor(&json!({ "actor": { "id": "t1", "role": "Teacher" } })).expect("actor");
        assert_eq!(a, Actor::teacher("t1"));
        assert!(actor(&json!({ "actor": { "id": "t1", "role": "admin" } })).is_err());
        assert!(actor(&json!({})).is_err());
    }

    #[test]
    fn upload_needs_exactly_one_source() {
        let p = json!({ "file": { "name": "a.pdf", "mimeType": "application/pdf", "contentBase64": "AA==" } });
        assert!(matches!(
            upload(&p, "file").expect("ok"),
            Some(Upload { source: UploadSource::Base64(_), .. })
        ));
        let p = json!({ "file": { "name": "a.pdf", "mimeType": "application/pdf" } });
        assert!(upload(&p, "file").is_err());
        assert!(upload(&json!({}), "file").expect("absent").is_none());
    }

    #[test]
    fn raw_grade_accepts_numbers_strings_and_null() {
        assert_eq!(raw_grade(&json!({ "grade": 7.85 }), "grade").unwrap().as_deref(), Some("7.85"));
        assert_eq!(raw_grade(&json!({ "grade": "9" }), "grade").unwrap().as_deref(), Some("9"));
        assert_eq!(raw_grade(&json!({ "grade": null }), "grade").unwrap(), None);
        assert!(raw_grade(&json!({ "grade": true }), "grade").is_err());
    }
}
