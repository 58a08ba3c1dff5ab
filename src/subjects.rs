//! Subject reference data. The core reads it; `upsert` is the registry
//! collaborator's write path.

use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::model::Subject;

#[derive(Debug, Clone, Default)]
pub struct SubjectInput {
    pub id: Option<String>,
    pub name: String,
    pub color: Option<String>,
    pub icon: Option<String>,
}

fn row_to_subject(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subject> {
    Ok(Subject {
        id: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        icon: row.get(3)?,
    })
}

pub fn get(conn: &Connection, id: &str) -> CoreResult<Option<Subject>> {
    let subject = conn
        .query_row(
            "SELECT id, name, color, icon FROM subjects WHERE id = ?",
            [id],
            row_to_subject,
        )
        .optional()?;
    Ok(subject)
}

pub fn exists(conn: &Connection, id: &str) -> CoreResult<bool> {
    Ok(get(conn, id)?.is_some())
}

pub fn list(conn: &Connection) -> CoreResult<Vec<Subject>> {
    let mut stmt = conn.prepare("SELECT id, name, color, icon FROM subjects ORDER BY name")?;
    let rows = stmt
        .query_map([], row_to_subject)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn upsert(conn: &Connection, input: SubjectInput) -> CoreResult<Subject> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(CoreError::validation("name must not be empty"));
    }
    let id = input
        .id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let clash: Option<String> = conn
        .query_row(
            "SELECT id FROM subjects WHERE name = ? AND id <> ?",
            (&name, &id),
            |r| r.get(0),
        )
        .optional()?;
    if clash.is_some() {
        return Err(CoreError::validation(format!(
            "subject name already in use: {name}"
        )));
    }

    // Omitted color/icon keep their stored values on update.
    conn.execute(
        "INSERT INTO subjects(id, name, color, icon)
         VALUES(?1, ?2, COALESCE(?3, ''), COALESCE(?4, ''))
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           color = COALESCE(?3, subjects.color),
           icon = COALESCE(?4, subjects.icon)",
        (&id, &name, &input.color, &input.icon),
    )?;

    get(conn, &id)?.ok_or_else(|| CoreError::not_found(format!("subject not found: {id}")))
}
