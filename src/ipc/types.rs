use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::attachments::AttachmentManager;

pub const UPLOADS_DIR: &str = "uploads";

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub max_attachment_bytes: u64,
}

/// Borrowed view of an open workspace handed to each domain handler.
pub struct Workspace<'a> {
    pub conn: &'a Connection,
    pub files: AttachmentManager,
}

impl AppState {
    pub fn new(max_attachment_bytes: u64) -> Self {
        AppState {
            workspace: None,
            db: None,
            max_attachment_bytes,
        }
    }

    pub fn open_workspace(&self) -> Option<Workspace<'_>> {
        let conn = self.db.as_ref()?;
        let root = self.workspace.as_ref()?;
        Some(Workspace {
            conn,
            files: AttachmentManager::new(root.join(UPLOADS_DIR), self.max_attachment_bytes),
        })
    }
}
