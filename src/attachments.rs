//! File attachments for assignments and submissions.
//!
//! Validation is a separate step that yields a [`ValidatedUpload`]; only a
//! validated upload can be stored, so callers validate before they touch any
//! row of the owning entity.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};
use crate::model::format_ts;

pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;

pub const ALLOWED_MIME_TYPES: [&str; 7] = [
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "image/jpeg",
    "image/png",
    "application/zip",
    "application/x-rar-compressed",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Assignment,
    Submission,
}

impl AttachmentKind {
    fn dir_name(self) -> &'static str {
        match self {
            AttachmentKind::Assignment => "assignments",
            AttachmentKind::Submission => "submissions",
        }
    }
}

#[derive(Debug, Clone)]
pub enum UploadSource {
    #[cfg(test)]
    Bytes(Vec<u8>),
    Base64(String),
    Path(PathBuf),
}

/// A file as it arrives from the caller, not yet checked.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub mime_type: String,
    pub source: UploadSource,
}

#[derive(Debug)]
pub struct ValidatedUpload {
    original_name: String,
    mime_type: String,
    bytes: Vec<u8>,
}

impl ValidatedUpload {
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentManager {
    root: PathBuf,
    max_bytes: u64,
}

fn normalize_mime(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn extension_of(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    let ext: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(10)
        .collect::<String>()
        .to_ascii_lowercase();
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// `<millis>-<random hex>.<ext>`, unique enough that two uploads never overwrite each other.
fn generate_stored_name(original_name: &str, now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::rng().random();
    match extension_of(original_name) {
        Some(ext) => format!("{}-{:08x}.{}", now.timestamp_millis(), suffix, ext),
        None => format!("{}-{:08x}", now.timestamp_millis(), suffix),
    }
}

impl AttachmentManager {
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        AttachmentManager {
            root: root.into(),
            max_bytes,
        }
    }

    pub fn path_of(&self, reference: &str) -> PathBuf {
        self.root.join(reference)
    }

    fn too_large(&self, size: u64) -> CoreError {
        CoreError::validation(format!(
            "file is too large ({size} bytes, max {} bytes)",
            self.max_bytes
        ))
    }

    /// Fail-fast checks: name, MIME allow-list, size. Size is checked before
    /// bytes are decoded or read whenever the source allows it.
    pub fn validate(&self, upload: Upload) -> CoreResult<ValidatedUpload> {
        let original_name = upload.name.trim().to_string();
        if original_name.is_empty() {
            return Err(CoreError::validation("file name must not be empty"));
        }
        let mime_type = normalize_mime(&upload.mime_type);
        if !ALLOWED_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(CoreError::validation(format!(
                "file type not allowed: {mime_type}"
            )));
        }

        let bytes = match upload.source {
            #[cfg(test)]
            UploadSource::Bytes(b) => b,
            UploadSource::Base64(encoded) => {
                let encoded = encoded.trim();
                let estimated = (encoded.trim_end_matches('=').len() as u64 * 3) / 4;
                if estimated > self.max_bytes {
                    return Err(self.too_large(estimated));
                }
                general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| CoreError::validation(format!("invalid base64 content: {e}")))?
            }
            UploadSource::Path(path) => {
                let meta = fs::metadata(&path).map_err(|e| {
                    CoreError::validation(format!(
                        "cannot read source file {}: {e}",
                        path.to_string_lossy()
                    ))
                })?;
                if !meta.is_file() {
                    return Err(CoreError::validation(format!(
                        "source is not a file: {}",
                        path.to_string_lossy()
                    )));
                }
                if meta.len() > self.max_bytes {
                    return Err(self.too_large(meta.len()));
                }
                fs::read(&path).map_err(|e| {
                    CoreError::validation(format!(
                        "cannot read source file {}: {e}",
                        path.to_string_lossy()
                    ))
                })?
            }
        };

        let validated = ValidatedUpload {
            original_name,
            mime_type,
            bytes,
        };
        if validated.is_empty() {
            return Err(CoreError::validation("file is empty"));
        }
        if validated.len() as u64 > self.max_bytes {
            return Err(self.too_large(validated.len() as u64));
        }
        Ok(validated)
    }

    /// Writes the file and its metadata row. Returns the attachment ref.
    pub fn store(
        &self,
        conn: &Connection,
        kind: AttachmentKind,
        upload: &ValidatedUpload,
        now: DateTime<Utc>,
    ) -> CoreResult<String> {
        let dir = self.root.join(kind.dir_name());
        fs::create_dir_all(&dir).map_err(|e| {
            CoreError::Storage(format!(
                "failed to create {}: {e}",
                dir.to_string_lossy()
            ))
        })?;

        let stored_name = generate_stored_name(&upload.original_name, now);
        let reference = format!("{}/{}", kind.dir_name(), stored_name);
        let path = self.path_of(&reference);

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                CoreError::Storage(format!("failed to create {}: {e}", path.to_string_lossy()))
            })?;
        if let Err(e) = file.write_all(&upload.bytes).and_then(|_| file.flush()) {
            let _ = fs::remove_file(&path);
            return Err(CoreError::Storage(format!(
                "failed to write {}: {e}",
                path.to_string_lossy()
            )));
        }

        let mut hasher = Sha256::new();
        hasher.update(&upload.bytes);
        let digest = format!("{:x}", hasher.finalize());

        let inserted = conn.execute(
            "INSERT INTO attachments(ref, original_name, mime_type, size_bytes, sha256, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &reference,
                &upload.original_name,
                &upload.mime_type,
                upload.bytes.len() as i64,
                &digest,
                format_ts(now),
            ),
        );
        if let Err(e) = inserted {
            let _ = fs::remove_file(&path);
            return Err(e.into());
        }

        tracing::debug!(
            attachment = %reference,
            size = upload.len(),
            mime = %upload.mime_type(),
            "stored attachment"
        );
        Ok(reference)
    }

    /// Deletes file and row. Failures are janitorial: logged, never returned.
    /// Returns whether the physical file was removed.
    pub fn remove_best_effort(&self, conn: &Connection, reference: &str) -> bool {
        if let Err(e) = conn.execute("DELETE FROM attachments WHERE ref = ?", [reference]) {
            tracing::warn!(attachment = %reference, error = %e, "failed to delete attachment row");
        }
        let path = self.path_of(reference);
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(attachment = %reference, "attachment file already gone");
                false
            }
            Err(e) => {
                tracing::warn!(
                    attachment = %reference,
                    error = %e,
                    "failed to delete attachment file; leaving it for cleanup"
                );
                false
            }
        }
    }
}
