//! Upload store: persists uploaded résumés under a per-session directory and
//! hands back `DocumentHandle`s the evaluation pipeline can read.
//!
//! Layout: `<root>/<session_id>/<file_id>-<sanitized name>`.

use std::path::{Component, Path, PathBuf};

use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::document::DocumentHandle;

pub mod handlers;

#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a fresh session directory.
    pub async fn create_session(&self) -> Result<(Uuid, PathBuf), AppError> {
        let session_id = Uuid::new_v4();
        let dir = self.root.join(session_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Storage(format!("could not create {}: {e}", dir.display())))?;
        info!("Created upload session {session_id}");
        Ok((session_id, dir))
    }

    /// Writes one uploaded file into `session_dir`.
    pub async fn save(
        &self,
        session_dir: &Path,
        filename: &str,
        content_type: Option<String>,
        bytes: &[u8],
    ) -> Result<DocumentHandle, AppError> {
        let id = Uuid::new_v4().to_string();
        let path = session_dir.join(format!("{id}-{}", sanitize_filename(filename)));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| AppError::Storage(format!("could not write {}: {e}", path.display())))?;

        let handle = DocumentHandle::new(id, filename, path);
        Ok(match content_type {
            Some(content_type) => handle.with_content_type(content_type),
            None => handle,
        })
    }

    /// Lexical check that a client-supplied locator points inside the store.
    /// Does not touch the filesystem.
    pub fn check_locator(&self, locator: &Path) -> Result<(), AppError> {
        let escapes = locator
            .components()
            .any(|c| matches!(c, Component::ParentDir));
        if escapes || !locator.starts_with(&self.root) {
            return Err(AppError::Validation(format!(
                "File path {} is outside the upload directory",
                locator.display()
            )));
        }
        Ok(())
    }
}

/// Keeps the last path segment and replaces anything outside `[A-Za-z0-9._-]`.
/// Leading dots are stripped so an upload can never become a hidden file.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
