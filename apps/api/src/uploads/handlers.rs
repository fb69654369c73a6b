//! Axum route handler for the Upload API.

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::document::DocumentHandle;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub session_id: Uuid,
    pub files: Vec<DocumentHandle>,
}

/// POST /api/upload
///
/// Stores every multipart field named `files` that carries a file name.
/// Plain text fields are ignored.
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut session = None;
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Could not read {filename}: {e}")))?;

        let (session_id, dir) = match session.take() {
            Some(existing) => existing,
            None => state.uploads.create_session().await?,
        };
        let handle = state
            .uploads
            .save(&dir, &filename, content_type, &bytes)
            .await?;
        debug!("Stored {} in session {}", handle.display_name, session_id);
        files.push(handle);
        session = Some((session_id, dir));
    }

    match session {
        Some((session_id, _)) => Ok(Json(UploadResponse { session_id, files })),
        None => Err(AppError::Validation("No files uploaded".to_string())),
    }
}
