//! Axum route handler for the Evaluation API.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;
use crate::llm_client::Credential;
use crate::models::document::DocumentHandle;
use crate::models::evaluation::DocumentOutcome;
use crate::models::rubric::Rubric;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    /// Upload session the files came from. Informational only.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub criteria: Rubric,
    #[serde(default)]
    pub files: Vec<DocumentHandle>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EvaluateResponse {
    pub results: Vec<DocumentOutcome>,
}

/// POST /api/evaluate
///
/// Runs the batch over previously uploaded files. Batch-wide validation
/// failures return 400; per-file failures come back as `failed` entries.
pub async fn handle_evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, AppError> {
    // Empty batch or rubric is reported by run_batch before any path check.
    if !request.criteria.is_empty() {
        for file in &request.files {
            state.uploads.check_locator(&file.locator)?;
        }
    }

    if let Some(session_id) = &request.session_id {
        info!("Evaluation requested for upload session {session_id}");
    }

    let batch = state
        .evaluator
        .run_batch(
            request.criteria,
            request.files,
            Credential::from_optional(request.api_key),
            None,
        )
        .await?;

    Ok(Json(EvaluateResponse {
        results: batch.results,
    }))
}
