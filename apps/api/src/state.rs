use std::sync::Arc;

use crate::config::Config;
use crate::evaluation::orchestrator::BatchEvaluator;
use crate::uploads::UploadStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Batch pipeline. Carries the judge, concurrency limit and default key.
    pub evaluator: Arc<BatchEvaluator>,
    pub uploads: UploadStore,
}
