use thiserror::Error;

use crate::llm_client::LlmError;
use crate::models::evaluation::{ErrorKind, FailureDetail};

/// Everything that can go wrong between receiving a batch and scoring a document.
///
/// The first three variants are batch-wide and returned before any work is
/// dispatched. The rest are per-document and end up as failed entries.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("No files to evaluate")]
    EmptyBatch,

    #[error("No criteria provided")]
    EmptyRubric,

    #[error("Missing LLM API key")]
    MissingCredential,

    #[error("Could not read document: {0}")]
    SourceUnavailable(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("Judge unavailable: {message}")]
    JudgeUnavailable { message: String, retryable: bool },

    #[error("Malformed judge response: {0}")]
    MalformedJudgeResponse(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EvaluationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvaluationError::EmptyBatch => ErrorKind::EmptyBatch,
            EvaluationError::EmptyRubric => ErrorKind::EmptyRubric,
            EvaluationError::MissingCredential => ErrorKind::MissingCredential,
            EvaluationError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            EvaluationError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            EvaluationError::JudgeUnavailable { .. } => ErrorKind::JudgeUnavailable,
            EvaluationError::MalformedJudgeResponse(_) => ErrorKind::MalformedJudgeResponse,
            EvaluationError::Cancelled(_) => ErrorKind::Cancelled,
            EvaluationError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Batch-wide precondition failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EvaluationError::EmptyBatch
                | EvaluationError::EmptyRubric
                | EvaluationError::MissingCredential
        )
    }

    /// Only transient provider failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EvaluationError::JudgeUnavailable {
                retryable: true,
                ..
            }
        )
    }

    pub fn to_detail(&self) -> FailureDetail {
        FailureDetail {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<LlmError> for EvaluationError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::EmptyContent | LlmError::Envelope(_) | LlmError::Parse(_) => {
                EvaluationError::MalformedJudgeResponse(err.to_string())
            }
            LlmError::InvalidCredential => EvaluationError::MissingCredential,
            other => EvaluationError::JudgeUnavailable {
                retryable: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}
