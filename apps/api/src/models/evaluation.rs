#![allow(dead_code)]

use serde::{Deserialize, Serialize};

/// One criterion's score as returned by the judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreEntry {
    #[serde(rename = "id")]
    pub criterion_id: String,
    /// 1 – 10 after normalization.
    pub score: f64,
    pub evidence: Vec<String>,
}

/// Normalized judge output. May carry scores for ids the rubric does not know.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeResponse {
    pub scores: Vec<ScoreEntry>,
    pub notes: Vec<String>,
}

/// A successfully evaluated document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    #[serde(rename = "file")]
    pub document: String,
    pub scores: Vec<ScoreEntry>,
    pub total: f64,
    pub notes: Vec<String>,
}

/// Machine-readable failure classification, serialized as e.g. `UNSUPPORTED_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    EmptyBatch,
    EmptyRubric,
    MissingCredential,
    SourceUnavailable,
    UnsupportedFormat,
    JudgeUnavailable,
    MalformedJudgeResponse,
    Cancelled,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: ErrorKind,
    pub message: String,
}

/// A document that could not be evaluated. Occupies its input position in the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationFailure {
    #[serde(rename = "file")]
    pub document: String,
    pub error: FailureDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Evaluated(EvaluationResult),
    Failed(EvaluationFailure),
}

impl DocumentOutcome {
    pub fn document(&self) -> &str {
        match self {
            DocumentOutcome::Evaluated(result) => &result.document,
            DocumentOutcome::Failed(failure) => &failure.document,
        }
    }

    pub fn is_evaluated(&self) -> bool {
        matches!(self, DocumentOutcome::Evaluated(_))
    }

    pub fn as_evaluated(&self) -> Option<&EvaluationResult> {
        match self {
            DocumentOutcome::Evaluated(result) => Some(result),
            DocumentOutcome::Failed(_) => None,
        }
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match self {
            DocumentOutcome::Evaluated(_) => None,
            DocumentOutcome::Failed(failure) => Some(failure.error.kind),
        }
    }
}

/// Outcomes in input order, one per submitted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<DocumentOutcome>,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_evaluated()).count()
    }
}
