//! Judge: asks the LLM to score one résumé against the rubric and turns its
//! reply into a trusted `JudgeResponse`.
//!
//! The reply is an untrusted payload. It must be a JSON object; `scores` and
//! `notes` may be missing or null, but anything structurally wrong fails
//! closed as `MalformedJudgeResponse`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::evaluation::error::EvaluationError;
use crate::evaluation::prompts::{JUDGE_PROMPT_TEMPLATE, JUDGE_SYSTEM};
use crate::llm_client::{Credential, LlmClient};
use crate::models::evaluation::{JudgeResponse, ScoreEntry};
use crate::models::rubric::Rubric;

pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 10.0;
pub const INSUFFICIENT_EVIDENCE: &str = "insufficient evidence";

/// Scores one document. Implementations make exactly one attempt; retries are
/// the orchestrator's decision.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(
        &self,
        resume_text: &str,
        rubric: &Rubric,
        credential: &Credential,
    ) -> Result<JudgeResponse, EvaluationError>;
}

/// Production judge backed by the LLM client.
pub struct LlmJudge {
    llm: LlmClient,
}

impl LlmJudge {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(
        &self,
        resume_text: &str,
        rubric: &Rubric,
        credential: &Credential,
    ) -> Result<JudgeResponse, EvaluationError> {
        if credential.is_blank() {
            return Err(EvaluationError::MissingCredential);
        }
        let prompt = build_judge_prompt(resume_text, rubric)?;
        let reply: Value = self
            .llm
            .call_json(&prompt, JUDGE_SYSTEM, credential)
            .await?;
        normalize_judge_reply(reply)
    }
}

/// Embeds the rubric (as JSON) and the résumé text into the judge prompt.
/// Each placeholder is substituted once, so document text is never re-scanned.
pub fn build_judge_prompt(resume_text: &str, rubric: &Rubric) -> Result<String, EvaluationError> {
    let criteria = serde_json::to_string_pretty(rubric)
        .map_err(|e| EvaluationError::Internal(format!("could not encode rubric: {e}")))?;
    let (head, tail) = JUDGE_PROMPT_TEMPLATE
        .split_once("{resume_text}")
        .unwrap_or((JUDGE_PROMPT_TEMPLATE, ""));
    Ok(format!(
        "{}{}{}",
        head.replace("{criteria}", &criteria),
        resume_text,
        tail
    ))
}

#[derive(Debug, Deserialize)]
struct RawReply {
    #[serde(default)]
    scores: Option<Vec<RawScore>>,
    #[serde(default)]
    notes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RawScore {
    id: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    evidence: Option<Vec<String>>,
}

/// Validates a parsed reply against the minimal schema and normalizes it.
///
/// - top level must be an object
/// - missing/null `scores` or `notes` become empty
/// - a missing score becomes 1 with an "insufficient evidence" marker
/// - scores outside 1–10 are clamped
/// - scores for ids outside the rubric are kept
pub fn normalize_judge_reply(reply: Value) -> Result<JudgeResponse, EvaluationError> {
    if !reply.is_object() {
        return Err(EvaluationError::MalformedJudgeResponse(format!(
            "expected a JSON object, got {}",
            json_type_name(&reply)
        )));
    }

    let raw: RawReply = serde_json::from_value(reply)
        .map_err(|e| EvaluationError::MalformedJudgeResponse(e.to_string()))?;

    let scores = raw
        .scores
        .unwrap_or_default()
        .into_iter()
        .map(|entry| {
            let mut evidence = entry.evidence.unwrap_or_default();
            let score = match entry.score {
                Some(score) => score.clamp(MIN_SCORE, MAX_SCORE),
                None => {
                    if !evidence
                        .iter()
                        .any(|e| e.eq_ignore_ascii_case(INSUFFICIENT_EVIDENCE))
                    {
                        evidence.push(INSUFFICIENT_EVIDENCE.to_string());
                    }
                    MIN_SCORE
                }
            };
            ScoreEntry {
                criterion_id: entry.id,
                score,
                evidence,
            }
        })
        .collect();

    Ok(JudgeResponse {
        scores,
        notes: raw.notes.unwrap_or_default(),
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
