//! Batch orchestrator: runs extract -> judge -> aggregate for every document
//! of a batch under a concurrency cap.
//!
//! Units are admitted in input order through a counting semaphore; each unit
//! holds an owned permit for its whole lifetime, so the slot is released on
//! success, failure, or cancellation alike. A failing unit becomes a failed
//! entry at its own index and never aborts its siblings. The result is
//! reordered to input order regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use crate::evaluation::error::EvaluationError;
use crate::evaluation::judge::Judge;
use crate::evaluation::scoring::aggregate;
use crate::extraction::extract_text;
use crate::llm_client::Credential;
use crate::models::document::DocumentHandle;
use crate::models::evaluation::{
    BatchResult, DocumentOutcome, EvaluationFailure, EvaluationResult, JudgeResponse,
};
use crate::models::rubric::Rubric;

pub const DEFAULT_CONCURRENCY: usize = 3;

/// Orchestration-level retry for transient judge failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one. 0 = single attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff: base, 2×base, 4×base, ...
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << retry.saturating_sub(1).min(16))
    }
}

/// Construction-time settings for the orchestrator.
#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    pub concurrency_limit: usize,
    pub default_credential: Option<Credential>,
    pub retry: RetryPolicy,
    /// Optional deadline for a whole batch.
    pub batch_timeout: Option<Duration>,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY,
            default_credential: None,
            retry: RetryPolicy::default(),
            batch_timeout: None,
        }
    }
}

#[derive(Clone)]
pub struct BatchEvaluator {
    judge: Arc<dyn Judge>,
    settings: EvaluatorSettings,
}

impl BatchEvaluator {
    pub fn new(judge: Arc<dyn Judge>, settings: EvaluatorSettings) -> Self {
        Self { judge, settings }
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    /// Evaluates every document against the rubric.
    ///
    /// Returns `Err` only for batch-wide validation failures, which are checked
    /// before any file is read or judge is called. Every other failure is
    /// recorded in the returned `BatchResult` at the document's position.
    pub async fn run_batch(
        &self,
        rubric: Rubric,
        documents: Vec<DocumentHandle>,
        credential: Option<Credential>,
        concurrency_limit: Option<usize>,
    ) -> Result<BatchResult, EvaluationError> {
        if documents.is_empty() {
            return Err(EvaluationError::EmptyBatch);
        }
        if rubric.is_empty() {
            return Err(EvaluationError::EmptyRubric);
        }
        let credential = Arc::new(self.resolve_credential(credential)?);

        let duplicates = rubric.duplicate_ids();
        if !duplicates.is_empty() {
            warn!(
                "Rubric declares duplicate criterion ids {:?}; last declared weight wins",
                duplicates
            );
        }

        let limit = concurrency_limit
            .unwrap_or(self.settings.concurrency_limit)
            .max(1);
        let total = documents.len();
        let deadline = self.settings.batch_timeout.map(|t| Instant::now() + t);
        info!(
            "Evaluating {} documents against {} criteria (concurrency {})",
            total,
            rubric.len(),
            limit
        );

        let rubric = Arc::new(rubric);
        let gate = Arc::new(Semaphore::new(limit));
        let mut join_set = JoinSet::new();
        let names: Vec<String> = documents.iter().map(|d| d.display_name.clone()).collect();
        let mut slots: Vec<Option<DocumentOutcome>> = (0..total).map(|_| None).collect();

        for (index, document) in documents.into_iter().enumerate() {
            let acquired = match deadline {
                Some(deadline) => timeout_at(deadline, gate.clone().acquire_owned())
                    .await
                    .ok(),
                None => Some(gate.clone().acquire_owned().await),
            };
            let permit = match acquired {
                Some(Ok(permit)) => permit,
                Some(Err(closed)) => {
                    slots[index] = Some(failed(
                        &document.display_name,
                        &EvaluationError::Internal(closed.to_string()),
                    ));
                    continue;
                }
                None => {
                    slots[index] = Some(failed(
                        &document.display_name,
                        &EvaluationError::Cancelled(
                            "batch deadline elapsed before the document was started".into(),
                        ),
                    ));
                    continue;
                }
            };

            let unit = Unit {
                judge: self.judge.clone(),
                rubric: rubric.clone(),
                credential: credential.clone(),
                retry: self.settings.retry.clone(),
            };
            join_set.spawn(async move {
                let _permit = permit;
                (index, unit.run(document, deadline).await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => error!("Evaluation unit aborted: {e}"),
            }
        }

        let results: Vec<DocumentOutcome> = slots
            .into_iter()
            .zip(names)
            .map(|(slot, name)| {
                slot.unwrap_or_else(|| {
                    failed(
                        &name,
                        &EvaluationError::Internal("evaluation task aborted".into()),
                    )
                })
            })
            .collect();

        let batch = BatchResult { results };
        info!(
            "Batch finished: {} evaluated, {} failed",
            batch.len() - batch.failed_count(),
            batch.failed_count()
        );
        Ok(batch)
    }

    /// Explicit per-call credential first, then the configured default.
    fn resolve_credential(
        &self,
        credential: Option<Credential>,
    ) -> Result<Credential, EvaluationError> {
        credential
            .filter(|c| !c.is_blank())
            .or_else(|| {
                self.settings
                    .default_credential
                    .clone()
                    .filter(|c| !c.is_blank())
            })
            .ok_or(EvaluationError::MissingCredential)
    }
}

/// Everything one document's pipeline needs. Shares only read-only state.
struct Unit {
    judge: Arc<dyn Judge>,
    rubric: Arc<Rubric>,
    credential: Arc<Credential>,
    retry: RetryPolicy,
}

impl Unit {
    async fn run(self, document: DocumentHandle, deadline: Option<Instant>) -> DocumentOutcome {
        let started = Instant::now();
        let result = match deadline {
            Some(deadline) => timeout_at(deadline, self.evaluate(&document))
                .await
                .unwrap_or_else(|_| {
                    Err(EvaluationError::Cancelled(
                        "batch deadline elapsed while the document was in flight".into(),
                    ))
                }),
            None => self.evaluate(&document).await,
        };

        match result {
            Ok(evaluation) => {
                info!(
                    "Evaluated {} in {}ms: total={:.2}",
                    document.display_name,
                    started.elapsed().as_millis(),
                    evaluation.total
                );
                DocumentOutcome::Evaluated(evaluation)
            }
            Err(e) => {
                warn!("Evaluation of {} failed: {e}", document.display_name);
                failed(&document.display_name, &e)
            }
        }
    }

    async fn evaluate(
        &self,
        document: &DocumentHandle,
    ) -> Result<EvaluationResult, EvaluationError> {
        let text = extract_text(document).await?;
        let response = self.judge_with_retry(&text).await?;
        Ok(build_result(&document.display_name, &self.rubric, response))
    }

    async fn judge_with_retry(&self, text: &str) -> Result<JudgeResponse, EvaluationError> {
        let mut retry = 0;
        loop {
            match self.judge.judge(text, &self.rubric, &self.credential).await {
                Err(e) if e.is_retryable() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay_for(retry);
                    warn!(
                        "Judge call failed ({e}), retry {}/{} after {}ms",
                        retry,
                        self.retry.max_retries,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

/// Keeps only scores for rubric criteria and totals them. Scores for unknown
/// ids are reported in the notes instead.
fn build_result(document: &str, rubric: &Rubric, response: JudgeResponse) -> EvaluationResult {
    let JudgeResponse { scores, mut notes } = response;
    let (scores, unknown): (Vec<_>, Vec<_>) = scores
        .into_iter()
        .partition(|entry| rubric.contains(&entry.criterion_id));

    for entry in unknown {
        notes.push(format!(
            "ignored score for unknown criterion '{}'",
            entry.criterion_id
        ));
    }

    let total = aggregate(rubric, &scores);
    EvaluationResult {
        document: document.to_string(),
        scores,
        total,
        notes,
    }
}

fn failed(document: &str, err: &EvaluationError) -> DocumentOutcome {
    DocumentOutcome::Failed(EvaluationFailure {
        document: document.to_string(),
        error: err.to_detail(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::evaluation::{ErrorKind, ScoreEntry};
    use crate::models::rubric::Criterion;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Judge whose behaviour is scripted by the document text:
    /// `sleep:<ms>` delays the reply, `malformed` and `permanent` fail.
    #[derive(Default)]
    struct ScriptedJudge {
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        transient_failures: AtomicUsize,
        credentials: Mutex<Vec<String>>,
    }

    impl ScriptedJudge {
        fn failing_transiently(times: usize) -> Self {
            let judge = Self::default();
            judge.transient_failures.store(times, SeqCst);
            judge
        }
    }

    #[async_trait]
    impl Judge for ScriptedJudge {
        async fn judge(
            &self,
            resume_text: &str,
            _rubric: &Rubric,
            credential: &Credential,
        ) -> Result<JudgeResponse, EvaluationError> {
            self.calls.fetch_add(1, SeqCst);
            self.credentials
                .lock()
                .unwrap()
                .push(credential.expose().to_string());
            let running = self.active.fetch_add(1, SeqCst) + 1;
            self.peak.fetch_max(running, SeqCst);

            let delay = resume_text
                .split_whitespace()
                .find_map(|word| word.strip_prefix("sleep:"))
                .and_then(|ms| ms.parse::<u64>().ok())
                .unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.active.fetch_sub(1, SeqCst);

            if resume_text.contains("malformed") {
                return Err(EvaluationError::MalformedJudgeResponse(
                    "expected value at line 1 column 1".into(),
                ));
            }
            if resume_text.contains("permanent") {
                return Err(EvaluationError::JudgeUnavailable {
                    message: "API error (status 400): bad request".into(),
                    retryable: false,
                });
            }
            if self
                .transient_failures
                .fetch_update(SeqCst, SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EvaluationError::JudgeUnavailable {
                    message: "API error (status 429): rate limited".into(),
                    retryable: true,
                });
            }

            Ok(JudgeResponse {
                scores: vec![
                    score("rust", 8.0),
                    score("lead", 5.0),
                    score("ghost", 10.0),
                ],
                notes: vec![resume_text.to_string()],
            })
        }
    }

    fn score(id: &str, value: f64) -> ScoreEntry {
        ScoreEntry {
            criterion_id: id.to_string(),
            score: value,
            evidence: vec![],
        }
    }

    fn rubric() -> Rubric {
        Rubric::new(vec![
            Criterion {
                id: "rust".to_string(),
                name: "Rust".to_string(),
                description: "Production Rust".to_string(),
                weight: 0.5,
            },
            Criterion {
                id: "lead".to_string(),
                name: "Leadership".to_string(),
                description: "Team lead experience".to_string(),
                weight: 0.2,
            },
        ])
    }

    fn documents(dir: &TempDir, files: &[(&str, &str)]) -> Vec<DocumentHandle> {
        files
            .iter()
            .enumerate()
            .map(|(i, (name, content))| {
                let path = dir.path().join(format!("{i}-{name}"));
                std::fs::write(&path, content).unwrap();
                DocumentHandle::new(i.to_string(), *name, path)
            })
            .collect()
    }

    fn evaluator(judge: Arc<ScriptedJudge>, settings: EvaluatorSettings) -> BatchEvaluator {
        BatchEvaluator::new(judge, settings)
    }

    fn with_default_key() -> EvaluatorSettings {
        EvaluatorSettings {
            default_credential: Some(Credential::new("sk-default")),
            ..EvaluatorSettings::default()
        }
    }

    #[tokio::test]
    async fn test_empty_batch_fails_before_judging() {
        let judge = Arc::new(ScriptedJudge::default());
        let err = evaluator(judge.clone(), with_default_key())
            .run_batch(rubric(), vec![], None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyBatch);
        assert_eq!(judge.calls.load(SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_rubric_fails_before_judging() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let docs = documents(&dir, &[("a.txt", "text")]);
        let err = evaluator(judge.clone(), with_default_key())
            .run_batch(Rubric::default(), docs, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyRubric);
        assert_eq!(judge.calls.load(SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_batch_checked_before_rubric() {
        let judge = Arc::new(ScriptedJudge::default());
        let err = evaluator(judge, with_default_key())
            .run_batch(Rubric::default(), vec![], None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyBatch);
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_judging() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let docs = documents(&dir, &[("a.txt", "text")]);
        let err = evaluator(judge.clone(), EvaluatorSettings::default())
            .run_batch(rubric(), docs, Some(Credential::new("  ")), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingCredential);
        assert_eq!(judge.calls.load(SeqCst), 0);
    }

    #[tokio::test]
    async fn test_per_call_credential_overrides_default() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let docs = documents(&dir, &[("a.txt", "one"), ("b.txt", "two")]);
        evaluator(judge.clone(), with_default_key())
            .run_batch(rubric(), docs, Some(Credential::new("sk-user")), None)
            .await
            .unwrap();
        assert_eq!(*judge.credentials.lock().unwrap(), vec!["sk-user", "sk-user"]);
    }

    #[tokio::test]
    async fn test_default_credential_used_without_override() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let docs = documents(&dir, &[("a.txt", "one")]);
        evaluator(judge.clone(), with_default_key())
            .run_batch(rubric(), docs, None, None)
            .await
            .unwrap();
        assert_eq!(*judge.credentials.lock().unwrap(), vec!["sk-default"]);
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let files = [
            ("a.txt", "sleep:80 a"),
            ("b.md", "sleep:5 b"),
            ("c.txt", "sleep:50 c"),
            ("d.txt", "sleep:0 d"),
            ("e.txt", "sleep:20 e"),
        ];
        let docs = documents(&dir, &files);

        let batch = evaluator(judge, with_default_key())
            .run_batch(rubric(), docs, None, Some(2))
            .await
            .unwrap();

        assert_eq!(batch.len(), files.len());
        for (outcome, (name, content)) in batch.results.iter().zip(files) {
            let result = outcome.as_evaluated().unwrap();
            assert_eq!(result.document, name);
            assert_eq!(result.notes[0], content);
        }
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let files: Vec<(&str, &str)> = (0..7).map(|_| ("cv.txt", "sleep:25")).collect();
        let docs = documents(&dir, &files);

        let batch = evaluator(judge.clone(), with_default_key())
            .run_batch(rubric(), docs, None, Some(3))
            .await
            .unwrap();

        assert_eq!(batch.failed_count(), 0);
        assert_eq!(judge.calls.load(SeqCst), 7);
        let peak = judge.peak.load(SeqCst);
        assert!(peak <= 3, "peak concurrency was {peak}");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_zero_limit_runs_one_at_a_time() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let docs = documents(&dir, &[("a.txt", "sleep:10"), ("b.txt", "sleep:10")]);
        let batch = evaluator(judge.clone(), with_default_key())
            .run_batch(rubric(), docs, None, Some(0))
            .await
            .unwrap();
        assert_eq!(batch.failed_count(), 0);
        assert_eq!(judge.peak.load(SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsupported_document_is_isolated() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let docs = documents(
            &dir,
            &[("a.txt", "first"), ("setup.exe", "MZ"), ("c.txt", "third")],
        );

        let batch = evaluator(judge.clone(), with_default_key())
            .run_batch(rubric(), docs, None, None)
            .await
            .unwrap();

        assert_eq!(batch.len(), 3);
        assert!(batch.results[0].is_evaluated());
        assert_eq!(
            batch.results[1].failure_kind(),
            Some(ErrorKind::UnsupportedFormat)
        );
        assert_eq!(batch.results[1].document(), "setup.exe");
        assert!(batch.results[2].is_evaluated());
        assert_eq!(judge.calls.load(SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_file_is_isolated() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let mut docs = documents(&dir, &[("a.txt", "first")]);
        docs.push(DocumentHandle::new("x", "gone.txt", dir.path().join("gone.txt")));

        let batch = evaluator(judge, with_default_key())
            .run_batch(rubric(), docs, None, None)
            .await
            .unwrap();
        assert!(batch.results[0].is_evaluated());
        assert_eq!(
            batch.results[1].failure_kind(),
            Some(ErrorKind::SourceUnavailable)
        );
    }

    #[tokio::test]
    async fn test_malformed_reply_releases_its_slot() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let docs = documents(
            &dir,
            &[("a.txt", "malformed"), ("b.txt", "second"), ("c.txt", "third")],
        );

        let batch = tokio::time::timeout(
            Duration::from_secs(5),
            evaluator(judge, with_default_key()).run_batch(rubric(), docs, None, Some(1)),
        )
        .await
        .expect("a failed unit must release its slot")
        .unwrap();

        assert_eq!(
            batch.results[0].failure_kind(),
            Some(ErrorKind::MalformedJudgeResponse)
        );
        assert!(batch.results[1].is_evaluated());
        assert!(batch.results[2].is_evaluated());
    }

    #[tokio::test]
    async fn test_total_ignores_unknown_criteria() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let docs = documents(&dir, &[("a.txt", "text")]);

        let batch = evaluator(judge, with_default_key())
            .run_batch(rubric(), docs, None, None)
            .await
            .unwrap();

        let result = batch.results[0].as_evaluated().unwrap();
        // 8 × 0.5 + 5 × 0.2
        assert!((result.total - 5.0).abs() < 1e-9, "Total was {}", result.total);
        assert_eq!(result.scores.len(), 2);
        assert!(result.scores.iter().all(|s| s.criterion_id != "ghost"));
        assert!(result.notes.iter().any(|n| n.contains("'ghost'")));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::failing_transiently(2));
        let docs = documents(&dir, &[("a.txt", "text")]);
        let settings = EvaluatorSettings {
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
            },
            ..with_default_key()
        };

        let batch = evaluator(judge.clone(), settings)
            .run_batch(rubric(), docs, None, None)
            .await
            .unwrap();

        assert!(batch.results[0].is_evaluated());
        assert_eq!(judge.calls.load(SeqCst), 3);
    }

    #[tokio::test]
    async fn test_single_attempt_by_default() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::failing_transiently(1));
        let docs = documents(&dir, &[("a.txt", "text")]);

        let batch = evaluator(judge.clone(), with_default_key())
            .run_batch(rubric(), docs, None, None)
            .await
            .unwrap();

        assert_eq!(
            batch.results[0].failure_kind(),
            Some(ErrorKind::JudgeUnavailable)
        );
        assert_eq!(judge.calls.load(SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let docs = documents(&dir, &[("a.txt", "permanent")]);
        let settings = EvaluatorSettings {
            retry: RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
            },
            ..with_default_key()
        };

        let batch = evaluator(judge.clone(), settings)
            .run_batch(rubric(), docs, None, None)
            .await
            .unwrap();

        assert_eq!(
            batch.results[0].failure_kind(),
            Some(ErrorKind::JudgeUnavailable)
        );
        assert_eq!(judge.calls.load(SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_deadline_cancels_remaining_work() {
        let dir = TempDir::new().unwrap();
        let judge = Arc::new(ScriptedJudge::default());
        let docs = documents(
            &dir,
            &[("fast.txt", "sleep:0"), ("slow.txt", "sleep:10000"), ("queued.txt", "sleep:0")],
        );
        let settings = EvaluatorSettings {
            batch_timeout: Some(Duration::from_millis(300)),
            ..with_default_key()
        };

        let batch = evaluator(judge, settings)
            .run_batch(rubric(), docs, None, Some(1))
            .await
            .unwrap();

        assert_eq!(batch.len(), 3);
        assert!(batch.results[0].is_evaluated());
        assert_eq!(batch.results[1].failure_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(batch.results[2].failure_kind(), Some(ErrorKind::Cancelled));
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    }
}
