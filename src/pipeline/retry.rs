//! The rephrase/evaluate retry loop — the core state machine of the crate.
//!
//! Per chunk, up to `max_attempts` generate-then-score cycles run. Success
//! is defined as the FIRST attempt that clears every metric threshold, not
//! the highest-scoring one: once the gate is passed there is nothing left to
//! buy with further requests. Alongside the gate, the loop tracks the best
//! score sum seen so far; if no attempt ever passes, that best attempt is
//! returned tagged best-effort rather than discarding paid-for work.
//!
//! Failure handling is asymmetric on purpose:
//!
//! * A rephrase transport failure ends the chunk immediately — the client
//!   already retried at transport level, and without fresh text there is
//!   nothing to evaluate. It does NOT consume a rephrase attempt.
//! * An evaluation failure consumes the attempt: the rewrite may be fine,
//!   only the judgement is missing. The failure description becomes the
//!   next attempt's feedback. Only on the final attempt does it fail the
//!   chunk.

use crate::error::ChunkError;
use crate::output::ChunkStatus;
use crate::pipeline::chunk::{Chunk, ChunkMeta};
use crate::pipeline::evaluate::Evaluator;
use crate::pipeline::rephrase::RephraseClient;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// The settled result of one chunk's retry loop.
#[derive(Debug, Clone)]
pub struct ProcessedChunk {
    pub meta: ChunkMeta,
    pub text: String,
    pub status: ChunkStatus,
    /// Rephrase attempts consumed.
    pub attempts: u32,
    /// Score sum of the returned text's evaluation, when it was scored.
    pub score_sum: Option<f64>,
}

/// Drive `chunk` to a pass or best-effort conclusion.
///
/// Raises [`ChunkError`] only when the chunk produced nothing usable by
/// itself: rephrase transport exhausted, or evaluation still failing on the
/// final attempt. The caller decides the fallback.
pub async fn process_chunk(
    rephraser: &RephraseClient,
    evaluator: &Evaluator,
    chunk: &Chunk,
    max_attempts: u32,
    attempt_delay: Duration,
) -> Result<ProcessedChunk, ChunkError> {
    let chunk_id = &chunk.meta.chunk_id;
    let original_text = chunk.text.as_str();

    let mut last_feedback: Option<String> = None;
    let mut previous_text: Option<String> = None;
    // (text, score sum, attempt no) — replaced only on strictly greater sum,
    // so the earliest of tied attempts wins.
    let mut best: Option<(String, f64, u32)> = None;

    for attempt in 1..=max_attempts {
        let rephrased = rephraser
            .rephrase(
                chunk,
                last_feedback.as_deref(),
                previous_text.as_deref(),
                original_text,
            )
            .await?;

        let evaluation = match evaluator.evaluate(original_text, &rephrased).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                warn!(chunk_id = %chunk_id, attempt, error = %e, "evaluation failed");
                if attempt == max_attempts {
                    return Err(ChunkError::Evaluation {
                        chunk_id: chunk_id.clone(),
                        attempt,
                        detail: e.to_string(),
                    });
                }
                last_feedback = Some(format!("Evaluation error: {e}"));
                previous_text = Some(rephrased);
                sleep(attempt_delay).await;
                continue;
            }
        };

        let score_sum = evaluation.scores.sum();
        if best.as_ref().map_or(true, |(_, sum, _)| score_sum > *sum) {
            info!(chunk_id = %chunk_id, attempt, score_sum, "new best attempt");
            best = Some((rephrased.clone(), score_sum, attempt));
        }

        let verdict = evaluator.check_thresholds(&evaluation);
        if verdict.passed {
            info!(chunk_id = %chunk_id, attempt, score_sum, "chunk accepted");
            return Ok(ProcessedChunk {
                meta: chunk.meta.clone(),
                text: rephrased,
                status: ChunkStatus::Passed,
                attempts: attempt,
                score_sum: Some(score_sum),
            });
        }

        let feedback = if evaluation.feedback.trim().is_empty() {
            verdict.message.clone()
        } else {
            evaluation.feedback.clone()
        };
        warn!(
            chunk_id = %chunk_id,
            attempt,
            reason = %verdict.message,
            "attempt rejected"
        );
        last_feedback = Some(feedback);
        previous_text = Some(rephrased);
        if attempt < max_attempts {
            sleep(attempt_delay).await;
        }
    }

    match best {
        Some((text, score_sum, best_attempt)) => {
            warn!(
                chunk_id = %chunk_id,
                max_attempts,
                best_attempt,
                score_sum,
                "no attempt passed; returning best effort"
            );
            Ok(ProcessedChunk {
                meta: chunk.meta.clone(),
                text,
                status: ChunkStatus::BestEffort,
                attempts: max_attempts,
                score_sum: Some(score_sum),
            })
        }
        None => {
            warn!(chunk_id = %chunk_id, max_attempts, "no attempt was ever scored");
            Ok(ProcessedChunk {
                meta: chunk.meta.clone(),
                text: original_text.to_string(),
                status: ChunkStatus::Failed,
                attempts: max_attempts,
                score_sum: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Generator;
    use crate::config::{Metric, MetricSet};
    use crate::error::BackendError;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    fn chunk() -> Chunk {
        Chunk {
            text: "the original text".into(),
            meta: ChunkMeta {
                header: "Intro".into(),
                chunk_id: "Intro_0".into(),
                token_count: 3,
            },
        }
    }

    fn rubric() -> Arc<MetricSet> {
        let names = [
            "correctness",
            "completeness",
            "consistency",
            "relevance",
            "interpretability",
        ];
        Arc::new(
            MetricSet::new(
                names
                    .iter()
                    .map(|n| Metric {
                        name: n.to_string(),
                        description: format!("measures {n}"),
                        threshold: 0.8,
                    })
                    .collect(),
            )
            .unwrap(),
        )
    }

    fn scores_payload(score: f64, feedback: &str) -> String {
        serde_json::json!({
            "scores": {
                "correctness": score,
                "completeness": score,
                "consistency": score,
                "relevance": score,
                "interpretability": score
            },
            "missing_items": [],
            "hallucinated_items": [],
            "feedback": feedback
        })
        .to_string()
    }

    /// Scripted backend: rewrite requests (`structured = false`) and scoring
    /// requests (`structured = true`) each consume their own response queue.
    struct Scripted {
        rephrase_responses: Mutex<Vec<Result<String, BackendError>>>,
        eval_responses: Mutex<Vec<Result<String, BackendError>>>,
        eval_prompts: Mutex<Vec<String>>,
        rephrase_prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(
            rephrase: Vec<Result<String, BackendError>>,
            eval: Vec<Result<String, BackendError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                rephrase_responses: Mutex::new(rephrase),
                eval_responses: Mutex::new(eval),
                eval_prompts: Mutex::new(Vec::new()),
                rephrase_prompts: Mutex::new(Vec::new()),
            })
        }

        fn rephrase_calls(&self) -> usize {
            self.rephrase_prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        async fn generate(&self, prompt: &str, structured: bool) -> Result<String, BackendError> {
            if structured {
                self.eval_prompts.lock().unwrap().push(prompt.to_string());
                self.eval_responses.lock().unwrap().remove(0)
            } else {
                self.rephrase_prompts.lock().unwrap().push(prompt.to_string());
                self.rephrase_responses.lock().unwrap().remove(0)
            }
        }
    }

    fn clients(backend: Arc<Scripted>) -> (RephraseClient, Evaluator) {
        let rephraser = RephraseClient::new(backend.clone(), 0, Duration::ZERO);
        let evaluator = Evaluator::new(backend, rubric(), 0, Duration::ZERO);
        (rephraser, evaluator)
    }

    #[tokio::test]
    async fn first_passing_attempt_wins_even_if_later_would_score_higher() {
        let backend = Scripted::new(
            vec![Ok("try one".into()), Ok("try two".into())],
            vec![
                Ok(scores_payload(0.7, "tighten the wording")),
                Ok(scores_payload(0.9, "")),
            ],
        );
        let (rephraser, evaluator) = clients(backend.clone());

        let result = process_chunk(&rephraser, &evaluator, &chunk(), 5, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(result.status, ChunkStatus::Passed);
        assert_eq!(result.text, "try two");
        assert_eq!(result.attempts, 2);
        assert!((result.score_sum.unwrap() - 4.5).abs() < 1e-9);
        // Loop stopped at the pass; no further rephrase requests were made.
        assert_eq!(backend.rephrase_calls(), 2);
    }

    #[tokio::test]
    async fn immediate_pass_returns_attempt_one() {
        let backend = Scripted::new(
            vec![Ok("good at once".into())],
            vec![Ok(scores_payload(0.85, ""))],
        );
        let (rephraser, evaluator) = clients(backend.clone());

        let result = process_chunk(&rephraser, &evaluator, &chunk(), 5, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(result.status, ChunkStatus::Passed);
        assert_eq!(result.attempts, 1);
        assert_eq!(backend.rephrase_calls(), 1);
    }

    #[tokio::test]
    async fn best_effort_returns_maximal_score_sum_earliest_on_tie() {
        let backend = Scripted::new(
            vec![
                Ok("attempt 1".into()),
                Ok("attempt 2".into()),
                Ok("attempt 3".into()),
                Ok("attempt 4".into()),
            ],
            vec![
                Ok(scores_payload(0.5, "more detail")),
                Ok(scores_payload(0.7, "closer")),
                Ok(scores_payload(0.7, "same again")),
                Ok(scores_payload(0.6, "worse")),
            ],
        );
        let (rephraser, evaluator) = clients(backend.clone());

        let result = process_chunk(&rephraser, &evaluator, &chunk(), 4, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(result.status, ChunkStatus::BestEffort);
        assert_eq!(result.text, "attempt 2", "earliest of the tied maxima");
        assert_eq!(result.attempts, 4);
        assert_eq!(backend.rephrase_calls(), 4, "bounded by max_attempts");
    }

    #[tokio::test]
    async fn evaluation_failure_consumes_attempt_and_feeds_description() {
        let backend = Scripted::new(
            vec![Ok("first".into()), Ok("second".into())],
            vec![
                Ok("not json at all".into()),
                Ok(scores_payload(0.9, "")),
            ],
        );
        let (rephraser, evaluator) = clients(backend.clone());

        let result = process_chunk(&rephraser, &evaluator, &chunk(), 5, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(result.status, ChunkStatus::Passed);
        assert_eq!(result.attempts, 2);

        // The second rephrase prompt carried the evaluation failure as
        // feedback together with the first attempt's text.
        let prompts = backend.rephrase_prompts.lock().unwrap();
        assert!(prompts[1].contains("Evaluation error:"), "got: {}", prompts[1]);
        assert!(prompts[1].contains("first"));
    }

    #[tokio::test]
    async fn evaluation_failure_on_final_attempt_raises() {
        let backend = Scripted::new(
            vec![Ok("a".into()), Ok("b".into())],
            vec![Ok("garbage".into()), Ok("garbage".into())],
        );
        let (rephraser, evaluator) = clients(backend.clone());

        let err = process_chunk(&rephraser, &evaluator, &chunk(), 2, Duration::ZERO)
            .await
            .unwrap_err();

        match err {
            ChunkError::Evaluation { attempt, .. } => assert_eq!(attempt, 2),
            other => panic!("expected evaluation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rephrase_transport_failure_ends_chunk_without_consuming_attempts() {
        let backend = Scripted::new(
            vec![Err(BackendError::Unreachable { detail: "down".into() })],
            vec![],
        );
        let (rephraser, evaluator) = clients(backend.clone());

        let err = process_chunk(&rephraser, &evaluator, &chunk(), 5, Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, ChunkError::Transport { .. }));
        assert_eq!(backend.rephrase_calls(), 1);
    }

    #[tokio::test]
    async fn threshold_message_substitutes_for_empty_feedback() {
        let backend = Scripted::new(
            vec![Ok("first".into()), Ok("second".into())],
            vec![
                Ok(scores_payload(0.5, "")),
                Ok(scores_payload(0.9, "")),
            ],
        );
        let (rephraser, evaluator) = clients(backend.clone());

        process_chunk(&rephraser, &evaluator, &chunk(), 5, Duration::ZERO)
            .await
            .unwrap();

        let prompts = backend.rephrase_prompts.lock().unwrap();
        assert!(
            prompts[1].contains("below threshold"),
            "verdict message must drive the next attempt: {}",
            prompts[1]
        );
    }

    #[tokio::test]
    async fn evaluator_feedback_is_preferred_over_threshold_message() {
        let backend = Scripted::new(
            vec![Ok("first".into()), Ok("second".into())],
            vec![
                Ok(scores_payload(0.5, "name the dataset explicitly")),
                Ok(scores_payload(0.9, "")),
            ],
        );
        let (rephraser, evaluator) = clients(backend.clone());

        process_chunk(&rephraser, &evaluator, &chunk(), 5, Duration::ZERO)
            .await
            .unwrap();

        let prompts = backend.rephrase_prompts.lock().unwrap();
        assert!(prompts[1].contains("name the dataset explicitly"));
    }
}
