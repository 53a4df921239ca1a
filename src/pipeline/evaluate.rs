//! Rubric evaluation of a rephrased chunk against its original.
//!
//! The evaluator sends one structured scoring request per call and fails
//! closed: any deviation from the documented response schema — missing
//! field, unknown field, score outside `[0, 1]` — is a validation error,
//! never silently patched over. A model that scores itself with the wrong
//! shape is indistinguishable from a model that misunderstood the rubric,
//! and accepting its output would let unchecked rewrites through the gate.
//!
//! Threshold checking is separate from scoring so the retry loop can treat
//! "scored but below the bar" (ordinary, drives feedback) differently from
//! "could not be scored" (consumes an attempt, may fail the chunk).

use crate::backend::Generator;
use crate::config::MetricSet;
use crate::error::BackendError;
use crate::prompts;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

/// Per-metric scores, exactly the five rubric dimensions.
///
/// `deny_unknown_fields` makes an extra key a parse error rather than a
/// silent drop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scores {
    pub correctness: f64,
    pub completeness: f64,
    pub consistency: f64,
    pub relevance: f64,
    pub interpretability: f64,
}

impl Scores {
    /// Name/value pairs in schema order.
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("correctness", self.correctness),
            ("completeness", self.completeness),
            ("consistency", self.consistency),
            ("relevance", self.relevance),
            ("interpretability", self.interpretability),
        ]
    }

    /// Look up a score by metric name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Sum of all five scores — the retry loop's ranking key.
    pub fn sum(&self) -> f64 {
        self.entries().into_iter().map(|(_, v)| v).sum()
    }
}

/// The validated result of one scoring request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluationResult {
    pub scores: Scores,
    pub missing_items: Vec<String>,
    pub hallucinated_items: Vec<String>,
    pub feedback: String,
}

impl EvaluationResult {
    /// Range-check every score; serde cannot express numeric bounds.
    fn validate(&self) -> Result<(), String> {
        for (name, value) in self.scores.entries() {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(format!("score '{name}' = {value} is outside [0, 1]"));
            }
        }
        Ok(())
    }
}

/// Outcome of checking an evaluation against the configured thresholds.
///
/// A failed verdict is a normal retry-loop outcome, not an error; the
/// message feeds the next attempt's feedback when the evaluator returned
/// none of its own.
#[derive(Debug, Clone)]
pub struct ThresholdVerdict {
    pub passed: bool,
    pub message: String,
}

/// Errors from one evaluation call.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    /// The scoring request could not be completed after transport retries.
    #[error("evaluation request failed: {0}")]
    Transport(BackendError),

    /// The backend answered, but the payload violated the schema.
    #[error("evaluation response invalid: {detail}")]
    Invalid { detail: String },
}

/// Scores rephrased text against the loaded rubric.
pub struct Evaluator {
    backend: Arc<dyn Generator>,
    metrics: Arc<MetricSet>,
    metric_descriptions: String,
    retries: u32,
    retry_delay: Duration,
}

impl Evaluator {
    pub fn new(
        backend: Arc<dyn Generator>,
        metrics: Arc<MetricSet>,
        retries: u32,
        retry_delay: Duration,
    ) -> Self {
        let metric_descriptions = metrics
            .iter()
            .map(|m| format!("- {}: {}", capitalize(&m.name), m.description))
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            backend,
            metrics,
            metric_descriptions,
            retries,
            retry_delay,
        }
    }

    /// Score `rephrased_text` against `input_text`.
    ///
    /// Transport failures are retried with a fixed delay; schema violations
    /// are not retried (an identical request would produce the same class of
    /// answer, and the retry loop's feedback mechanism is the right lever).
    pub async fn evaluate(
        &self,
        input_text: &str,
        rephrased_text: &str,
    ) -> Result<EvaluationResult, EvalError> {
        let prompt = prompts::evaluator_prompt(&self.metric_descriptions, input_text, rephrased_text);

        let mut last_err: Option<BackendError> = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                warn!(attempt, retries = self.retries, "retrying evaluation request");
                sleep(self.retry_delay).await;
            }

            match self.backend.generate(&prompt, true).await {
                Ok(payload) => return parse_payload(&payload),
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "evaluation request failed");
                    last_err = Some(e);
                }
                Err(e) => {
                    return Err(EvalError::Invalid {
                        detail: e.to_string(),
                    })
                }
            }
        }

        Err(EvalError::Transport(last_err.unwrap_or(
            BackendError::Unreachable {
                detail: "no attempt was made".into(),
            },
        )))
    }

    /// Check every configured metric against its threshold, stopping at the
    /// first failure in configured metric order.
    pub fn check_thresholds(&self, result: &EvaluationResult) -> ThresholdVerdict {
        for metric in self.metrics.iter() {
            let Some(score) = result.scores.get(&metric.name) else {
                return ThresholdVerdict {
                    passed: false,
                    message: format!(
                        "Metric '{}' has no score in the evaluation result.",
                        metric.name
                    ),
                };
            };
            if score < metric.threshold {
                return ThresholdVerdict {
                    passed: false,
                    message: format!(
                        "Metric '{}' score {:.2} is below threshold {:.2}.",
                        metric.name, score, metric.threshold
                    ),
                };
            }
        }

        ThresholdVerdict {
            passed: true,
            message: "All metrics meet the required thresholds.".to_string(),
        }
    }
}

/// Parse and validate the envelope payload of a scoring request.
fn parse_payload(payload: &str) -> Result<EvaluationResult, EvalError> {
    let result: EvaluationResult =
        serde_json::from_str(payload.trim()).map_err(|e| EvalError::Invalid {
            detail: format!("{e}\n>>> {}", truncate(payload, 200)),
        })?;
    result
        .validate()
        .map_err(|detail| EvalError::Invalid { detail })?;
    Ok(result)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
