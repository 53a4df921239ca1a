//! Rephrase client: one rewrite request per call, with transport retry.
//!
//! The client is intentionally thin — all prompt engineering lives in
//! [`crate::prompts`] so it can be changed without touching retry or
//! error-handling logic here. The first attempt for a chunk uses the base
//! template; once the retry loop has evaluator feedback, the feedback
//! template carries the previous rewrite alongside it so the model corrects
//! instead of starting over.
//!
//! ## Retry Strategy
//!
//! Transport failures against a locally hosted model are common while the
//! model loads or swaps. Each request is retried up to the configured count
//! with a fixed delay; exhaustion fails the whole chunk (the orchestrator
//! does not count it as a rephrase attempt). The fallback to original text
//! happens at the concurrency-runner boundary, never silently here.

use crate::backend::Generator;
use crate::error::{BackendError, ChunkError};
use crate::pipeline::chunk::Chunk;
use crate::prompts;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Issues rewrite requests for chunks.
pub struct RephraseClient {
    backend: Arc<dyn Generator>,
    retries: u32,
    retry_delay: Duration,
}

impl RephraseClient {
    pub fn new(backend: Arc<dyn Generator>, retries: u32, retry_delay: Duration) -> Self {
        Self {
            backend,
            retries,
            retry_delay,
        }
    }

    /// Request one rewrite of `chunk`.
    ///
    /// `feedback` and `previous_text` travel together: both present selects
    /// the feedback template, otherwise the base template is used.
    /// `original_text` is always the untouched source text — rewrites are
    /// never chained through previous rewrites.
    pub async fn rephrase(
        &self,
        chunk: &Chunk,
        feedback: Option<&str>,
        previous_text: Option<&str>,
        original_text: &str,
    ) -> Result<String, ChunkError> {
        let header = &chunk.meta.header;
        let prompt = match (feedback, previous_text) {
            (Some(feedback), Some(previous)) => {
                prompts::feedback_prompt(header, original_text, previous, feedback)
            }
            _ => prompts::rephrase_prompt(header, original_text),
        };

        let mut last_err: Option<BackendError> = None;
        for attempt in 0..=self.retries {
            if attempt > 0 {
                warn!(
                    chunk_id = %chunk.meta.chunk_id,
                    attempt,
                    retries = self.retries,
                    "retrying rephrase request"
                );
                sleep(self.retry_delay).await;
            }

            match self.backend.generate(&prompt, false).await {
                Ok(output) => {
                    let cleaned = clean_output(&output);
                    debug!(
                        chunk_id = %chunk.meta.chunk_id,
                        chars = cleaned.len(),
                        "rephrase received"
                    );
                    return Ok(cleaned);
                }
                Err(e) if e.is_retryable() => {
                    warn!(chunk_id = %chunk.meta.chunk_id, error = %e, "rephrase request failed");
                    last_err = Some(e);
                }
                Err(e) => {
                    return Err(ChunkError::Transport {
                        chunk_id: chunk.meta.chunk_id.clone(),
                        attempts: attempt + 1,
                        detail: e.to_string(),
                    })
                }
            }
        }

        Err(ChunkError::Transport {
            chunk_id: chunk.meta.chunk_id.clone(),
            attempts: self.retries + 1,
            detail: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

// ── Output cleanup ───────────────────────────────────────────────────────
//
// Models occasionally wrap their answer in code fences or emit Windows line
// endings despite the prompt. These deterministic rules fix the wrapper
// without touching content.

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:\w+)?\n(.*)\n```\s*$").unwrap());

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Trim and normalise raw model output.
pub fn clean_output(raw: &str) -> String {
    let s = raw.trim();
    let s = match RE_OUTER_FENCES.captures(s) {
        Some(caps) => caps[1].to_string(),
        None => s.to_string(),
    };
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    RE_BLANK_LINES.replace_all(&s, "\n\n").trim().to_string()
}
