//! End-to-end run: extraction → chunking → concurrent rephrase/evaluate →
//! aggregation.
//!
//! ## Failure isolation
//!
//! Every chunk is processed by an independent pipeline; a fault raised from
//! one chunk is caught HERE, at the fan-out boundary, converted into a
//! fallback-to-original outcome, and recorded for the error report. Workers
//! communicate only through their return values — the error report is built
//! by this single owner after the join, so nothing in the fan-out shares
//! mutable state.
//!
//! ## Ordering
//!
//! `buffer_unordered` completes chunks in whatever order the backend
//! answers; outcomes carry their submission index and are sorted back into
//! document order before aggregation, so the rendered document is
//! deterministic for any completion interleaving.

use crate::backend::{Generator, HttpBackend};
use crate::config::{MetricSet, RunConfig};
use crate::error::{ChunkError, PipelineError};
use crate::export;
use crate::output::{ChunkOutcome, ChunkStatus, ErrorReport, RunOutput, RunStats};
use crate::pipeline::chunk;
use crate::pipeline::evaluate::Evaluator;
use crate::pipeline::extract::{self, PdfiumSpanSource, Section};
use crate::pipeline::rephrase::RephraseClient;
use crate::pipeline::retry;
use crate::pipeline::tokenizer::{TokenCount, TokenCounter};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Rephrase a PDF end-to-end with the HTTP backend from the configuration.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Returns `Err(PipelineError)` only for run-level faults: unreadable or
/// non-PDF input, missing endpoint, tokenizer failure, or zero extracted
/// sections. Per-chunk faults degrade to original text and are reported in
/// `RunOutput::report` instead.
pub async fn run(
    input: impl AsRef<Path>,
    config: &RunConfig,
    metrics: MetricSet,
) -> Result<RunOutput, PipelineError> {
    let backend = Arc::new(HttpBackend::new(config)?);
    run_with_backend(input, config, metrics, backend).await
}

/// [`run`] with a caller-supplied backend.
///
/// Useful in tests and for callers that need custom middleware (caching,
/// rate limiting) between the pipeline and the network.
pub async fn run_with_backend(
    input: impl AsRef<Path>,
    config: &RunConfig,
    metrics: MetricSet,
    backend: Arc<dyn Generator>,
) -> Result<RunOutput, PipelineError> {
    let total_start = Instant::now();
    let path = validate_input(input.as_ref())?;
    info!(path = %path.display(), "starting run");

    // ── Extract sections ─────────────────────────────────────────────────
    let extract_start = Instant::now();
    let sections = extract::extract_sections(PdfiumSpanSource::new(&path)).await?;
    if sections.is_empty() {
        return Err(PipelineError::NoSections { path });
    }
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;
    info!(
        sections = sections.len(),
        ms = extract_duration_ms,
        "sections extracted"
    );

    // ── Load tokenizer ───────────────────────────────────────────────────
    // Hub resolution does blocking file/network I/O.
    let model = config.tokenizer_model.clone();
    let counter = tokio::task::spawn_blocking(move || TokenCounter::from_pretrained(&model))
        .await
        .map_err(|e| PipelineError::Internal(format!("tokenizer task panicked: {e}")))??;

    // ── Rephrase everything ──────────────────────────────────────────────
    let mut output = rephrase_sections(sections, config, metrics, backend, &counter).await?;
    output.stats.extract_duration_ms = extract_duration_ms;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    info!(
        passed = output.stats.passed_chunks,
        best_effort = output.stats.best_effort_chunks,
        failed = output.stats.failed_chunks,
        ms = output.stats.total_duration_ms,
        "run complete"
    );
    Ok(output)
}

/// Chunk extracted sections and drive every chunk through the retry loop on
/// a bounded worker pool.
///
/// The backend and token counter are injected, so this function has no I/O
/// of its own besides the backend calls — tests script both.
pub async fn rephrase_sections(
    sections: Vec<Section>,
    config: &RunConfig,
    metrics: MetricSet,
    backend: Arc<dyn Generator>,
    counter: &dyn TokenCount,
) -> Result<RunOutput, PipelineError> {
    let rephrase_start = Instant::now();

    let chunks = chunk::chunk_sections(&sections, config, counter);
    info!(chunks = chunks.len(), "chunking complete");

    let rephraser = Arc::new(RephraseClient::new(
        Arc::clone(&backend),
        config.transport_retries,
        config.transport_retry_delay(),
    ));
    let evaluator = Arc::new(Evaluator::new(
        backend,
        Arc::new(metrics),
        config.transport_retries,
        config.transport_retry_delay(),
    ));

    let max_attempts = config.max_attempts;
    let attempt_delay = config.attempt_delay();

    let mut outcomes: Vec<ChunkOutcome> = stream::iter(chunks.iter().enumerate().map(
        |(seq, chunk)| {
            let rephraser = Arc::clone(&rephraser);
            let evaluator = Arc::clone(&evaluator);
            async move {
                info!(
                    header = %chunk.meta.header,
                    chunk_id = %chunk.meta.chunk_id,
                    "processing chunk"
                );
                match retry::process_chunk(&rephraser, &evaluator, chunk, max_attempts, attempt_delay)
                    .await
                {
                    Ok(processed) => ChunkOutcome {
                        seq,
                        meta: processed.meta,
                        text: processed.text,
                        status: processed.status,
                        attempts: processed.attempts,
                        score_sum: processed.score_sum,
                        error: None,
                    },
                    Err(e) => {
                        warn!(
                            chunk_id = %chunk.meta.chunk_id,
                            error = %e,
                            "chunk failed; falling back to original text"
                        );
                        let attempts = match &e {
                            ChunkError::Transport { .. } => 0,
                            ChunkError::Evaluation { attempt, .. } => *attempt,
                        };
                        ChunkOutcome {
                            seq,
                            meta: chunk.meta.clone(),
                            text: chunk.text.clone(),
                            status: ChunkStatus::Failed,
                            attempts,
                            score_sum: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
        },
    ))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    // Join-all barrier passed; restore submission order for deterministic
    // aggregation.
    outcomes.sort_by_key(|o| o.seq);

    let report = ErrorReport::from_outcomes(&outcomes);
    let document = export::render_document(&sections, &outcomes);

    let stats = RunStats {
        sections: sections.len(),
        total_chunks: outcomes.len(),
        passed_chunks: count(&outcomes, ChunkStatus::Passed),
        best_effort_chunks: count(&outcomes, ChunkStatus::BestEffort),
        failed_chunks: count(&outcomes, ChunkStatus::Failed),
        extract_duration_ms: 0,
        rephrase_duration_ms: rephrase_start.elapsed().as_millis() as u64,
        total_duration_ms: 0,
    };

    Ok(RunOutput {
        document,
        sections,
        chunks: outcomes,
        report,
        stats,
    })
}

fn count(outcomes: &[ChunkOutcome], status: ChunkStatus) -> usize {
    outcomes.iter().filter(|o| o.status == status).count()
}

/// Validate the input path: it must exist and carry the PDF magic bytes.
fn validate_input(path: &Path) -> Result<PathBuf, PipelineError> {
    use std::io::Read;

    let path = path.to_path_buf();
    let mut file = std::fs::File::open(&path).map_err(|_| PipelineError::FileNotFound {
        path: path.clone(),
    })?;

    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
        return Err(PipelineError::NotAPdf { path, magic });
    }

    Ok(path)
}
