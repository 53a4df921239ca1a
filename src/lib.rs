//! # pdf-rephrase
//!
//! Rephrase PDF documents section by section using a language model, with a
//! rubric-based quality gate deciding what gets accepted.
//!
//! ## Why this crate?
//!
//! Running a document through a model once gives you *a* rewrite, with no
//! idea whether it kept the facts, the structure, or the point. This crate
//! closes the loop: every rewritten piece is scored against a configurable
//! rubric (correctness, completeness, consistency, relevance,
//! interpretability) and only accepted once every metric clears its
//! threshold — otherwise the evaluator's feedback drives another attempt,
//! and the best-scoring attempt is kept as a clearly-tagged fallback.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Extract   font-statistics header detection → sections
//!  ├─ 2. Chunk     token-ceiling splitting (prioritized separators)
//!  ├─ 3. Rephrase  per-chunk rewrite requests, concurrent ×4
//!  ├─ 4. Evaluate  rubric scoring, strict JSON schema, thresholds
//!  ├─ 5. Retry     feedback-driven loop, best-effort fallback
//!  └─ 6. Export    per-header aggregation + document + error report
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_rephrase::{run, MetricSet, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Endpoint from REPHRASE_API_URL (e.g. an Ollama /api/generate URL)
//!     let config = RunConfig::from_file("config.json")?;
//!     let metrics = MetricSet::from_file("metrics.json")?;
//!     let output = run("document.pdf", &config, metrics).await?;
//!     println!("{}", output.document);
//!     eprintln!(
//!         "{} passed / {} best-effort / {} failed",
//!         output.stats.passed_chunks,
//!         output.stats.best_effort_chunks,
//!         output.stats.failed_chunks
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Failure model
//!
//! A completed run always yields a full document: chunks whose processing
//! failed outright fall back to their original text, and the error report
//! names exactly which headers degraded and why. Only run-level faults
//! (missing config, unresolvable tokenizer, zero sections extracted) abort
//! the run.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf-rephrase` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod error;
pub mod export;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod run;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{Generator, HttpBackend, ENDPOINT_ENV};
pub use config::{Metric, MetricSet, RunConfig, RunConfigBuilder};
pub use error::{BackendError, ChunkError, PipelineError};
pub use export::{write_artifacts, ArtifactPaths};
pub use output::{ChunkOutcome, ChunkStatus, ErrorReport, RunOutput, RunStats};
pub use run::{rephrase_sections, run, run_with_backend};
