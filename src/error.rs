//! Error types for the pdf-rephrase library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] — **Fatal**: the run cannot proceed at all (missing
//!   config file, unresolvable tokenizer, zero sections extracted). Returned
//!   as `Err(PipelineError)` from the top-level `run*` functions before any
//!   chunk work begins, or from artifact writing after it ends.
//!
//! * [`ChunkError`] — **Non-fatal**: a single chunk's rephrase/evaluate loop
//!   failed (transport retries exhausted, evaluation broken on the final
//!   attempt). Caught at the concurrency-runner boundary; the chunk falls
//!   back to its original text and the run continues.
//!
//! Threshold failures are deliberately NOT errors — they are ordinary
//! retry-loop outcomes carried as values (see
//! [`crate::pipeline::evaluate::ThresholdVerdict`]).

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf-rephrase library.
///
/// Chunk-level failures use [`ChunkError`] and are recorded in the run's
/// error report rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// PDF could not be opened or parsed by the PDF engine.
    #[error("PDF '{path}' could not be opened: {detail}")]
    PdfOpen { path: PathBuf, detail: String },

    // ── Configuration errors ──────────────────────────────────────────────
    /// Configuration file missing or unreadable.
    #[error("Configuration file not found: '{path}'")]
    ConfigNotFound { path: PathBuf },

    /// Configuration file present but malformed or missing a required key.
    #[error("Invalid configuration in '{path}': {detail}")]
    ConfigInvalid { path: PathBuf, detail: String },

    /// Metrics file present but malformed.
    #[error("Invalid metrics file '{path}': {detail}")]
    MetricsInvalid { path: PathBuf, detail: String },

    /// No backend endpoint configured.
    #[error(
        "No generation endpoint configured.\n\
         Set the {var} environment variable or the 'endpoint' config key."
    )]
    EndpointMissing { var: &'static str },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Startup errors ────────────────────────────────────────────────────
    /// The tokenizer for the configured model id could not be loaded.
    #[error("Failed to load tokenizer for model '{model}': {detail}")]
    TokenizerInit { model: String, detail: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// Header detection produced zero sections; nothing to rephrase.
    ///
    /// An empty section list is treated as a failed extraction, not an
    /// empty-but-valid document.
    #[error(
        "No sections extracted from '{path}'.\n\
         The document has no detectable headers (large bold text)."
    )]
    NoSections { path: PathBuf },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single chunk.
///
/// Raised out of [`crate::pipeline::retry::process_chunk`] and caught at the
/// concurrency-runner boundary, where the chunk's output degrades to its
/// original text and the failure is recorded under its header in the error
/// report. The overall run always proceeds.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ChunkError {
    /// Generation request failed after all transport retries.
    #[error("chunk '{chunk_id}': generation failed after {attempts} attempts: {detail}")]
    Transport {
        chunk_id: String,
        attempts: u32,
        detail: String,
    },

    /// Evaluation failed on the final rephrase attempt.
    #[error("chunk '{chunk_id}': evaluation failed on attempt {attempt}: {detail}")]
    Evaluation {
        chunk_id: String,
        attempt: u32,
        detail: String,
    },
}

/// Errors from a single backend request, before any retry policy applies.
///
/// `Unreachable` and `Status` are transport-class failures and are retried
/// with a fixed delay by the rephrase client and the evaluator's request
/// step. `Envelope` means the backend answered 2xx but its response body did
/// not match the documented envelope; retrying would re-send an identical
/// request, so it is surfaced immediately.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The endpoint could not be reached (connect/timeout/DNS).
    #[error("backend unreachable: {detail}")]
    Unreachable { detail: String },

    /// The backend answered with a non-2xx status.
    #[error("backend returned HTTP {status}")]
    Status { status: u16 },

    /// The 2xx response body did not decode as the expected envelope.
    #[error("backend response envelope invalid: {detail}")]
    Envelope { detail: String },
}

impl BackendError {
    /// Transport-class failures are worth retrying; envelope decode
    /// failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BackendError::Unreachable { .. } | BackendError::Status { .. }
        )
    }
}
