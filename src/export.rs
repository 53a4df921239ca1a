//! Aggregation and export: regroup accepted chunk text by section header,
//! render the final document, and persist run artifacts.
//!
//! The export contract ends at data: ordered sections, per-header combined
//! text, and the error report. Rendering here is plain Markdown; anything
//! richer (typesetting, pagination) belongs to downstream consumers of the
//! same data.
//!
//! All writes are atomic (temp file + rename) so an interrupted run never
//! leaves a half-written document behind.

use crate::error::PipelineError;
use crate::output::{ChunkOutcome, RunOutput};
use crate::pipeline::extract::Section;
use chrono::Local;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Placeholder rendered for a header that ended up with no chunk text
/// (its section body was empty, so nothing was submitted for it).
const NO_TEXT_PLACEHOLDER: &str = "No rephrased text available.";

/// Group outcome texts by header, preserving chunk-sequence order within
/// each header.
pub fn aggregate_by_header(outcomes: &[ChunkOutcome]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for outcome in outcomes {
        map.entry(outcome.meta.header.clone())
            .or_default()
            .push(outcome.text.clone());
    }
    map
}

/// Render the final document: every section in document order, its combined
/// chunk text joined with newlines under its header.
pub fn render_document(sections: &[Section], outcomes: &[ChunkOutcome]) -> String {
    let grouped = aggregate_by_header(outcomes);

    let mut parts: Vec<String> = Vec::with_capacity(sections.len());
    for section in sections {
        let body = grouped
            .get(section.header.trim())
            .map(|texts| texts.join("\n"))
            .unwrap_or_else(|| NO_TEXT_PLACEHOLDER.to_string());
        parts.push(format!("# {}\n\n{}", section.header, body));
    }

    let mut document = parts.join("\n\n");
    document.push('\n');
    document
}

/// Filesystem locations of one run's artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    /// The rendered document.
    pub document: PathBuf,
    /// Header-keyed error report (written only when non-empty).
    pub error_report: PathBuf,
    /// Raw extracted sections, for inspecting what header detection saw.
    pub sections_dump: PathBuf,
}

impl ArtifactPaths {
    /// Timestamped artifact names derived from the input file stem, in the
    /// conventional output/log/extracted directories.
    pub fn timestamped(
        output_dir: &Path,
        log_dir: &Path,
        extracted_dir: &Path,
        stem: &str,
    ) -> Self {
        let timestamp = Local::now().format("%Y%m%d_%H%M");
        Self {
            document: output_dir.join(format!("{stem}_Rephrased_{timestamp}.md")),
            error_report: log_dir.join(format!("{stem}_failed_chunks_{timestamp}.json")),
            sections_dump: extracted_dir.join(format!("{stem}_raw_sections_{timestamp}.json")),
        }
    }
}

/// Persist a completed run: document, section dump, and — when any chunk
/// degraded — the error report.
pub async fn write_artifacts(
    paths: &ArtifactPaths,
    output: &RunOutput,
) -> Result<(), PipelineError> {
    write_atomic(&paths.document, output.document.as_bytes()).await?;
    info!(path = %paths.document.display(), "document written");

    let sections_json = serde_json::to_vec_pretty(&output.sections)
        .map_err(|e| PipelineError::Internal(format!("section dump: {e}")))?;
    write_atomic(&paths.sections_dump, &sections_json).await?;

    if !output.report.is_empty() {
        let report_json = serde_json::to_vec_pretty(&output.report)
            .map_err(|e| PipelineError::Internal(format!("error report: {e}")))?;
        write_atomic(&paths.error_report, &report_json).await?;
        info!(
            path = %paths.error_report.display(),
            degraded = output.report.len(),
            "error report written"
        );
    }

    Ok(())
}

/// Write to a temp file beside the target, then rename into place.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let wrap = |e: std::io::Error| PipelineError::OutputWrite {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(wrap)?;
    }

    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await.map_err(wrap)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(wrap)?;
    Ok(())
}
