//! Output types: per-chunk outcomes, the error report, and run statistics.
//!
//! A run never loses a chunk: every chunk produces exactly one
//! [`ChunkOutcome`] whatever happened to it, and the terminal state is
//! recorded in [`ChunkStatus`]. The error report is derived from the
//! outcomes after the join-all barrier — it is built by a single owner, so
//! no locking is needed anywhere in the fan-out.

use crate::pipeline::chunk::ChunkMeta;
use crate::pipeline::extract::Section;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Terminal state of one chunk's retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// An attempt cleared every metric threshold; its text was accepted.
    Passed,
    /// No attempt cleared the thresholds; the highest-scoring attempt's
    /// text was kept.
    BestEffort,
    /// No attempt could be scored at all; the original text was kept.
    Failed,
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChunkStatus::Passed => "passed",
            ChunkStatus::BestEffort => "best-effort, thresholds not met",
            ChunkStatus::Failed => "failed, no viable rephrase",
        };
        f.write_str(s)
    }
}

/// The settled result of one chunk after the runner boundary.
///
/// `seq` is the chunk's position in submission order; the runner sorts
/// outcomes by it so aggregation sees document order regardless of
/// completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub seq: usize,
    pub meta: ChunkMeta,
    pub text: String,
    pub status: ChunkStatus,
    /// Rephrase attempts consumed (0 when the chunk failed before its
    /// first evaluation).
    pub attempts: u32,
    /// Score sum of the accepted attempt, when one was scored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_sum: Option<f64>,
    /// Fault caught at the runner boundary, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One degraded chunk in the error report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRecord {
    pub chunk_id: String,
    pub status: ChunkStatus,
    pub reason: String,
}

/// Header-keyed record of every chunk that fell back to original or
/// best-effort text, and why.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorReport {
    pub entries: BTreeMap<String, Vec<FallbackRecord>>,
}

impl ErrorReport {
    /// Build the report from settled outcomes. Passed chunks never appear.
    pub fn from_outcomes(outcomes: &[ChunkOutcome]) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            if outcome.status == ChunkStatus::Passed {
                continue;
            }
            let reason = outcome
                .error
                .clone()
                .unwrap_or_else(|| outcome.status.to_string());
            report
                .entries
                .entry(outcome.meta.header.clone())
                .or_default()
                .push(FallbackRecord {
                    chunk_id: outcome.meta.chunk_id.clone(),
                    status: outcome.status,
                    reason,
                });
        }
        report
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of degraded chunks across all headers.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Statistics for a completed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub sections: usize,
    pub total_chunks: usize,
    pub passed_chunks: usize,
    pub best_effort_chunks: usize,
    pub failed_chunks: usize,
    pub extract_duration_ms: u64,
    pub rephrase_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a completed run produces.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    /// The final rendered document.
    pub document: String,
    /// Extracted sections in document order.
    pub sections: Vec<Section>,
    /// Per-chunk outcomes in submission order.
    pub chunks: Vec<ChunkOutcome>,
    /// Which headers degraded, and why.
    pub report: ErrorReport,
    pub stats: RunStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(header: &str, id: &str, status: ChunkStatus, error: Option<&str>) -> ChunkOutcome {
        ChunkOutcome {
            seq: 0,
            meta: ChunkMeta {
                header: header.to_string(),
                chunk_id: id.to_string(),
                token_count: 1,
            },
            text: "t".into(),
            status,
            attempts: 1,
            score_sum: None,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn passed_chunks_are_not_reported() {
        let report = ErrorReport::from_outcomes(&[outcome("A", "A_0", ChunkStatus::Passed, None)]);
        assert!(report.is_empty());
    }

    #[test]
    fn degraded_chunks_group_under_their_header() {
        let report = ErrorReport::from_outcomes(&[
            outcome("B", "B_0", ChunkStatus::BestEffort, None),
            outcome("B", "B_1", ChunkStatus::Failed, Some("evaluation broke")),
            outcome("C", "C_0", ChunkStatus::Failed, Some("backend down")),
        ]);
        assert_eq!(report.len(), 3);
        assert_eq!(report.entries["B"].len(), 2);
        assert_eq!(report.entries["C"][0].reason, "backend down");
        assert_eq!(
            report.entries["B"][0].reason,
            "best-effort, thresholds not met"
        );
    }

    #[test]
    fn report_serialises_as_header_keyed_map() {
        let report = ErrorReport::from_outcomes(&[outcome(
            "Methods",
            "Methods_0",
            ChunkStatus::Failed,
            Some("boom"),
        )]);
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("Methods").is_some(), "got: {json}");
        assert_eq!(json["Methods"][0]["status"], "failed");
    }
}
