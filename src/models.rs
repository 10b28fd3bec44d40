//! Core data models shared across the pipeline.
//!
//! These types represent the documents, chunks, batch jobs, and reconciled
//! records that flow from extraction output to per-category result sets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document whose normalized text has been produced by the external
/// extraction collaborator and written to `{project}/extracted/{name}.json`.
///
/// Immutable once extracted. A changed source file produces a new
/// extraction with a different `content_hash`, superseding this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub project: String,
    /// Document file name without extension (e.g. `"IXP-2024-001"`).
    pub name: String,
    /// Normalized full text.
    pub text: String,
    /// SHA-256 of `text`, used for the skip-if-already-chunked check.
    /// Recomputed on load when the extraction output omits it.
    #[serde(default)]
    pub content_hash: String,
}

/// A token-bounded, overlap-linked contiguous segment of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document: String,
    /// 0-based, contiguous within the document.
    pub index: usize,
    pub text: String,
    /// Token count of `text`; at most the configured maximum.
    pub tokens: usize,
    /// Tokens shared with the end of the previous chunk (0 for index 0).
    pub overlap_tokens: usize,
}

/// Persisted form of a chunk, written to `{project}/chunks/{doc}_chunk_{i:03}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub document: String,
    pub chunk_index: usize,
    pub content: String,
    pub tokens: usize,
    pub overlap_tokens: usize,
    /// Hash of the source document text these chunks were cut from.
    pub source_hash: String,
    pub total_chunks: usize,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of a batch job.
///
/// `Submitted` is local; `Validating`, `InProgress`, and `Finalizing` are
/// reported by the external service and never set by this crate on its
/// own. `Completed`, `Failed`, `Expired`, and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl JobStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled
        )
    }

    /// Terminal without results: the project gets no structured output
    /// from this job without manual resubmission.
    pub fn is_dead(self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Submitted => "submitted",
            JobStatus::Validating => "validating",
            JobStatus::InProgress => "in_progress",
            JobStatus::Finalizing => "finalizing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Metadata for one batch job, persisted to `batch/{job_id}/info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJobInfo {
    pub job_id: String,
    pub project: String,
    pub status: JobStatus,
    pub input_file_id: String,
    #[serde(default)]
    pub output_file_id: Option<String>,
    pub total_requests: usize,
    pub created_at: DateTime<Utc>,
    /// Provider completion window; past this instant the job can only
    /// complete or expire.
    pub deadline: DateTime<Utc>,
}

/// Idempotency flag recording that a completed job's results have been
/// reconciled. Written once to `{project}/results/batches/{job_id}/processed.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedMarker {
    pub batch_id: String,
    pub processed: bool,
    pub processed_at: DateTime<Utc>,
    /// Total reconciled records, including fallback records.
    pub records: usize,
}

/// One address-resolved, per-chunk reconciled output.
///
/// `content` is `None` when the line failed to parse or the model
/// returned an error for this request; the "not extracted" sentinel is a
/// serialization detail applied by downstream reporting, not stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledRecord {
    pub document: String,
    pub category: String,
    pub chunk_index: usize,
    pub content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Queue/event message that triggers processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerMessage {
    pub project_name: String,
    pub queue_type: String,
    /// When present, only this document is processed.
    #[serde(default)]
    pub document_name: Option<String>,
    /// Optional category restriction.
    #[serde(default)]
    pub category: Option<String>,
}
