//! Result reconciliation.
//!
//! Takes the provider's JSONL output file and maps every line back to its
//! (document, category, chunk) through the custom-id address. Parsing is
//! line-tolerant: one corrupt line costs that line, never the file. A
//! line whose address decodes but whose payload is unusable still yields
//! a record, with `content: None` and the failure reason, so per-chunk
//! accounting stays complete.
//!
//! Model output arrives in whatever shape the model chose: bare JSON,
//! a fenced ```json block (possibly truncated at the token limit), or
//! prose. Extraction tries each in turn and falls back to the raw string,
//! never discarding content.

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::address::RequestAddress;
use crate::categories::Category;
use crate::models::ReconciledRecord;
use crate::store::{keys, ObjectStore};

/// Serialized stand-in for absent content. In-memory records carry
/// `Option`; the sentinel appears only in the persisted result files.
pub const NOT_EXTRACTED: &str = "NO EXTRAIDO";

/// One line that could not be attributed to any address.
#[derive(Debug, Clone)]
pub struct LineError {
    pub line_number: usize,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// Records grouped by category, each list ordered by document then
    /// chunk index.
    pub by_category: BTreeMap<Category, Vec<ReconciledRecord>>,
    /// Lines with no decodable address.
    pub unattributed: Vec<LineError>,
    pub total_lines: usize,
    pub successful: usize,
    pub failed: usize,
}

impl ReconcileOutcome {
    pub fn record_count(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }
}

/// Reconcile one output file's JSONL content.
pub fn reconcile_lines(jsonl: &str) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();

    for (line_number, line) in jsonl.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        outcome.total_lines += 1;

        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                outcome.failed += 1;
                outcome.unattributed.push(LineError {
                    line_number: line_number + 1,
                    error: format!("Invalid JSON: {}", e),
                });
                tracing::warn!(line = line_number + 1, "Unparseable result line: {}", e);
                continue;
            }
        };

        let custom_id = parsed["custom_id"].as_str().unwrap_or("");
        let address = match RequestAddress::decode(custom_id) {
            Ok(a) => a,
            Err(e) => {
                outcome.failed += 1;
                outcome.unattributed.push(LineError {
                    line_number: line_number + 1,
                    error: e.to_string(),
                });
                tracing::warn!(line = line_number + 1, custom_id, "Undecodable custom id");
                continue;
            }
        };

        let record = match extract_record(&address, &parsed) {
            Ok(content) => {
                outcome.successful += 1;
                ReconciledRecord {
                    document: address.document.clone(),
                    category: address.category.as_str().to_string(),
                    chunk_index: address.chunk_index,
                    content: Some(content),
                    error: None,
                }
            }
            Err(reason) => {
                outcome.failed += 1;
                tracing::warn!(custom_id, "Failed response: {}", reason);
                ReconciledRecord {
                    document: address.document.clone(),
                    category: address.category.as_str().to_string(),
                    chunk_index: address.chunk_index,
                    content: None,
                    error: Some(reason),
                }
            }
        };

        outcome
            .by_category
            .entry(address.category)
            .or_default()
            .push(record);
    }

    for records in outcome.by_category.values_mut() {
        records.sort_by(|a, b| {
            a.document
                .cmp(&b.document)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
    }
    outcome
}

/// Pull usable content out of one result line, or the failure reason.
fn extract_record(address: &RequestAddress, parsed: &Value) -> std::result::Result<Value, String> {
    let response = &parsed["response"];
    let status_code = response["status_code"].as_u64().unwrap_or(0);
    if status_code != 200 {
        return Err(format!(
            "Request {} failed with status {}",
            address, status_code
        ));
    }

    let content = response["body"]["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .ok_or_else(|| format!("Request {} returned no choices", address))?;

    Ok(extract_json_content(content))
}

/// Parse model output leniently: fenced ```json block (with truncation
/// repair), bare JSON, then raw string.
pub fn extract_json_content(content: &str) -> Value {
    if let Some(inner) = content.strip_prefix("```json\n") {
        let candidate = match inner.rfind("```") {
            Some(pos) => inner[..pos].trim_end_matches('\n').to_string(),
            // No closing fence: the output hit the token limit mid-JSON.
            // Close any open structures so the prefix still parses.
            None => repair_truncated(inner),
        };
        if let Ok(v) = serde_json::from_str(&candidate) {
            return v;
        }
        tracing::warn!("Could not parse fenced JSON block, keeping raw content");
        return Value::String(content.to_string());
    }

    let trimmed = content.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(v) = serde_json::from_str(trimmed) {
            return v;
        }
        tracing::warn!("Could not parse direct JSON content, keeping raw content");
    }

    Value::String(content.to_string())
}

fn repair_truncated(json_content: &str) -> String {
    let mut repaired = json_content.trim_end().to_string();

    // Track every unclosed delimiter in opening order; string contents
    // are skipped so braces inside values do not count.
    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in repaired.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                open.pop();
            }
            _ => {}
        }
    }
    if open.is_empty() {
        return repaired;
    }

    if in_string {
        repaired.push('"');
    }
    if repaired.ends_with(',') {
        repaired.pop();
    }
    if repaired.ends_with(':') {
        repaired.push_str(" null");
    }
    // Close in reverse order of opening.
    while let Some(closer) = open.pop() {
        repaired.push(closer);
    }
    repaired
}

/// Write the per-category result files and the processed marker, both
/// under the owning project's namespace.
///
/// Returns `true` when this call created the marker, `false` when the
/// job was already reconciled (the result files are left untouched in
/// that case).
pub async fn persist_results(
    store: &dyn ObjectStore,
    project: &str,
    job_id: &str,
    outcome: &ReconcileOutcome,
) -> Result<bool> {
    let marker_key = keys::processed_marker(project, job_id);
    if store.exists(&marker_key).await? {
        return Ok(false);
    }

    let now = Utc::now();
    for (category, records) in &outcome.by_category {
        let serialized: Vec<Value> = records.iter().map(serialize_record).collect();
        let payload = serde_json::json!({
            "batch_id": job_id,
            "category": category.as_str(),
            "total": records.len(),
            "processed_at": now,
            "records": serialized,
        });
        store
            .put(
                &keys::category_results(project, category.as_str()),
                serde_json::to_vec_pretty(&payload)?.as_slice(),
            )
            .await?;
    }

    let marker = crate::models::ProcessedMarker {
        batch_id: job_id.to_string(),
        processed: true,
        processed_at: now,
        records: outcome.record_count(),
    };
    let created = store
        .put_if_absent(&marker_key, serde_json::to_vec_pretty(&marker)?.as_slice())
        .await?;
    Ok(created)
}

/// Persisted record form: absent content becomes the sentinel string.
fn serialize_record(record: &ReconciledRecord) -> Value {
    serde_json::json!({
        "document": record.document,
        "category": record.category,
        "chunk_index": record.chunk_index,
        "content": record
            .content
            .clone()
            .unwrap_or_else(|| Value::String(NOT_EXTRACTED.to_string())),
        "error": record.error,
    })
}
