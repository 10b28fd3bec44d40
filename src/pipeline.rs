//! Trigger handling and the process pipeline.
//!
//! The entry point a queue message (or the `process` command) lands on:
//! locate extracted documents for a project, chunk whatever is not yet
//! chunked, persist the chunks, build one batch of requests across all
//! documents, and hand it to the orchestrator.
//!
//! Chunking is skipped for a document whose first stored chunk carries
//! the same source hash as the current extraction; a re-extracted
//! document (different hash) is re-chunked and its chunks overwritten.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::address::RequestAddress;
use crate::batch_api::BatchService;
use crate::categories::Category;
use crate::chunker::chunk_document;
use crate::config::Config;
use crate::models::{Chunk, ExtractedDocument, StoredChunk, TriggerMessage};
use crate::notify::Notifier;
use crate::orchestrator::{Orchestrator, SubmitOutcome};
use crate::request::{build_requests, BatchRequestLine};
use crate::store::{keys, ObjectStore};

/// Counters from one processing run.
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub documents: usize,
    pub chunked: usize,
    pub skipped: usize,
    pub requests: usize,
    /// Job id of the submitted (or already pending) job; `None` on a
    /// dry run or when nothing routed to any category.
    pub job_id: Option<String>,
    pub submitted: bool,
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Validate and act on one trigger message.
pub async fn handle_trigger(
    store: &dyn ObjectStore,
    service: &dyn BatchService,
    notifier: &dyn Notifier,
    config: &Config,
    message: &TriggerMessage,
) -> Result<ProcessReport> {
    if message.project_name.trim().is_empty() {
        bail!("Trigger message missing project_name");
    }
    if message.queue_type.trim().is_empty() {
        bail!("Trigger message missing queue_type");
    }
    let category = message
        .category
        .as_deref()
        .map(Category::parse)
        .transpose()
        .context("Invalid category in trigger message")?;

    tracing::info!(
        project = %message.project_name,
        queue_type = %message.queue_type,
        document = message.document_name.as_deref(),
        "Trigger received"
    );

    process_project(
        store,
        service,
        notifier,
        config,
        &message.project_name,
        message.document_name.as_deref(),
        category,
        false,
    )
    .await
}

/// Run the pipeline for one project: chunk, build requests, submit.
///
/// With `dry_run`, everything up to submission runs (including chunk
/// persistence) and the report carries the counts; no job is created.
#[allow(clippy::too_many_arguments)]
pub async fn process_project(
    store: &dyn ObjectStore,
    service: &dyn BatchService,
    notifier: &dyn Notifier,
    config: &Config,
    project: &str,
    document: Option<&str>,
    category: Option<Category>,
    dry_run: bool,
) -> Result<ProcessReport> {
    let mut report = ProcessReport::default();
    let mut lines: Vec<BatchRequestLine> = Vec::new();

    for doc in load_extracted(store, project, document).await? {
        report.documents += 1;
        let chunks = chunk_or_reuse(store, config, &doc, &mut report).await?;
        lines.extend(build_requests(project, &doc.name, &chunks, &config.batch)?);
    }

    if report.documents == 0 {
        bail!(
            "No extracted documents found for project '{}'{}",
            project,
            document.map(|d| format!(" and document '{}'", d)).unwrap_or_default()
        );
    }

    if let Some(wanted) = category {
        lines.retain(|line| {
            RequestAddress::decode(&line.custom_id)
                .map(|a| a.category == wanted)
                .unwrap_or(false)
        });
    }
    report.requests = lines.len();

    if lines.is_empty() {
        tracing::info!(project, "No document routed to any category, nothing to submit");
        return Ok(report);
    }
    if dry_run {
        tracing::info!(project, requests = report.requests, "Dry run, not submitting");
        return Ok(report);
    }

    let orchestrator = Orchestrator {
        store,
        service,
        notifier,
        config: &config.batch,
    };
    match orchestrator.submit_batch(project, &lines).await? {
        SubmitOutcome::Submitted(info) => {
            report.job_id = Some(info.job_id);
            report.submitted = true;
        }
        SubmitOutcome::AlreadyPending { job_id } => {
            report.job_id = job_id;
        }
    }
    Ok(report)
}

/// Read extraction output for a project, optionally one document.
async fn load_extracted(
    store: &dyn ObjectStore,
    project: &str,
    document: Option<&str>,
) -> Result<Vec<ExtractedDocument>> {
    let mut docs = Vec::new();
    for key in store.list(&keys::extracted_prefix(project)).await? {
        let Some(data) = store.get(&key).await? else {
            continue;
        };
        let mut doc: ExtractedDocument = serde_json::from_slice(&data)
            .with_context(|| format!("Corrupt extracted document at '{}'", key))?;
        if doc.project != project {
            continue;
        }
        if let Some(wanted) = document {
            if doc.name != wanted {
                continue;
            }
        }
        if doc.content_hash.is_empty() {
            doc.content_hash = content_hash(&doc.text);
        }
        docs.push(doc);
    }
    docs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(docs)
}

/// Reuse stored chunks when the source hash matches, otherwise chunk
/// fresh and persist.
async fn chunk_or_reuse(
    store: &dyn ObjectStore,
    config: &Config,
    doc: &ExtractedDocument,
    report: &mut ProcessReport,
) -> Result<Vec<Chunk>> {
    if let Some(data) = store.get(&keys::chunk(&doc.project, &doc.name, 0)).await? {
        let first: StoredChunk = serde_json::from_slice(&data)
            .with_context(|| format!("Corrupt stored chunk for '{}'", doc.name))?;
        if first.source_hash == doc.content_hash {
            report.skipped += 1;
            tracing::debug!(document = %doc.name, "Chunks up to date, reusing");
            return load_chunks(store, &doc.project, &doc.name).await;
        }
        tracing::info!(document = %doc.name, "Source changed, re-chunking");
    }

    let chunks = chunk_document(
        &doc.name,
        &doc.text,
        config.chunking.max_tokens,
        config.chunking.overlap_tokens,
    );
    let now = Utc::now();
    for chunk in &chunks {
        let stored = StoredChunk {
            document: chunk.document.clone(),
            chunk_index: chunk.index,
            content: chunk.text.clone(),
            tokens: chunk.tokens,
            overlap_tokens: chunk.overlap_tokens,
            source_hash: doc.content_hash.clone(),
            total_chunks: chunks.len(),
            created_at: now,
        };
        store
            .put(
                &keys::chunk(&doc.project, &chunk.document, chunk.index),
                serde_json::to_vec_pretty(&stored)?.as_slice(),
            )
            .await?;
    }
    report.chunked += 1;
    tracing::info!(document = %doc.name, chunks = chunks.len(), "Document chunked");
    Ok(chunks)
}

/// Load all persisted chunks of a document, in index order.
async fn load_chunks(
    store: &dyn ObjectStore,
    project: &str,
    document: &str,
) -> Result<Vec<Chunk>> {
    let mut chunks = Vec::new();
    for key in store.list(&keys::chunk_prefix(project, document)).await? {
        let Some(data) = store.get(&key).await? else {
            continue;
        };
        let stored: StoredChunk = serde_json::from_slice(&data)
            .with_context(|| format!("Corrupt stored chunk at '{}'", key))?;
        chunks.push(Chunk {
            document: stored.document,
            index: stored.chunk_index,
            text: stored.content,
            tokens: stored.tokens,
            overlap_tokens: stored.overlap_tokens,
        });
    }
    chunks.sort_by_key(|c| c.index);
    Ok(chunks)
}
