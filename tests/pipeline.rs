//! End-to-end pipeline tests over a temporary filesystem store with an
//! in-process batch service double: process → submit → poll → reconcile,
//! the failure path, and the idempotency guarantees.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use docbatch::batch_api::{BatchService, JobState};
use docbatch::config::{BatchConfig, ChunkingConfig, Config, StoreConfig};
use docbatch::models::{ExtractedDocument, JobStatus};
use docbatch::notify::Notifier;
use docbatch::orchestrator::Orchestrator;
use docbatch::pipeline::{content_hash, process_project};
use docbatch::store::{keys, FsStore, ObjectStore};

fn test_config() -> Config {
    Config {
        store: StoreConfig {
            root: Some("/unused".into()),
            s3: None,
        },
        chunking: ChunkingConfig {
            max_tokens: 200,
            overlap_tokens: 20,
        },
        batch: BatchConfig {
            endpoint: "https://example.openai.azure.com".to_string(),
            model: "gpt-4o-2".to_string(),
            api_version: "2025-04-01-preview".to_string(),
            max_completion_tokens: 1000,
            temperature: 0.3,
            completion_window_hours: 24,
            max_retries: 1,
            timeout_secs: 5,
        },
    }
}

/// Service double that accepts one submission, replays scripted status
/// checks, and answers each uploaded request with a canned model output.
struct FakeBatchService {
    statuses: Mutex<VecDeque<JobStatus>>,
    /// custom ids captured from the uploaded JSONL.
    uploaded_ids: Mutex<Vec<String>>,
    jobs_created: Mutex<usize>,
    model_output: String,
}

impl FakeBatchService {
    fn new(statuses: Vec<JobStatus>, model_output: &str) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            uploaded_ids: Mutex::new(Vec::new()),
            jobs_created: Mutex::new(0),
            model_output: model_output.to_string(),
        }
    }
}

#[async_trait]
impl BatchService for FakeBatchService {
    async fn upload_input(&self, jsonl: &str) -> Result<String> {
        let ids = jsonl
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| {
                let v: serde_json::Value = serde_json::from_str(l)?;
                Ok(v["custom_id"]
                    .as_str()
                    .ok_or_else(|| anyhow!("missing custom_id"))?
                    .to_string())
            })
            .collect::<Result<Vec<_>>>()?;
        *self.uploaded_ids.lock().unwrap() = ids;
        Ok("file-in".to_string())
    }

    async fn create_job(&self, _input: &str, window: &str) -> Result<String> {
        assert_eq!(window, "24h");
        let mut n = self.jobs_created.lock().unwrap();
        *n += 1;
        Ok(format!("batch_test_{}", n))
    }

    async fn job_status(&self, _job_id: &str) -> Result<JobState> {
        let status = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted status left"))?;
        Ok(JobState {
            output_file_id: (status == JobStatus::Completed).then(|| "file-out".to_string()),
            status,
        })
    }

    async fn download_output(&self, _file_id: &str) -> Result<String> {
        let lines: Vec<String> = self
            .uploaded_ids
            .lock()
            .unwrap()
            .iter()
            .map(|id| {
                serde_json::json!({
                    "custom_id": id,
                    "response": {
                        "status_code": 200,
                        "body": {"choices": [{"message": {"content": self.model_output}}]}
                    }
                })
                .to_string()
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

struct CountingNotifier(Mutex<Vec<String>>);

#[async_trait]
impl Notifier for CountingNotifier {
    async fn critical(&self, _project: &str, job_id: &str, message: &str) {
        self.0.lock().unwrap().push(format!("{}: {}", job_id, message));
    }
}

async fn seed(store: &FsStore, project: &str, name: &str, text: &str) {
    let doc = ExtractedDocument {
        project: project.to_string(),
        name: name.to_string(),
        text: text.to_string(),
        content_hash: content_hash(text),
    };
    store
        .put(
            &keys::extracted(project, name),
            serde_json::to_vec_pretty(&doc).unwrap().as_slice(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_full_run_submit_poll_reconcile() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path());
    let config = test_config();
    let service = FakeBatchService::new(
        vec![JobStatus::InProgress, JobStatus::Completed],
        "```json\n{\"concepto_final\": \"Favorable\"}\n```",
    );
    let notifier = CountingNotifier(Mutex::new(vec![]));

    seed(&store, "CFA009660", "IXP-2024-001", "Informe de auditoría. Opinión sin salvedades.").await;
    seed(&store, "CFA009660", "ROP-CFA009660", "Reglamento operativo con productos y desembolsos.").await;

    let report = process_project(
        &store, &service, &notifier, &config, "CFA009660", None, None, false,
    )
    .await
    .unwrap();

    // IXP → audit; ROP → product + disbursement; one chunk each.
    assert_eq!(report.documents, 2);
    assert_eq!(report.requests, 3);
    assert!(report.submitted);
    let job_id = report.job_id.unwrap();

    let orchestrator = Orchestrator {
        store: &store,
        service: &service,
        notifier: &notifier,
        config: &config.batch,
    };

    // Tick 1: in flight. Tick 2: completed and reconciled.
    assert_eq!(orchestrator.poll_tick().await.unwrap().in_flight, 1);
    assert_eq!(orchestrator.poll_tick().await.unwrap().completed, 1);

    // One result file per routed category, each record carrying the
    // parsed fenced JSON.
    for category in ["audit", "product", "disbursement"] {
        let data = store
            .get(&keys::category_results("CFA009660", category))
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("missing results for {}", category));
        let parsed: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(parsed["batch_id"], job_id.as_str());
        assert_eq!(parsed["records"][0]["content"]["concepto_final"], "Favorable");
    }
    assert!(store
        .exists(&keys::processed_marker("CFA009660", &job_id))
        .await
        .unwrap());
    assert!(!store.exists(&keys::pending_guard("CFA009660")).await.unwrap());
    assert!(notifier.0.lock().unwrap().is_empty());

    // A further tick does nothing new.
    let quiet = orchestrator.poll_tick().await.unwrap();
    assert_eq!(quiet.completed, 0);
    assert_eq!(quiet.errors, 0);
}

#[tokio::test]
async fn test_failed_job_yields_no_results_and_one_alert() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path());
    let config = test_config();
    let service = FakeBatchService::new(vec![JobStatus::Failed], "");
    let notifier = CountingNotifier(Mutex::new(vec![]));

    seed(&store, "CFA009660", "IXP-2024-001", "Informe de auditoría.").await;

    let report = process_project(
        &store, &service, &notifier, &config, "CFA009660", None, None, false,
    )
    .await
    .unwrap();
    let job_id = report.job_id.unwrap();

    let orchestrator = Orchestrator {
        store: &store,
        service: &service,
        notifier: &notifier,
        config: &config.batch,
    };
    assert_eq!(orchestrator.poll_tick().await.unwrap().dead, 1);

    assert!(store
        .list(&keys::category_results("CFA009660", "audit"))
        .await
        .unwrap()
        .is_empty());
    let alerts = notifier.0.lock().unwrap().clone();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].contains(&job_id));

    // Re-polling stays quiet and the project can submit again.
    orchestrator.poll_tick().await.unwrap();
    assert_eq!(notifier.0.lock().unwrap().len(), 1);
    assert!(!store.exists(&keys::pending_guard("CFA009660")).await.unwrap());
}

#[tokio::test]
async fn test_second_submission_refused_while_in_flight() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path());
    let config = test_config();
    let service = FakeBatchService::new(vec![], "");
    let notifier = CountingNotifier(Mutex::new(vec![]));

    seed(&store, "CFA009660", "IXP-2024-001", "Informe de auditoría.").await;

    let first = process_project(
        &store, &service, &notifier, &config, "CFA009660", None, None, false,
    )
    .await
    .unwrap();
    assert!(first.submitted);

    let second = process_project(
        &store, &service, &notifier, &config, "CFA009660", None, None, false,
    )
    .await
    .unwrap();
    assert!(!second.submitted);
    assert_eq!(second.job_id, first.job_id);
}

#[tokio::test]
async fn test_repolling_completed_job_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path());
    let config = test_config();
    let service = FakeBatchService::new(vec![JobStatus::Completed], "{\"x\": 1}");
    let notifier = CountingNotifier(Mutex::new(vec![]));

    seed(&store, "CFA009660", "IXP-2024-001", "Informe de auditoría.").await;
    process_project(
        &store, &service, &notifier, &config, "CFA009660", None, None, false,
    )
    .await
    .unwrap();

    let orchestrator = Orchestrator {
        store: &store,
        service: &service,
        notifier: &notifier,
        config: &config.batch,
    };
    assert_eq!(orchestrator.poll_tick().await.unwrap().completed, 1);

    let results_key = keys::category_results("CFA009660", "audit");
    let before = store.get(&results_key).await.unwrap().unwrap();
    // Several further ticks leave the results byte-identical.
    orchestrator.poll_tick().await.unwrap();
    orchestrator.poll_tick().await.unwrap();
    let after = store.get(&results_key).await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_two_projects_keep_separate_results() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path());
    let config = test_config();
    let service = FakeBatchService::new(
        vec![JobStatus::Completed, JobStatus::Completed],
        "{\"concepto_final\": \"Favorable\"}",
    );
    let notifier = CountingNotifier(Mutex::new(vec![]));
    let orchestrator = Orchestrator {
        store: &store,
        service: &service,
        notifier: &notifier,
        config: &config.batch,
    };

    seed(&store, "CFA-A", "IXP-A", "Informe de auditoría del proyecto A.").await;
    let a = process_project(&store, &service, &notifier, &config, "CFA-A", None, None, false)
        .await
        .unwrap();
    let job_a = a.job_id.unwrap();
    assert_eq!(orchestrator.poll_tick().await.unwrap().completed, 1);

    seed(&store, "CFA-B", "IXP-B", "Informe de auditoría del proyecto B.").await;
    let b = process_project(&store, &service, &notifier, &config, "CFA-B", None, None, false)
        .await
        .unwrap();
    let job_b = b.job_id.unwrap();
    assert_ne!(job_a, job_b);
    assert_eq!(orchestrator.poll_tick().await.unwrap().completed, 1);

    // Project A's results survive project B's reconciliation.
    let a_results = store
        .get(&keys::category_results("CFA-A", "audit"))
        .await
        .unwrap()
        .unwrap();
    let a_results: serde_json::Value = serde_json::from_slice(&a_results).unwrap();
    assert_eq!(a_results["batch_id"], job_a.as_str());
    assert_eq!(a_results["records"][0]["document"], "IXP-A");

    let b_results = store
        .get(&keys::category_results("CFA-B", "audit"))
        .await
        .unwrap()
        .unwrap();
    let b_results: serde_json::Value = serde_json::from_slice(&b_results).unwrap();
    assert_eq!(b_results["batch_id"], job_b.as_str());
    assert_eq!(b_results["records"][0]["document"], "IXP-B");
}
