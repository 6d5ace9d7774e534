use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cortex_analyst_batch::{
    AnalystConnection, AnalystFailure, Answer, AppError, ExportError, ExportFormat, FailureKind,
    Job, JobError, JobStatus, JobStore, Question, ResultStatus, RetryPolicy, SchedulerSettings,
};
use serde_json::{json, Value as JsonValue};
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

/// 按问题文本返回预设结果，未预设的问题直接成功
#[derive(Default)]
struct ScriptedAnalyst {
    scripts: Mutex<HashMap<String, VecDeque<Result<Answer, AnalystFailure>>>>,
    calls: AtomicUsize,
}

impl ScriptedAnalyst {
    fn script(self, text: &str, outcomes: Vec<Result<Answer, AnalystFailure>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(text.to_string(), outcomes.into());
        self
    }
}

#[async_trait]
impl AnalystConnection for ScriptedAnalyst {
    async fn ask(&self, question_text: &str) -> Result<Answer, AnalystFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(question_text)
            .and_then(|queue| queue.pop_front());
        next.unwrap_or_else(|| Ok(answer_for(question_text)))
    }
}

/// 调用进入后一直等待放行，放行后成功或以网络错误结束
struct GatedAnalyst {
    entered: Notify,
    release: Notify,
    calls: AtomicUsize,
    fail: bool,
}

impl GatedAnalyst {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Notify::new(),
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl AnalystConnection for GatedAnalyst {
    async fn ask(&self, question_text: &str) -> Result<Answer, AnalystFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        self.release.notified().await;
        if self.fail {
            Err(AnalystFailure::network("connection reset"))
        } else {
            Ok(answer_for(question_text))
        }
    }
}

struct ExpiredSession;

#[async_trait]
impl AnalystConnection for ExpiredSession {
    async fn ask(&self, _question_text: &str) -> Result<Answer, AnalystFailure> {
        Err(AnalystFailure::auth("session expired"))
    }

    async fn health_check(&self) -> Result<(), AnalystFailure> {
        Err(AnalystFailure::auth("session expired"))
    }
}

fn answer_for(question_text: &str) -> Answer {
    Answer {
        interpretation: Some(format!("Interpretation of {}", question_text)),
        generated_query: Some("SELECT 1 AS value".to_string()),
        query_output: Some(json!([{ "VALUE": "1" }])),
        api_duration: Duration::from_millis(12),
        query_duration: Some(Duration::from_millis(3)),
        request_id: None,
    }
}

fn questions(texts: &[&str]) -> Vec<Question> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| Question::new((i + 1).to_string(), *text))
        .collect()
}

fn store(lanes: usize) -> JobStore {
    JobStore::new(RetryPolicy::immediate(3), SchedulerSettings::immediate(lanes))
}

async fn wait(store: &JobStore, job_id: &str) -> Job {
    tokio::time::timeout(
        Duration::from_secs(10),
        store.wait_for_terminal(job_id, Duration::from_millis(5)),
    )
    .await
    .expect("job did not reach a terminal state")
    .unwrap()
}

#[tokio::test]
async fn test_semantic_rejection_completes_job_with_errors() {
    let analyst = ScriptedAnalyst::default().script(
        "Q2",
        vec![Err(
            AnalystFailure::semantic("Error 392708: cannot answer").with_code("392708")
        )],
    );
    let analyst = Arc::new(analyst);
    let store = store(1);

    let job_id = store
        .create(questions(&["Q1", "Q2", "Q3"]), analyst.clone())
        .await;
    let job = wait(&store, &job_id).await;

    assert_eq!(job.status(), JobStatus::CompletedWithErrors);
    assert_eq!(job.total(), 3);
    assert_eq!(job.succeeded(), 2);
    assert_eq!(job.failed(), 1);
    assert_eq!(job.semantic_rejections(), 1);
    assert_eq!(job.current_index(), 3);
    assert_eq!(job.progress_percent(), 100.0);
    // 语义错误不重试
    assert_eq!(analyst.calls.load(Ordering::SeqCst), 3);

    let rejected = job.result("2").unwrap();
    assert_eq!(rejected.status, ResultStatus::Failed);
    assert_eq!(rejected.failure_kind, Some(FailureKind::SemanticError));
    assert_eq!(rejected.attempt_count, 1);
}

#[tokio::test]
async fn test_transient_failures_are_retried_until_success() {
    let flaky = || {
        vec![
            Err(AnalystFailure::network("connection reset")),
            Err(AnalystFailure::network("connection reset")),
        ]
    };
    let analyst = ScriptedAnalyst::default()
        .script("Q1", flaky())
        .script("Q2", flaky());
    let store = store(2);

    let job_id = store
        .create(questions(&["Q1", "Q2"]), Arc::new(analyst))
        .await;
    let job = wait(&store, &job_id).await;

    assert_eq!(job.status(), JobStatus::Completed);
    for result in job.ordered_results() {
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(result.attempt_count, 3);
    }
}

#[tokio::test]
async fn test_exhausted_retries_record_failure_without_failing_job() {
    let analyst = ScriptedAnalyst::default().script(
        "Q1",
        (0..4).map(|_| Err(AnalystFailure::server("HTTP 503"))).collect(),
    );
    let store = store(1);

    let job_id = store
        .create(questions(&["Q1", "Q2"]), Arc::new(analyst))
        .await;
    let job = wait(&store, &job_id).await;

    assert_eq!(job.status(), JobStatus::CompletedWithErrors);
    let failed = job.result("1").unwrap();
    assert_eq!(failed.attempt_count, 4);
    assert_eq!(failed.failure_kind, Some(FailureKind::TransientServer));
    assert!(job.result("2").unwrap().is_success());
}

#[tokio::test]
async fn test_export_follows_submission_order() {
    let store = store(4);
    let texts = ["Q1", "Q2", "Q3", "Q4", "Q5", "Q6"];

    let job_id = store
        .create(questions(&texts), Arc::new(ScriptedAnalyst::default()))
        .await;
    let job = wait(&store, &job_id).await;
    assert_eq!(job.status(), JobStatus::Completed);

    let bytes = assert_ok!(store.export(&job_id, ExportFormat::Json).await);
    let records: JsonValue = serde_json::from_slice(&bytes).unwrap();
    let ids: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["question_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5", "6"]);
    assert_eq!(records[0]["question"], "Q1");
    assert_eq!(records[0]["interpretation"], "Interpretation of Q1");
    assert_eq!(records[0]["api_duration_ms"], 12);

    let csv = assert_ok!(store.export(&job_id, ExportFormat::Csv).await);
    let mut reader = csv::Reader::from_reader(csv.as_slice());
    let ids: Vec<String> = reader
        .records()
        .map(|r| r.unwrap()[0].to_string())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5", "6"]);
}

#[tokio::test]
async fn test_export_of_running_job_is_not_ready() {
    let analyst = Arc::new(GatedAnalyst::new());
    let store = store(1);

    let job_id = store.create(questions(&["Q1"]), analyst.clone()).await;
    analyst.entered.notified().await;

    let err = assert_err!(store.export(&job_id, ExportFormat::Csv).await);
    assert!(matches!(
        err,
        AppError::Export(ExportError::NotReady {
            status: JobStatus::Running,
            ..
        })
    ));

    analyst.release.notify_one();
    let job = wait(&store, &job_id).await;
    assert_eq!(job.status(), JobStatus::Completed);
    assert_ok!(store.export(&job_id, ExportFormat::Csv).await);
}

#[tokio::test]
async fn test_deleting_running_job_stops_dispatch() {
    let analyst = Arc::new(GatedAnalyst::new());
    let store = store(1);

    let job_id = store
        .create(questions(&["Q1", "Q2", "Q3"]), analyst.clone())
        .await;
    analyst.entered.notified().await;

    let running = store.get(&job_id).await.unwrap();
    assert_eq!(running.status(), JobStatus::Running);

    assert_ok!(store.delete(&job_id).await);
    assert!(store.list().await.is_empty());
    assert_eq!(
        store.get(&job_id).await.unwrap_err(),
        JobError::NotFound {
            job_id: job_id.clone()
        }
    );

    // 放行正在进行的调用，之后不应再有新的调用
    analyst.release.notify_one();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(analyst.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let store = store(1);

    assert!(matches!(
        store.get("missing").await,
        Err(JobError::NotFound { .. })
    ));
    assert!(matches!(
        store.delete("missing").await,
        Err(JobError::NotFound { .. })
    ));
    assert!(matches!(
        store.export("missing", ExportFormat::Json).await,
        Err(AppError::Job(JobError::NotFound { .. }))
    ));
}

#[tokio::test]
async fn test_empty_input_fails_job() {
    let store = store(1);

    let job_id = store
        .create(Vec::new(), Arc::new(ScriptedAnalyst::default()))
        .await;
    let job = wait(&store, &job_id).await;

    assert_eq!(job.status(), JobStatus::Failed);
    assert_eq!(job.total(), 0);
    assert!(job.error().is_some());
    assert!(store.export(&job_id, ExportFormat::Json).await.is_err());
}

#[tokio::test]
async fn test_failed_health_check_fails_job_before_any_question() {
    let store = store(1);

    let job_id = store
        .create(questions(&["Q1", "Q2"]), Arc::new(ExpiredSession))
        .await;
    let job = wait(&store, &job_id).await;

    assert_eq!(job.status(), JobStatus::Failed);
    assert!(job.results().is_empty());
    assert!(job.error().unwrap().contains("session expired"));
}

#[tokio::test]
async fn test_list_reports_every_job_in_creation_order() {
    let store = store(1);
    let analyst = Arc::new(ScriptedAnalyst::default());

    let first = store.create(questions(&["Q1"]), analyst.clone()).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = store.create(questions(&["Q1", "Q2"]), analyst).await;
    wait(&store, &first).await;
    wait(&store, &second).await;

    let summaries = store.list().await;
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].job_id, first);
    assert_eq!(summaries[1].job_id, second);
    assert_eq!(summaries[1].total, 2);
    assert_eq!(summaries[1].status, JobStatus::Completed);
    assert_eq!(summaries[1].progress_percent, 100.0);
}

#[tokio::test]
async fn test_deleted_job_stops_retrying_failed_question() {
    let analyst = Arc::new(GatedAnalyst::failing());
    let store = store(1);

    let job_id = store.create(questions(&["Q1"]), analyst.clone()).await;
    analyst.entered.notified().await;

    assert_ok!(store.delete(&job_id).await);
    analyst.release.notify_one();

    // 失败可重试，但作业已删除，不应再发起新的调用
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(analyst.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_held_job_does_not_block_other_jobs() {
    let gated = Arc::new(GatedAnalyst::new());
    let store = store(1);

    let held = store.create(questions(&["A1"]), gated.clone()).await;
    gated.entered.notified().await;

    let free = store
        .create(questions(&["B1", "B2"]), Arc::new(ScriptedAnalyst::default()))
        .await;
    let finished = wait(&store, &free).await;
    assert_eq!(finished.status(), JobStatus::Completed);

    let quick = Duration::from_millis(500);
    let held_job = tokio::time::timeout(quick, store.get(&held))
        .await
        .expect("get blocked by a running job")
        .unwrap();
    assert_eq!(held_job.status(), JobStatus::Running);
    assert_eq!(held_job.current_index(), 0);

    let summaries = tokio::time::timeout(quick, store.list())
        .await
        .expect("list blocked by a running job");
    assert_eq!(summaries.len(), 2);

    gated.release.notify_one();
    assert_eq!(wait(&store, &held).await.status(), JobStatus::Completed);
}
