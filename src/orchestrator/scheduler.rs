//! 作业调度器 - 编排层
//!
//! ## 职责
//!
//! 驱动单个作业内所有题目的执行：
//!
//! 1. **启动检查**：空输入、Id 重复、连接不可用时直接把作业标记为 `failed`
//! 2. **并发控制**：固定数量的通道（lane）从共享队列取题，连接不支持并发时退化为单通道
//! 3. **限流**：同一通道上相邻两题之间等待固定间隔；连续失败达到阈值后整体暂停
//! 4. **结果写入**：每题结束后通过作业锁写入结果，作业进入终态后写入被拒绝
//! 5. **取消**：每次取题前和每次重试前检查取消标记，不会打断正在进行的远程调用

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::clients::AnalystConnection;
use crate::error::JobError;
use crate::models::{Job, Question};
use crate::utils::logging;
use crate::workflow::{QuestionCtx, QuestionRunner};

/// 调度参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// 每个作业的通道数量
    pub max_concurrent_questions: usize,
    /// 同一通道上相邻两题之间的间隔
    pub delay_between_requests: Duration,
    /// 连续失败多少题后暂停，0 表示不暂停
    pub consecutive_failure_threshold: usize,
    pub throttle_pause: Duration,
    /// 单题单次尝试的总时限
    pub attempt_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_questions: 1,
            delay_between_requests: Duration::from_secs(5),
            consecutive_failure_threshold: 3,
            throttle_pause: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(1800),
        }
    }
}

impl SchedulerSettings {
    /// 不做任何等待的设置，测试和本地调试使用
    pub fn immediate(max_concurrent_questions: usize) -> Self {
        Self {
            max_concurrent_questions,
            delay_between_requests: Duration::ZERO,
            consecutive_failure_threshold: 0,
            throttle_pause: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// 作业存储中的一项：作业本身（每个作业一把锁）和取消标记
#[derive(Debug)]
pub(crate) struct JobEntry {
    pub(crate) job: Mutex<Job>,
    cancelled: AtomicBool,
}

impl JobEntry {
    pub(crate) fn new(job: Job) -> Self {
        Self {
            job: Mutex::new(job),
            cancelled: AtomicBool::new(false),
        }
    }

    /// 发出取消信号并把作业置为 `cancelled`（已结束的作业保持原状态）
    pub(crate) async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.job.lock().await.mark_cancelled();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_flag(&self) -> &AtomicBool {
        &self.cancelled
    }
}

/// 各通道共享的只读上下文
struct LaneShared<'a> {
    job_id: &'a str,
    total: usize,
    entry: &'a JobEntry,
    connection: &'a dyn AnalystConnection,
    runner: &'a QuestionRunner,
    settings: &'a SchedulerSettings,
    queue: &'a Mutex<VecDeque<(usize, Question)>>,
    consecutive_failures: &'a AtomicUsize,
}

/// 执行一个作业直到结束或被取消
pub(crate) async fn run_job(
    entry: Arc<JobEntry>,
    connection: Arc<dyn AnalystConnection>,
    runner: QuestionRunner,
    settings: SchedulerSettings,
) {
    let (job_id, questions) = {
        let job = entry.job.lock().await;
        (job.job_id().to_string(), job.questions().to_vec())
    };

    // ========== 启动检查 ==========
    if let Some(reason) = setup_failure(&questions) {
        fail_job(&entry, &job_id, reason).await;
        return;
    }

    if let Err(e) = connection.health_check().await {
        fail_job(&entry, &job_id, format!("连接不可用: {}", e)).await;
        return;
    }

    {
        let mut job = entry.job.lock().await;
        if let Err(e) = job.mark_running() {
            // 启动前已被取消
            debug!("[作业 {}] 未启动: {}", job_id, e);
            return;
        }
    }

    let total = questions.len();
    let lanes = lane_count(&settings, connection.as_ref(), total);
    logging::log_job_started(&job_id, total, lanes);

    let queue = Mutex::new(questions.into_iter().enumerate().collect::<VecDeque<_>>());
    let consecutive_failures = AtomicUsize::new(0);
    let shared = LaneShared {
        job_id: &job_id,
        total,
        entry: &entry,
        connection: connection.as_ref(),
        runner: &runner,
        settings: &settings,
        queue: &queue,
        consecutive_failures: &consecutive_failures,
    };

    join_all((0..lanes).map(|lane| run_lane(&shared, lane))).await;

    let job = entry.job.lock().await;
    if entry.is_cancelled() {
        info!("[作业 {}] 🛑 已取消，停止调度", job_id);
    } else {
        logging::log_job_finished(&job);
    }
}

/// 一个通道：循环取题、执行、写入结果
async fn run_lane(shared: &LaneShared<'_>, lane: usize) {
    let mut dispatched = 0usize;

    loop {
        if shared.entry.is_cancelled() {
            break;
        }

        let next = shared.queue.lock().await.pop_front();
        let Some((index, question)) = next else {
            break;
        };

        if dispatched > 0 && !shared.settings.delay_between_requests.is_zero() {
            sleep(shared.settings.delay_between_requests).await;
        }

        let threshold = shared.settings.consecutive_failure_threshold;
        if threshold > 0 && shared.consecutive_failures.load(Ordering::SeqCst) >= threshold {
            shared.consecutive_failures.store(0, Ordering::SeqCst);
            warn!(
                "[作业 {}] ⏸️ 连续 {} 题失败，暂停 {:?}",
                shared.job_id, threshold, shared.settings.throttle_pause
            );
            sleep(shared.settings.throttle_pause).await;
        }

        // 等待期间可能已被取消
        if shared.entry.is_cancelled() {
            break;
        }

        dispatched += 1;
        let ctx = QuestionCtx::new(shared.job_id, index + 1, shared.total, lane);
        let result = shared
            .runner
            .run(&question, shared.connection, &ctx, shared.entry.cancel_flag())
            .await;

        if result.is_success() {
            shared.consecutive_failures.store(0, Ordering::SeqCst);
        } else {
            shared.consecutive_failures.fetch_add(1, Ordering::SeqCst);
        }

        let mut job = shared.entry.job.lock().await;
        match job.record_result(result) {
            Ok(()) => logging::log_progress(&job),
            Err(JobError::Terminal { status, .. }) => {
                debug!("{} 作业已结束 ({})，丢弃结果", ctx, status);
                break;
            }
            Err(e) => {
                error!("{} 结果写入失败: {}", ctx, e);
            }
        }
    }
}

/// 作业级启动失败原因
fn setup_failure(questions: &[Question]) -> Option<String> {
    if questions.is_empty() {
        return Some("没有可处理的题目".to_string());
    }

    let mut seen = HashSet::new();
    for question in questions {
        if !seen.insert(question.id.as_str()) {
            return Some(format!("题目 Id 重复: {}", question.id));
        }
    }

    None
}

fn lane_count(settings: &SchedulerSettings, connection: &dyn AnalystConnection, total: usize) -> usize {
    let requested = settings.max_concurrent_questions.max(1);
    let lanes = if connection.supports_concurrent_calls() {
        requested
    } else {
        if requested > 1 {
            warn!("连接不支持并发调用，通道数从 {} 降为 1", requested);
        }
        1
    };
    lanes.min(total.max(1))
}

async fn fail_job(entry: &JobEntry, job_id: &str, reason: String) {
    error!("[作业 {}] ❌ 作业失败: {}", job_id, reason);
    let mut job = entry.job.lock().await;
    if let Err(e) = job.mark_failed(reason) {
        debug!("[作业 {}] 无法标记失败: {}", job_id, e);
    }
}
