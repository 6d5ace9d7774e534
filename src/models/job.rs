//! 作业模型
//!
//! 一次上传对应一个作业：有序题目列表、按题目 ID 索引的结果、计数器和状态。
//! 作业的字段只能通过本模块的状态转换方法修改，调用方只持有快照。

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::models::question::{Question, QuestionResult};

/// 作业状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// 终态之后不再接受任何写入
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::CompletedWithErrors
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }

    /// 所有题目都已有结果（可以导出）
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::CompletedWithErrors)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 作业
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    job_id: String,
    status: JobStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error: Option<String>,
    questions: Vec<Question>,
    results: HashMap<String, QuestionResult>,
    total: usize,
    succeeded: usize,
    failed: usize,
    semantic_rejections: usize,
    current_index: usize,
}

/// 作业摘要（列表接口使用，不含结果明细）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub semantic_rejections: usize,
    pub current_index: usize,
    pub progress_percent: f64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, questions: Vec<Question>) -> Self {
        let total = questions.len();
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            questions,
            results: HashMap::new(),
            total,
            succeeded: 0,
            failed: 0,
            semantic_rejections: 0,
            current_index: 0,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// 作业级失败原因
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// 按提交顺序排列的题目
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn results(&self) -> &HashMap<String, QuestionResult> {
        &self.results
    }

    pub fn result(&self, question_id: &str) -> Option<&QuestionResult> {
        self.results.get(question_id)
    }

    /// 按提交顺序（而不是完成顺序）返回已有的结果
    pub fn ordered_results(&self) -> Vec<&QuestionResult> {
        self.questions
            .iter()
            .filter_map(|q| self.results.get(&q.id))
            .collect()
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn semantic_rejections(&self) -> usize {
        self.semantic_rejections
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let percent = self.current_index as f64 / self.total as f64 * 100.0;
        (percent * 10.0).round() / 10.0
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id.clone(),
            status: self.status,
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            semantic_rejections: self.semantic_rejections,
            current_index: self.current_index,
            progress_percent: self.progress_percent(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            error: self.error.clone(),
        }
    }

    // ========== 状态转换（仅调度器经由作业存储调用） ==========

    pub(crate) fn mark_running(&mut self) -> Result<(), JobError> {
        if self.status != JobStatus::Pending {
            return Err(self.invalid_transition(JobStatus::Running));
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// 记录一道题的最终结果；最后一道题写入后进入完成状态
    pub(crate) fn record_result(&mut self, result: QuestionResult) -> Result<(), JobError> {
        if self.status.is_terminal() {
            return Err(JobError::Terminal {
                job_id: self.job_id.clone(),
                status: self.status,
            });
        }
        if self.status != JobStatus::Running {
            return Err(self.invalid_transition(JobStatus::Running));
        }
        if !self.questions.iter().any(|q| q.id == result.question_id) {
            return Err(JobError::UnknownQuestion {
                job_id: self.job_id.clone(),
                question_id: result.question_id,
            });
        }
        if self.results.contains_key(&result.question_id) {
            return Err(JobError::AlreadyRecorded {
                job_id: self.job_id.clone(),
                question_id: result.question_id,
            });
        }

        if result.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            if result.is_semantic_rejection() {
                self.semantic_rejections += 1;
            }
        }
        self.results.insert(result.question_id.clone(), result);
        self.current_index += 1;

        if self.current_index == self.total {
            self.status = if self.failed == 0 {
                JobStatus::Completed
            } else {
                JobStatus::CompletedWithErrors
            };
            self.completed_at = Some(Utc::now());
        }

        Ok(())
    }

    /// 整个作业在开始答题前失败（空输入、连接不可用等）
    pub(crate) fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), JobError> {
        let allowed = matches!(self.status, JobStatus::Pending | JobStatus::Running)
            && self.results.is_empty();
        if !allowed {
            return Err(self.invalid_transition(JobStatus::Failed));
        }
        self.status = JobStatus::Failed;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// 取消尚未结束的作业，已结束的作业保持原状态
    pub(crate) fn mark_cancelled(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        true
    }

    fn invalid_transition(&self, to: JobStatus) -> JobError {
        JobError::InvalidTransition {
            job_id: self.job_id.clone(),
            from: self.status,
            to,
        }
    }
}
