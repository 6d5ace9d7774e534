//! 作业存储 - 编排层
//!
//! 进程内的作业表：创建作业并交给调度器在后台执行，提供查询、列表、删除和导出。
//!
//! - 作业表用读写锁保护，每个作业另有一把锁，不同作业之间互不阻塞
//! - 对外返回的都是快照，调用方拿不到可变引用
//! - 删除会先发出取消信号，正在执行的题目结束后结果被丢弃

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::info;
use uuid::Uuid;

use crate::clients::AnalystConnection;
use crate::config::Config;
use crate::error::{AppResult, JobError};
use crate::models::{Job, JobSummary, Question};
use crate::orchestrator::scheduler::{self, JobEntry, SchedulerSettings};
use crate::services::{exporter, ExportFormat, RetryPolicy};
use crate::utils::logging;
use crate::workflow::QuestionRunner;

/// 作业存储
#[derive(Debug)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, Arc<JobEntry>>>,
    runner: QuestionRunner,
    settings: SchedulerSettings,
}

impl JobStore {
    pub fn new(retry_policy: RetryPolicy, settings: SchedulerSettings) -> Self {
        let runner = QuestionRunner::new(retry_policy, settings.attempt_timeout);
        Self {
            jobs: RwLock::new(HashMap::new()),
            runner,
            settings,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.retry_policy(), config.scheduler_settings())
    }

    /// 创建作业并立即在后台开始执行，返回作业 Id
    ///
    /// 输入问题（空列表、Id 重复）和连接问题不会在这里报错，
    /// 而是体现在作业的 `failed` 状态上。
    pub async fn create(
        &self,
        questions: Vec<Question>,
        connection: Arc<dyn AnalystConnection>,
    ) -> String {
        let job_id = Uuid::new_v4().to_string();
        let total = questions.len();
        let entry = Arc::new(JobEntry::new(Job::new(job_id.clone(), questions)));

        self.jobs
            .write()
            .await
            .insert(job_id.clone(), Arc::clone(&entry));
        logging::log_job_created(&job_id, total);

        tokio::spawn(scheduler::run_job(
            entry,
            connection,
            self.runner.clone(),
            self.settings.clone(),
        ));

        job_id
    }

    /// 获取作业快照
    pub async fn get(&self, job_id: &str) -> Result<Job, JobError> {
        let entry = self.entry(job_id).await?;
        let job = entry.job.lock().await;
        Ok(job.clone())
    }

    /// 所有作业的摘要，按创建时间排序
    pub async fn list(&self) -> Vec<JobSummary> {
        let entries: Vec<Arc<JobEntry>> = self.jobs.read().await.values().cloned().collect();

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            summaries.push(entry.job.lock().await.summary());
        }
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        summaries
    }

    /// 删除作业；运行中的作业会被取消
    pub async fn delete(&self, job_id: &str) -> Result<(), JobError> {
        let entry = self
            .jobs
            .write()
            .await
            .remove(job_id)
            .ok_or_else(|| JobError::NotFound {
                job_id: job_id.to_string(),
            })?;

        entry.cancel().await;
        info!("[作业 {}] 🗑️ 已删除", job_id);
        Ok(())
    }

    /// 导出已完成作业的结果
    pub async fn export(&self, job_id: &str, format: ExportFormat) -> AppResult<Vec<u8>> {
        let job = self.get(job_id).await?;
        Ok(exporter::export(&job, format)?)
    }

    /// 轮询直到作业进入终态，返回终态快照
    ///
    /// 作业在等待期间被删除时返回 `NotFound`。
    pub async fn wait_for_terminal(
        &self,
        job_id: &str,
        poll_interval: Duration,
    ) -> Result<Job, JobError> {
        loop {
            let job = self.get(job_id).await?;
            if job.is_terminal() {
                return Ok(job);
            }
            sleep(poll_interval).await;
        }
    }

    async fn entry(&self, job_id: &str) -> Result<Arc<JobEntry>, JobError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::NotFound {
                job_id: job_id.to_string(),
            })
    }
}
