//! 单题执行流程 - 流程层
//!
//! 核心职责：定义"一道题"的完整处理流程
//!
//! 流程顺序：
//! 1. 调用远程分析接口（带单次尝试时限）
//! 2. 失败时询问重试策略，需要则等待后再试
//! 3. 成功、放弃或作业被取消时生成 `QuestionResult`
//!
//! 所有失败路径都以结果结束，不会把错误抛给调度器。

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::clients::{AnalystConnection, AnalystFailure};
use crate::models::{Question, QuestionResult};
use crate::services::{RetryDecision, RetryPolicy};
use crate::utils::logging::truncate_text;
use crate::workflow::question_ctx::QuestionCtx;

/// 单题执行器
///
/// - 不持有连接，每次调用时由调度器传入
/// - 只处理单个 Question
/// - 不关心作业状态和计数
#[derive(Debug, Clone)]
pub struct QuestionRunner {
    retry_policy: RetryPolicy,
    /// 单次尝试（问题调用 + SQL 执行）的总时限
    attempt_timeout: Duration,
}

impl QuestionRunner {
    pub fn new(retry_policy: RetryPolicy, attempt_timeout: Duration) -> Self {
        Self {
            retry_policy,
            attempt_timeout,
        }
    }

    /// 执行一道题，直到成功、放弃或被取消
    ///
    /// `cancelled` 在每次重试等待前后检查，置位后不再发起新的调用，
    /// 以最后一次失败作为结果。
    pub async fn run(
        &self,
        question: &Question,
        connection: &dyn AnalystConnection,
        ctx: &QuestionCtx,
        cancelled: &AtomicBool,
    ) -> QuestionResult {
        let started = Instant::now();
        info!("{} 问题: {}", ctx, truncate_text(&question.text, 80));

        if question.text.trim().is_empty() {
            let failure = AnalystFailure::semantic("question text is empty");
            warn!("{} ⚠️ 题目为空，跳过调用", ctx);
            return QuestionResult::failed(question, &failure, 0, started.elapsed());
        }

        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            debug!("{} 第 {} 次调用", ctx, attempts);

            let outcome =
                match timeout(self.attempt_timeout, connection.ask(&question.text)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(AnalystFailure::timeout(self.attempt_timeout)),
                };

            let failure = match outcome {
                Ok(answer) => {
                    info!(
                        "{} ✓ 成功 (第 {} 次调用, 接口耗时 {}ms, request_id={})",
                        ctx,
                        attempts,
                        answer.api_duration.as_millis(),
                        answer.request_id.as_deref().unwrap_or("-")
                    );
                    return QuestionResult::success(question, answer, attempts, started.elapsed());
                }
                Err(failure) => failure,
            };

            let delay = match self.retry_policy.decide(failure.kind, attempts) {
                RetryDecision::RetryAfter(delay) => delay,
                RetryDecision::GiveUp => {
                    error!("{} ❌ 放弃: {} (共调用 {} 次)", ctx, failure, attempts);
                    return QuestionResult::failed(question, &failure, attempts, started.elapsed());
                }
            };

            if cancelled.load(Ordering::SeqCst) {
                warn!("{} 🛑 作业已取消，不再重试: {}", ctx, failure);
                return QuestionResult::failed(question, &failure, attempts, started.elapsed());
            }

            warn!(
                "{} ⚠️ 调用失败 ({}), {:?} 后重试 ({}/{})",
                ctx,
                failure,
                delay,
                attempts,
                self.retry_policy.max_retries()
            );
            sleep(delay).await;

            if cancelled.load(Ordering::SeqCst) {
                warn!("{} 🛑 作业已取消，不再重试: {}", ctx, failure);
                return QuestionResult::failed(question, &failure, attempts, started.elapsed());
            }
        }
    }
}
