//! 重试策略 - 业务能力层
//!
//! 只负责回答"这次失败要不要再试、等多久"，不发起调用。

use std::time::Duration;

use serde::Deserialize;

use crate::clients::FailureKind;

/// 重试间隔的增长方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// 每次等待相同时间
    Fixed,
    /// 第 n 次重试等待 n 倍基础间隔
    Linear,
}

impl Backoff {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fixed" => Some(Backoff::Fixed),
            "linear" => Some(Backoff::Linear),
            _ => None,
        }
    }
}

/// 重试决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// 重试策略
///
/// 只有临时性失败（网络、服务端）会重试，最多 `max_retries` 次，
/// 即单题最多 `max_retries + 1` 次调用。语义错误和认证错误立即放弃。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5), Backoff::Linear)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, backoff: Backoff) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff,
        }
    }

    /// 不等待的策略，测试和本地调试使用
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO, Backoff::Fixed)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// 根据失败类型和已完成的调用次数（从 1 开始）做决定
    pub fn decide(&self, kind: FailureKind, attempts_made: u32) -> RetryDecision {
        if !kind.is_transient() || attempts_made > self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay_for(attempts_made))
    }

    fn delay_for(&self, attempts_made: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Linear => self.base_delay.saturating_mul(attempts_made.max(1)),
        }
    }
}
