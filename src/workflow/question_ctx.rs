//! 题目处理上下文
//!
//! 封装"我正在处理哪个作业的第几题"这一信息，仅用于日志

use std::fmt::Display;

/// 题目处理上下文
#[derive(Debug, Clone)]
pub struct QuestionCtx {
    /// 作业ID
    pub job_id: String,

    /// 题目在作业中的位置（从1开始）
    pub position: usize,

    /// 作业题目总数
    pub total: usize,

    /// 处理该题的通道编号
    pub lane: usize,
}

impl QuestionCtx {
    /// 创建新的题目上下文
    pub fn new(job_id: impl Into<String>, position: usize, total: usize, lane: usize) -> Self {
        Self {
            job_id: job_id.into(),
            position,
            total,
            lane,
        }
    }

    /// 日志中使用的短作业ID
    pub fn short_job_id(&self) -> &str {
        self.job_id.get(..8).unwrap_or(&self.job_id)
    }
}

impl Display for QuestionCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[作业 {} 题目 {}/{} 通道#{}]",
            self.short_job_id(),
            self.position,
            self.total,
            self.lane
        )
    }
}
