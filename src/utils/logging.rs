//! 日志工具模块
//!
//! 提供日志初始化以及格式化输出的辅助函数

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::{Job, JobStatus, JobSummary};

/// 初始化日志
///
/// 优先使用 `RUST_LOG`，否则使用配置中的级别。重复初始化会被忽略。
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - Cortex Analyst 批量问答");
    info!("🔗 账户地址: {}", config.account_url);
    info!("📐 语义模型: {}", config.semantic_model);
    info!(
        "📊 通道数: {}，请求间隔: {}s，最多重试: {} 次",
        config.max_concurrent_questions, config.delay_between_requests_secs, config.max_retries
    );
    info!("{}", "=".repeat(60));
}

/// 记录作业创建
pub fn log_job_created(job_id: &str, total: usize) {
    info!("📦 创建作业 {}，共 {} 道题", job_id, total);
}

/// 记录作业开始执行
pub fn log_job_started(job_id: &str, total: usize, lanes: usize) {
    info!("\n{}", "=".repeat(60));
    info!("▶️ 作业 {} 开始执行", job_id);
    info!("📄 题目数: {}，通道数: {}", total, lanes);
    info!("{}", "=".repeat(60));
}

/// 记录轮询到的作业状态
pub fn log_status(summary: &JobSummary) {
    info!(
        "⏳ [{}] {}/{} ({:.1}%)，成功 {}，失败 {}",
        summary.status,
        summary.current_index,
        summary.total,
        summary.progress_percent,
        summary.succeeded,
        summary.failed
    );
}

/// 记录单题写入后的进度
pub fn log_progress(job: &Job) {
    debug!(
        "[作业 {}] 进度 {}/{} ({:.1}%)，成功 {}，失败 {}",
        job.job_id(),
        job.current_index(),
        job.total(),
        job.progress_percent(),
        job.succeeded(),
        job.failed()
    );
}

/// 记录作业结束统计
pub fn log_job_finished(job: &Job) {
    info!("\n{}", "─".repeat(60));
    info!("📊 作业 {} 结束: {}", job.job_id(), job.status());
    info!("✅ 成功: {}/{}", job.succeeded(), job.total());
    info!("❌ 失败: {}", job.failed());
    if job.semantic_rejections() > 0 {
        warn!("🧩 语义模型无法回答: {} 题", job.semantic_rejections());
    }
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(job: &Job, outputs: &[String]) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("状态: {}", job.status());
    info!("✅ 成功: {}/{}", job.succeeded(), job.total());
    info!("❌ 失败: {}", job.failed());
    if let (Some(started), Some(completed)) = (job.started_at(), job.completed_at()) {
        info!("⏱️ 耗时: {}s", (completed - started).num_seconds());
    }
    if job.status() == JobStatus::Failed {
        if let Some(reason) = job.error() {
            warn!("作业失败原因: {}", reason);
        }
    }
    info!("{}", "=".repeat(60));
    for path in outputs {
        info!("结果已保存至: {}", path);
    }
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("短文本", 10), "短文本");
        assert_eq!(truncate_text("abcdefgh", 3), "abc...");
        assert_eq!(truncate_text("销售额按地区汇总", 4), "销售额按...");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init("debug");
        init("not a valid ===== filter");
    }
}
