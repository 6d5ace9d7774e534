//! # Cortex Analyst Batch
//!
//! 批量向 Snowflake Cortex Analyst 提问，并把解释、生成的 SQL 和查询结果导出为 JSON / CSV
//!
//! ## 架构设计
//!
//! 本系统采用四层架构：
//!
//! ### ① 连接层（Clients）
//! - `clients/` - 远程分析服务的抽象和 Cortex REST 实现
//! - `AnalystConnection` - 可替换的连接接口，测试中用脚本化实现
//! - `AnalystFailure` - 失败分类（网络 / 服务端 / 语义 / 认证）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `RetryPolicy` - 决定失败后是否重试、等多久
//! - `exporter` - 结果导出
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一道题"的完整处理流程
//! - `QuestionCtx` - 上下文封装（job_id + 题号 + 通道）
//! - `QuestionRunner` - 调用 → 重试 → 生成结果
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/job_store` - 作业存储，创建 / 查询 / 删除 / 导出
//! - `orchestrator/scheduler` - 单个作业的并发调度、限流和取消
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{AnalystConnection, AnalystFailure, Answer, CortexAnalystClient, FailureKind};
pub use config::Config;
pub use error::{AppError, AppResult, ExportError, JobError};
pub use models::{Job, JobStatus, JobSummary, Question, QuestionResult, ResultStatus};
pub use orchestrator::{JobStore, SchedulerSettings};
pub use services::{Backoff, ExportFormat, RetryPolicy};
pub use workflow::{QuestionCtx, QuestionRunner};
