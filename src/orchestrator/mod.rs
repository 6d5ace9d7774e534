//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `job_store` - 作业存储
//! - 创建 / 查询 / 列表 / 删除作业
//! - 为每个作业启动一个后台调度任务
//! - 导出已完成作业的结果
//!
//! ### `scheduler` - 作业调度器
//! - 启动检查（空输入、Id 重复、连接可用性）
//! - 固定数量的通道并发取题，单通道内按间隔限流
//! - 连续失败后暂停
//! - 协作式取消
//!
//! ## 层次关系
//!
//! ```text
//! job_store (处理 Vec<Job>)
//!     ↓
//! scheduler (处理单个 Job 的 Vec<Question>)
//!     ↓
//! workflow::QuestionRunner (处理单个 Question)
//!     ↓
//! services::RetryPolicy / clients::AnalystConnection
//! ```

pub mod job_store;
pub mod scheduler;

pub use job_store::JobStore;
pub use scheduler::SchedulerSettings;
