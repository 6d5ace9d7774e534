//! 远程分析接口契约
//!
//! 定义"问一个问题"的能力，以及失败分类。失败分类决定是否重试，
//! 是整个调度系统最关键的约定。

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// 上游语义模型无法解析问题时返回的错误码
pub const SEMANTIC_MODEL_ERROR_CODE: &str = "392708";

/// Snowflake 已知错误码到失败类型的映射
static KNOWN_ERROR_CODES: phf::Map<&'static str, FailureKind> = phf::phf_map! {
    "392708" => FailureKind::SemanticError,
    "390144" => FailureKind::FatalAuth,
    "390303" => FailureKind::FatalAuth,
    "390318" => FailureKind::FatalAuth,
};

/// 错误消息中的 Snowflake 错误码，例如 "Error 392708: ..."
static ERROR_CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\berror[\s:#]*(\d{6})\b").expect("Invalid error code regex"));

/// 一次成功调用的结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Answer {
    pub interpretation: Option<String>,
    pub generated_query: Option<String>,
    pub query_output: Option<JsonValue>,
    /// 远程分析调用本身的耗时
    pub api_duration: Duration,
    /// 生成的 SQL 执行耗时（未执行则为 None）
    pub query_duration: Option<Duration>,
    pub request_id: Option<String>,
}

/// 失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 网络层失败（连接失败、连接中断）
    TransientNetwork,
    /// 服务端 5xx、限流或超时
    TransientServer,
    /// 上游明确拒绝了问题（无法回答、有歧义、392708）
    SemanticError,
    /// 凭证或会话无效
    FatalAuth,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::TransientServer => "transient_server",
            FailureKind::SemanticError => "semantic_error",
            FailureKind::FatalAuth => "fatal_auth",
        }
    }

    /// 是否值得重试
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            FailureKind::TransientNetwork | FailureKind::TransientServer
        )
    }

    /// 按 HTTP 状态码分类
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 => FailureKind::FatalAuth,
            408 | 429 => FailureKind::TransientServer,
            s if s >= 500 => FailureKind::TransientServer,
            _ => FailureKind::SemanticError,
        }
    }

    /// 按上游错误码分类，未知错误码返回 None
    pub fn from_error_code(code: &str) -> Option<Self> {
        KNOWN_ERROR_CODES.get(code).copied()
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次调用的失败
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct AnalystFailure {
    pub kind: FailureKind,
    pub message: String,
    /// 上游错误码
    pub code: Option<String>,
    pub http_status: Option<u16>,
}

impl AnalystFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            http_status: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TransientNetwork, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(FailureKind::TransientServer, message)
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        Self::new(FailureKind::SemanticError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(FailureKind::FatalAuth, message)
    }

    /// 调用超过时限，按服务端临时故障处理
    pub fn timeout(limit: Duration) -> Self {
        Self::server(format!("request timed out after {:?}", limit))
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// 根据上游错误响应构造失败
    ///
    /// 错误码优先；没有错误码时尝试从消息文本中提取 "error 392708" 形式的错误码；
    /// 都没有时按 HTTP 状态码分类。
    pub fn from_upstream(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let code = code.or_else(|| extract_error_code(&message));

        let kind = match code.as_deref().and_then(FailureKind::from_error_code) {
            Some(kind) => kind,
            None => FailureKind::from_http_status(status),
        };

        let failure = Self::new(kind, message).with_status(status);
        match code {
            Some(code) => failure.with_code(code),
            None => failure,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

fn extract_error_code(message: &str) -> Option<String> {
    ERROR_CODE_PATTERN
        .captures(message)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// 远程分析连接
///
/// 由外部完成认证和建立，调度器只调用 `ask`，从不创建或关闭连接。
#[async_trait]
pub trait AnalystConnection: Send + Sync {
    /// 提交一个问题，返回结构化结果或已分类的失败
    async fn ask(&self, question_text: &str) -> Result<Answer, AnalystFailure>;

    /// 作业开始前检查连接是否可用
    async fn health_check(&self) -> Result<(), AnalystFailure> {
        Ok(())
    }

    /// 是否允许在同一连接上并发调用；返回 false 时调度器退化为单通道
    fn supports_concurrent_calls(&self) -> bool {
        true
    }
}
