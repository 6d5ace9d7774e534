use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::clients::{AnalystFailure, Answer, FailureKind};

/// 一道待提问的题目（CSV 中的一行）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
}

impl Question {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// 单题最终状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Failed,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Failed => "failed",
        }
    }
}

/// 单题处理结果
///
/// 在最后一次尝试结束时（成功或重试耗尽）创建，之后不再修改。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub question_text: String,
    pub status: ResultStatus,
    pub interpretation: Option<String>,
    pub generated_query: Option<String>,
    pub query_output: Option<JsonValue>,
    pub api_duration_ms: u64,
    pub query_duration_ms: Option<u64>,
    /// 含重试等待在内的总耗时
    pub total_duration_ms: u64,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
    /// 上游返回的错误码（例如 392708）
    pub error_code: Option<String>,
    pub attempt_count: u32,
}

impl QuestionResult {
    pub fn success(question: &Question, answer: Answer, attempt_count: u32, elapsed: Duration) -> Self {
        Self {
            question_id: question.id.clone(),
            question_text: question.text.clone(),
            status: ResultStatus::Success,
            interpretation: answer.interpretation,
            generated_query: answer.generated_query,
            query_output: answer.query_output,
            api_duration_ms: as_millis(answer.api_duration),
            query_duration_ms: answer.query_duration.map(as_millis),
            total_duration_ms: as_millis(elapsed),
            error_message: None,
            failure_kind: None,
            error_code: None,
            attempt_count,
        }
    }

    pub fn failed(
        question: &Question,
        failure: &AnalystFailure,
        attempt_count: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            question_id: question.id.clone(),
            question_text: question.text.clone(),
            status: ResultStatus::Failed,
            interpretation: None,
            generated_query: None,
            query_output: None,
            api_duration_ms: 0,
            query_duration_ms: None,
            total_duration_ms: as_millis(elapsed),
            error_message: Some(failure.to_string()),
            failure_kind: Some(failure.kind),
            error_code: failure.code.clone(),
            attempt_count,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// 是否为语义模型无法解析的问题（上游错误 392708）
    pub fn is_semantic_rejection(&self) -> bool {
        self.error_code.as_deref() == Some(crate::clients::SEMANTIC_MODEL_ERROR_CODE)
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
