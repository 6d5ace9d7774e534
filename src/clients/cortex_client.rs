//! Cortex Analyst REST 客户端
//!
//! 封装两次调用：
//! 1. `POST /api/v2/cortex/analyst/message` 把自然语言问题交给语义模型
//! 2. `POST /api/v2/statements` 执行返回的 SQL，取回查询结果

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::clients::analyst_client::{AnalystConnection, AnalystFailure, Answer};
use crate::config::Config;

const ANALYST_ENDPOINT: &str = "/api/v2/cortex/analyst/message";
const STATEMENTS_ENDPOINT: &str = "/api/v2/statements";
/// 异步执行中的语句轮询间隔
const STATEMENT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Cortex Analyst 客户端
///
/// 内部的 reqwest::Client 可以安全地并发使用
#[derive(Debug, Clone)]
pub struct CortexAnalystClient {
    client: reqwest::Client,
    base_url: String,
    semantic_model: String,
    warehouse: String,
    database: String,
    schema: String,
    role: Option<String>,
    max_result_rows: usize,
    statement_timeout: Duration,
}

impl CortexAnalystClient {
    /// 根据配置创建客户端
    pub fn from_config(config: &Config) -> Result<Self, AnalystFailure> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| AnalystFailure::auth("token 格式不合法"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let token_type = HeaderValue::from_str(&config.token_type)
            .map_err(|_| AnalystFailure::auth("token_type 格式不合法"))?;
        headers.insert("X-Snowflake-Authorization-Token-Type", token_type);

        let client = reqwest::Client::builder()
            .timeout(config.call_timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| AnalystFailure::network(format!("无法创建 HTTP 客户端: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.account_url.trim_end_matches('/').to_string(),
            semantic_model: config.semantic_model.clone(),
            warehouse: config.warehouse.clone(),
            database: config.database.clone(),
            schema: config.schema.clone(),
            role: config.role.clone(),
            max_result_rows: config.max_result_rows,
            statement_timeout: config.call_timeout(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// 调用 Cortex Analyst，返回解释文本、SQL 和请求 ID
    async fn send_message(&self, question_text: &str) -> Result<AnalystReply, AnalystFailure> {
        let body = json!({
            "messages": [{
                "role": "user",
                "content": [{ "type": "text", "text": question_text }]
            }],
            "semantic_model_file": self.semantic_model,
            "stream": false
        });

        let response = self
            .client
            .post(self.url(ANALYST_ENDPOINT))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport_error)?;

        if !status.is_success() {
            return Err(upstream_failure(status, &text));
        }

        let parsed: AnalystResponse = serde_json::from_str(&text).map_err(|e| {
            AnalystFailure::server(format!("无法解析 Cortex Analyst 响应: {}", e))
        })?;

        if let Some(code) = parsed.error_code.clone() {
            let message = match &parsed.message {
                Some(MessageField::Text(text)) => text.clone(),
                _ => "Unknown".to_string(),
            };
            return Err(AnalystFailure::from_upstream(
                status.as_u16(),
                Some(code),
                message,
            ));
        }

        Ok(parsed.into_reply())
    }

    /// 通过 SQL API 执行语句，返回行对象数组
    pub async fn execute_statement(&self, statement: &str) -> Result<JsonValue, AnalystFailure> {
        let mut body = json!({
            "statement": statement,
            "timeout": self.statement_timeout.as_secs(),
            "warehouse": self.warehouse,
            "database": self.database,
            "schema": self.schema,
        });
        if let Some(role) = &self.role {
            body["role"] = json!(role);
        }

        let response = self
            .client
            .post(self.url(STATEMENTS_ENDPOINT))
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let mut status = response.status();
        let mut text = response.text().await.map_err(classify_transport_error)?;
        let started = Instant::now();

        // 202 表示语句仍在执行，按返回的状态地址轮询
        while status == StatusCode::ACCEPTED {
            if started.elapsed() > self.statement_timeout {
                return Err(AnalystFailure::timeout(self.statement_timeout));
            }
            let pending: StatementResponse = serde_json::from_str(&text)
                .map_err(|e| AnalystFailure::server(format!("无法解析语句状态: {}", e)))?;
            let Some(status_url) = pending.statement_status_url else {
                return Err(AnalystFailure::server("语句执行中但缺少 statementStatusUrl"));
            };

            sleep(STATEMENT_POLL_INTERVAL).await;
            let response = self
                .client
                .get(self.url(&status_url))
                .send()
                .await
                .map_err(classify_transport_error)?;
            status = response.status();
            text = response.text().await.map_err(classify_transport_error)?;
        }

        if !status.is_success() {
            return Err(upstream_failure(status, &text));
        }

        let parsed: StatementResponse = serde_json::from_str(&text)
            .map_err(|e| AnalystFailure::server(format!("无法解析查询结果: {}", e)))?;

        Ok(parsed.into_rows(self.max_result_rows))
    }
}

#[async_trait]
impl AnalystConnection for CortexAnalystClient {
    async fn ask(&self, question_text: &str) -> Result<Answer, AnalystFailure> {
        let api_start = Instant::now();
        let reply = self.send_message(question_text).await?;
        let api_duration = api_start.elapsed();

        let mut answer = Answer {
            interpretation: reply.interpretation,
            generated_query: reply.statement,
            query_output: None,
            api_duration,
            query_duration: None,
            request_id: reply.request_id,
        };

        // SQL 执行失败不影响本题的成功状态，错误信息写入查询结果
        if let Some(statement) = answer.generated_query.as_deref() {
            let sql_start = Instant::now();
            let output = match self.execute_statement(statement).await {
                Ok(rows) => {
                    debug!(
                        "SQL 执行完成: {} 行",
                        rows.as_array().map(|r| r.len()).unwrap_or(0)
                    );
                    rows
                }
                Err(e) => {
                    warn!("SQL 执行失败: {}", e.message);
                    JsonValue::String(format!("SQL error: {}", e.message))
                }
            };
            answer.query_output = Some(output);
            answer.query_duration = Some(sql_start.elapsed());
        }

        Ok(answer)
    }

    async fn health_check(&self) -> Result<(), AnalystFailure> {
        self.execute_statement("SELECT 1").await.map(|_| ())
    }
}

// ========== API 类型 ==========

#[derive(Deserialize)]
struct AnalystResponse {
    message: Option<MessageField>,
    request_id: Option<String>,
    error_code: Option<String>,
}

/// 正常响应中 `message` 是对象，错误响应中是文本
#[derive(Deserialize)]
#[serde(untagged)]
enum MessageField {
    Structured(AnalystMessage),
    Text(String),
}

#[derive(Deserialize)]
struct AnalystMessage {
    #[serde(default)]
    content: Vec<ContentItem>,
}

#[derive(Deserialize)]
struct ContentItem {
    #[serde(rename = "type")]
    item_type: String,
    text: Option<String>,
    statement: Option<String>,
}

struct AnalystReply {
    interpretation: Option<String>,
    statement: Option<String>,
    request_id: Option<String>,
}

impl AnalystResponse {
    fn into_reply(self) -> AnalystReply {
        let mut texts = Vec::new();
        let mut statement = None;

        let content = match self.message {
            Some(MessageField::Structured(message)) => message.content,
            _ => Vec::new(),
        };

        for item in content {
            match item.item_type.as_str() {
                "text" => texts.extend(item.text.filter(|t| !t.trim().is_empty())),
                "sql" => {
                    statement = item.statement.filter(|s| !s.trim().is_empty()).or(statement)
                }
                _ => {}
            }
        }

        AnalystReply {
            interpretation: if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            },
            statement,
            request_id: self.request_id,
        }
    }
}

/// 上游错误响应体
#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
    error_code: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<JsonValue>>,
    statement_status_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<ColumnType>,
}

#[derive(Deserialize)]
struct ColumnType {
    name: String,
}

impl StatementResponse {
    /// 把列式结果转换为 `[{列名: 值}]`，最多保留 `limit` 行
    fn into_rows(self, limit: usize) -> JsonValue {
        let columns: Vec<String> = self
            .result_set_meta_data
            .map(|m| m.row_type.into_iter().map(|c| c.name).collect())
            .unwrap_or_default();

        let rows = self
            .data
            .into_iter()
            .take(limit)
            .map(|row| {
                let mut object = JsonMap::new();
                for (index, value) in row.into_iter().enumerate() {
                    let key = columns
                        .get(index)
                        .cloned()
                        .unwrap_or_else(|| format!("COLUMN_{}", index + 1));
                    object.insert(key, value);
                }
                JsonValue::Object(object)
            })
            .collect();

        JsonValue::Array(rows)
    }
}

// ========== 辅助函数 ==========

fn upstream_failure(status: StatusCode, body: &str) -> AnalystFailure {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let (code, message) = match parsed {
        Some(err) => (
            err.code.or(err.error_code),
            err.message.unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
        ),
        None => (None, format!("HTTP {}", status.as_u16())),
    };
    AnalystFailure::from_upstream(status.as_u16(), code, message)
}

fn classify_transport_error(err: reqwest::Error) -> AnalystFailure {
    if err.is_timeout() {
        AnalystFailure::server(format!("请求超时: {}", err))
    } else if let Some(status) = err.status() {
        AnalystFailure::from_upstream(status.as_u16(), None, err.to_string())
    } else {
        AnalystFailure::network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_collects_text_and_sql() {
        let response: AnalystResponse = serde_json::from_value(json!({
            "message": {
                "role": "analyst",
                "content": [
                    { "type": "text", "text": "This is our interpretation" },
                    { "type": "sql", "statement": "SELECT 1" }
                ]
            },
            "request_id": "req-1"
        }))
        .unwrap();

        let reply = response.into_reply();
        assert_eq!(reply.interpretation.as_deref(), Some("This is our interpretation"));
        assert_eq!(reply.statement.as_deref(), Some("SELECT 1"));
        assert_eq!(reply.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_rows_are_keyed_by_column_and_truncated() {
        let response: StatementResponse = serde_json::from_value(json!({
            "resultSetMetaData": { "rowType": [{ "name": "REGION" }, { "name": "TOTAL" }] },
            "data": [["EU", "10"], ["US", "20"], ["APAC", null]]
        }))
        .unwrap();

        let rows = response.into_rows(2);
        assert_eq!(
            rows,
            json!([
                { "REGION": "EU", "TOTAL": "10" },
                { "REGION": "US", "TOTAL": "20" }
            ])
        );
    }

    #[test]
    fn test_error_body_code_is_used() {
        let failure = upstream_failure(
            StatusCode::BAD_REQUEST,
            r#"{"message":"unable to resolve","code":"392708"}"#,
        );
        assert_eq!(failure.code.as_deref(), Some("392708"));
        assert!(!failure.is_transient());
    }

    #[test]
    fn test_non_json_error_body() {
        let failure = upstream_failure(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert!(failure.is_transient());
        assert_eq!(failure.message, "HTTP 502");
    }
}
