use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, AppResult, ConfigError};
use crate::orchestrator::SchedulerSettings;
use crate::services::{Backoff, RetryPolicy};

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- Snowflake 连接配置 ---
    /// 账户地址，例如 https://<account>.snowflakecomputing.com
    pub account_url: String,
    pub token: String,
    /// PROGRAMMATIC_ACCESS_TOKEN / KEYPAIR_JWT / OAUTH
    pub token_type: String,
    /// 语义模型文件路径（stage 路径）
    pub semantic_model: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    pub role: Option<String>,
    // --- 调度配置 ---
    /// 单次远程调用超时（毫秒）
    pub api_timeout_ms: u64,
    /// 单题单次尝试的总时限（毫秒，包含问题调用和 SQL 执行），未设置时为 `api_timeout_ms` 的 3 倍
    pub attempt_timeout_ms: Option<u64>,
    /// 临时性失败的最大重试次数（不含首次调用）
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub retry_backoff: Backoff,
    /// 每条通道上相邻两道题之间的间隔（秒）
    pub delay_between_requests_secs: u64,
    /// 同一作业内并发处理的题目数量
    pub max_concurrent_questions: usize,
    /// 连续失败多少题后暂停
    pub consecutive_failure_threshold: usize,
    pub throttle_pause_secs: u64,
    /// 查询结果最多保留的行数
    pub max_result_rows: usize,
    // --- 输出配置 ---
    pub poll_interval_ms: u64,
    pub output_dir: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            account_url: String::new(),
            token: String::new(),
            token_type: "PROGRAMMATIC_ACCESS_TOKEN".to_string(),
            semantic_model: String::new(),
            warehouse: "CORTEX_ANALYST_WH".to_string(),
            database: String::new(),
            schema: String::new(),
            role: None,
            attempt_timeout_ms: None,
            api_timeout_ms: 600_000,
            max_retries: 3,
            retry_delay_secs: 5,
            retry_backoff: Backoff::Linear,
            delay_between_requests_secs: 5,
            max_concurrent_questions: 1,
            consecutive_failure_threshold: 3,
            throttle_pause_secs: 30,
            max_result_rows: 100,
            poll_interval_ms: 2000,
            output_dir: "outputs".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            account_url: std::env::var("SNOWFLAKE_ACCOUNT_URL").unwrap_or(default.account_url),
            token: std::env::var("SNOWFLAKE_TOKEN").unwrap_or(default.token),
            token_type: std::env::var("SNOWFLAKE_TOKEN_TYPE").unwrap_or(default.token_type),
            semantic_model: std::env::var("SEMANTIC_MODEL").unwrap_or(default.semantic_model),
            warehouse: std::env::var("SNOWFLAKE_WAREHOUSE").unwrap_or(default.warehouse),
            database: std::env::var("SNOWFLAKE_DATABASE").unwrap_or(default.database),
            schema: std::env::var("SNOWFLAKE_SCHEMA").unwrap_or(default.schema),
            role: std::env::var("SNOWFLAKE_ROLE").ok().or(default.role),
            api_timeout_ms: env_parse("API_TIMEOUT_MS").unwrap_or(default.api_timeout_ms),
            attempt_timeout_ms: env_parse("ATTEMPT_TIMEOUT_MS").or(default.attempt_timeout_ms),
            max_retries: env_parse("MAX_RETRIES").unwrap_or(default.max_retries),
            retry_delay_secs: env_parse("RETRY_DELAY_SECS").unwrap_or(default.retry_delay_secs),
            retry_backoff: std::env::var("RETRY_BACKOFF")
                .ok()
                .and_then(|v| Backoff::parse(&v))
                .unwrap_or(default.retry_backoff),
            delay_between_requests_secs: env_parse("DELAY_BETWEEN_REQUESTS_SECS")
                .unwrap_or(default.delay_between_requests_secs),
            max_concurrent_questions: env_parse("MAX_CONCURRENT_QUESTIONS")
                .unwrap_or(default.max_concurrent_questions),
            consecutive_failure_threshold: env_parse("CONSECUTIVE_FAILURE_THRESHOLD")
                .unwrap_or(default.consecutive_failure_threshold),
            throttle_pause_secs: env_parse("THROTTLE_PAUSE_SECS")
                .unwrap_or(default.throttle_pause_secs),
            max_result_rows: env_parse("MAX_RESULT_ROWS").unwrap_or(default.max_result_rows),
            poll_interval_ms: env_parse("POLL_INTERVAL_MS").unwrap_or(default.poll_interval_ms),
            output_dir: std::env::var("OUTPUT_DIR").unwrap_or(default.output_dir),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(default.log_level),
        }
    }

    /// 从 TOML 文件加载配置，缺省字段使用默认值
    pub async fn from_toml_file(path: &Path) -> AppResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// 校验必填项和数值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("account_url", &self.account_url),
            ("token", &self.token),
            ("semantic_model", &self.semantic_model),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingValue {
                    field: field.to_string(),
                });
            }
        }

        if self.max_concurrent_questions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrent_questions".to_string(),
                reason: "至少为 1".to_string(),
            });
        }
        if self.api_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "api_timeout_ms".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.attempt_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "attempt_timeout_ms".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll_interval_ms".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }

        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.api_timeout_ms)
    }

    /// 单题单次尝试的总时限
    ///
    /// 一次尝试包含问题调用、SQL 执行和结果轮询，每个 HTTP 请求各自受 `call_timeout` 限制。
    pub fn attempt_timeout(&self) -> Duration {
        match self.attempt_timeout_ms {
            Some(ms) => Duration::from_millis(ms),
            None => self.call_timeout().saturating_mul(3),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_secs(self.retry_delay_secs),
            self.retry_backoff,
        )
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            max_concurrent_questions: self.max_concurrent_questions,
            delay_between_requests: Duration::from_secs(self.delay_between_requests_secs),
            consecutive_failure_threshold: self.consecutive_failure_threshold,
            throttle_pause: Duration::from_secs(self.throttle_pause_secs),
            attempt_timeout: self.attempt_timeout(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_upstream_limits() {
        let config = Config::default();
        assert_eq!(config.api_timeout_ms, 600_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.delay_between_requests_secs, 5);
        assert_eq!(config.max_concurrent_questions, 1);
        assert_eq!(config.call_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_attempt_timeout_covers_analyst_call_and_sql() {
        let config = Config {
            api_timeout_ms: 300,
            ..Config::default()
        };
        assert_eq!(config.attempt_timeout(), Duration::from_millis(900));
        assert_eq!(
            config.scheduler_settings().attempt_timeout,
            Duration::from_millis(900)
        );

        let config = Config {
            attempt_timeout_ms: Some(5_000),
            ..config
        };
        assert_eq!(config.attempt_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_toml_overrides_only_given_fields() {
        let config = Config::from_toml_str(
            r#"
            account_url = "https://acme.snowflakecomputing.com"
            token = "secret"
            semantic_model = "@DB.SCHEMA.STAGE/model.yaml"
            max_concurrent_questions = 4
            retry_backoff = "fixed"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_questions, 4);
        assert_eq!(config.retry_backoff, Backoff::Fixed);
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let config = Config::default();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingValue {
                field: "account_url".to_string()
            })
        );
    }

    #[test]
    fn test_validate_rejects_zero_lanes() {
        let config = Config {
            account_url: "https://acme.snowflakecomputing.com".to_string(),
            token: "secret".to_string(),
            semantic_model: "@stage/model.yaml".to_string(),
            max_concurrent_questions: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
