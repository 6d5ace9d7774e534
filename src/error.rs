use std::fmt;

use crate::models::JobStatus;

/// 应用程序错误类型
#[derive(Debug)]
pub enum AppError {
    /// 作业存储相关错误
    Job(JobError),
    /// 结果导出错误
    Export(ExportError),
    /// 文件操作错误
    File(FileError),
    /// 配置错误
    Config(ConfigError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Job(e) => write!(f, "作业错误: {}", e),
            AppError::Export(e) => write!(f, "导出错误: {}", e),
            AppError::File(e) => write!(f, "文件错误: {}", e),
            AppError::Config(e) => write!(f, "配置错误: {}", e),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Job(e) => Some(e),
            AppError::Export(e) => Some(e),
            AppError::File(e) => Some(e),
            AppError::Config(e) => Some(e),
        }
    }
}

/// 作业存储与状态转换错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// 作业不存在（或已被删除）
    NotFound { job_id: String },
    /// 作业已处于终态，不再接受写入
    Terminal { job_id: String, status: JobStatus },
    /// 同一道题目的结果已经记录过
    AlreadyRecorded { job_id: String, question_id: String },
    /// 结果对应的题目不属于该作业
    UnknownQuestion { job_id: String, question_id: String },
    /// 非法的状态转换
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::NotFound { job_id } => write!(f, "作业不存在: {}", job_id),
            JobError::Terminal { job_id, status } => {
                write!(f, "作业 {} 已结束 ({})，拒绝写入", job_id, status)
            }
            JobError::AlreadyRecorded {
                job_id,
                question_id,
            } => {
                write!(f, "作业 {} 的题目 {} 已有结果", job_id, question_id)
            }
            JobError::UnknownQuestion {
                job_id,
                question_id,
            } => {
                write!(f, "作业 {} 中不存在题目 {}", job_id, question_id)
            }
            JobError::InvalidTransition { job_id, from, to } => {
                write!(f, "作业 {} 无法从 {} 转换到 {}", job_id, from, to)
            }
        }
    }
}

impl std::error::Error for JobError {}

/// 结果导出错误
#[derive(Debug)]
pub enum ExportError {
    /// 作业尚未完成，不能导出部分数据
    NotReady { job_id: String, status: JobStatus },
    /// JSON 序列化失败
    Json {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// CSV 写入失败
    Csv {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::NotReady { job_id, status } => {
                write!(f, "作业 {} 尚未完成 (当前状态: {})", job_id, status)
            }
            ExportError::Json { source } => write!(f, "JSON 序列化失败: {}", source),
            ExportError::Csv { source } => write!(f, "CSV 写入失败: {}", source),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Json { source } | ExportError::Csv { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            ExportError::NotReady { .. } => None,
        }
    }
}

/// 文件操作错误
#[derive(Debug)]
pub enum FileError {
    /// 读取文件失败
    ReadFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 写入文件失败
    WriteFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 题目 CSV 格式不正确
    InvalidCsv { reason: String },
    /// TOML 解析失败
    TomlParseFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::ReadFailed { path, source } => {
                write!(f, "读取文件失败 ({}): {}", path, source)
            }
            FileError::WriteFailed { path, source } => {
                write!(f, "写入文件失败 ({}): {}", path, source)
            }
            FileError::InvalidCsv { reason } => write!(f, "CSV 格式错误: {}", reason),
            FileError::TomlParseFailed { path, source } => {
                write!(f, "TOML解析失败 ({}): {}", path, source)
            }
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileError::ReadFailed { source, .. }
            | FileError::WriteFailed { source, .. }
            | FileError::TomlParseFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            FileError::InvalidCsv { .. } => None,
        }
    }
}

/// 配置错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// 必填项为空
    MissingValue { field: String },
    /// 取值不合法
    InvalidValue { field: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingValue { field } => write!(f, "配置项 {} 不能为空", field),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "配置项 {} 不合法: {}", field, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ========== 从常见错误类型转换 ==========

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        AppError::Job(err)
    }
}

impl From<ExportError> for AppError {
    fn from(err: ExportError) -> Self {
        AppError::Export(err)
    }
}

impl From<FileError> for AppError {
    fn from(err: FileError) -> Self {
        AppError::File(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Json {
            source: Box::new(err),
        }
    }
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Csv {
            source: Box::new(err),
        }
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::File(FileError::TomlParseFailed {
            path: String::new(), // TOML错误通常不包含路径信息
            source: Box::new(err),
        })
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: String::new(),
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件读取错误
    pub fn file_read_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 创建 CSV 格式错误
    pub fn invalid_csv(reason: impl Into<String>) -> Self {
        AppError::File(FileError::InvalidCsv {
            reason: reason.into(),
        })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
