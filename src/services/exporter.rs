//! 结果导出服务
//!
//! 把已完成作业的结果按提交顺序导出为 JSON 数组或 CSV 表格。

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::fs;

use crate::error::{AppError, AppResult, ExportError};
use crate::models::{Job, QuestionResult};

/// 导出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

/// 导出的单行记录，字段名即对外的列名
#[derive(Debug, Serialize)]
struct ExportRecord<'a> {
    question_id: &'a str,
    question: &'a str,
    interpretation: &'a str,
    sql: &'a str,
    query_results: JsonValue,
    api_duration_ms: u64,
    sql_duration_ms: Option<u64>,
    status: &'static str,
    error_message: &'a str,
}

impl<'a> ExportRecord<'a> {
    fn from_result(result: &'a QuestionResult) -> Self {
        Self {
            question_id: &result.question_id,
            question: &result.question_text,
            interpretation: result.interpretation.as_deref().unwrap_or_default(),
            sql: result.generated_query.as_deref().unwrap_or_default(),
            query_results: result.query_output.clone().unwrap_or(JsonValue::Null),
            api_duration_ms: result.api_duration_ms,
            sql_duration_ms: result.query_duration_ms,
            status: result.status.as_str(),
            error_message: result.error_message.as_deref().unwrap_or_default(),
        }
    }
}

/// CSV 行：结构化的查询结果编码为单元格内的 JSON 字符串
#[derive(Debug, Serialize)]
struct CsvRecord<'a> {
    question_id: &'a str,
    question: &'a str,
    interpretation: &'a str,
    sql: &'a str,
    query_results: String,
    api_duration_ms: u64,
    sql_duration_ms: Option<u64>,
    status: &'static str,
    error_message: &'a str,
}

impl<'a> CsvRecord<'a> {
    fn from_record(record: ExportRecord<'a>) -> Result<Self, ExportError> {
        let query_results = match record.query_results {
            JsonValue::Null => String::new(),
            JsonValue::String(text) => text,
            other => serde_json::to_string(&other)?,
        };
        Ok(Self {
            question_id: record.question_id,
            question: record.question,
            interpretation: record.interpretation,
            sql: record.sql,
            query_results,
            api_duration_ms: record.api_duration_ms,
            sql_duration_ms: record.sql_duration_ms,
            status: record.status,
            error_message: record.error_message,
        })
    }
}

/// 导出作业结果
///
/// 只有 `completed` / `completed_with_errors` 的作业可以导出，
/// 其他状态返回 `NotReady`，不会导出部分数据。
pub fn export(job: &Job, format: ExportFormat) -> Result<Vec<u8>, ExportError> {
    if !job.status().is_finished() {
        return Err(ExportError::NotReady {
            job_id: job.job_id().to_string(),
            status: job.status(),
        });
    }

    let records: Vec<ExportRecord<'_>> = job
        .ordered_results()
        .into_iter()
        .map(ExportRecord::from_result)
        .collect();

    match format {
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(&records)?),
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            for record in records {
                writer.serialize(CsvRecord::from_record(record)?)?;
            }
            writer.into_inner().map_err(|e| ExportError::Csv {
                source: Box::new(e.into_error()),
            })
        }
    }
}

/// 把两种格式写入输出目录，返回 (JSON 路径, CSV 路径)
pub async fn write_exports(job: &Job, output_dir: &Path) -> AppResult<(PathBuf, PathBuf)> {
    let json = export(job, ExportFormat::Json)?;
    let csv = export(job, ExportFormat::Csv)?;

    fs::create_dir_all(output_dir)
        .await
        .map_err(|e| AppError::file_write_failed(output_dir.display().to_string(), e))?;

    let json_path = output_path(output_dir, job.job_id(), ExportFormat::Json);
    let csv_path = output_path(output_dir, job.job_id(), ExportFormat::Csv);

    fs::write(&json_path, json)
        .await
        .map_err(|e| AppError::file_write_failed(json_path.display().to_string(), e))?;
    fs::write(&csv_path, csv)
        .await
        .map_err(|e| AppError::file_write_failed(csv_path.display().to_string(), e))?;

    Ok((json_path, csv_path))
}

fn output_path(output_dir: &Path, job_id: &str, format: ExportFormat) -> PathBuf {
    output_dir.join(format!("{}_results.{}", job_id, format.extension()))
}
