use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use tokio::fs;

use crate::error::{AppError, AppResult};
use crate::models::question::Question;

/// 从 CSV 文件加载题目
///
/// 文件需要包含 `Id` 和 `Question` 两列（列名不区分大小写）
pub async fn load_questions(csv_path: &Path) -> AppResult<Vec<Question>> {
    let content = fs::read(csv_path)
        .await
        .map_err(|e| AppError::file_read_failed(csv_path.display().to_string(), e))?;

    let questions = parse_questions(content.as_slice())?;
    tracing::info!(
        "成功加载 {} 个题目: {}",
        questions.len(),
        csv_path.file_name().unwrap_or_default().to_string_lossy()
    );
    Ok(questions)
}

/// 解析题目 CSV，保持行顺序
///
/// - 题目为空的行会被跳过
/// - Id 为空时使用行号（从 1 开始）
/// - 同一文件内 Id 不能重复，报错时给出两行的行号
pub fn parse_questions<R: Read>(reader: R) -> AppResult<Vec<Question>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| AppError::invalid_csv(format!("无法读取表头: {}", e)))?
        .clone();

    let id_col = find_column(&headers, "id");
    let question_col = find_column(&headers, "question");
    let (id_col, question_col) = match (id_col, question_col) {
        (Some(id), Some(question)) => (id, question),
        _ => {
            return Err(AppError::invalid_csv("CSV 必须包含 'Id' 和 'Question' 两列"));
        }
    };

    let mut questions = Vec::new();
    // Id -> (首次出现的行号, 是否由行号补齐)
    let mut seen: HashMap<String, (usize, bool)> = HashMap::new();

    for (index, record) in csv_reader.records().enumerate() {
        let row = index + 1;
        let record =
            record.map_err(|e| AppError::invalid_csv(format!("第 {} 行解析失败: {}", row, e)))?;

        let text = record.get(question_col).unwrap_or_default();
        if text.is_empty() {
            tracing::warn!("跳过第 {} 行: 题目为空", row);
            continue;
        }

        let (id, filled) = match record.get(id_col) {
            Some(id) if !id.is_empty() => (id.to_string(), false),
            _ => (row.to_string(), true),
        };

        if let Some(&(first_row, first_filled)) = seen.get(&id) {
            let hint = if filled || first_filled {
                "（空 Id 以行号代替）"
            } else {
                ""
            };
            return Err(AppError::invalid_csv(format!(
                "第 {} 行的 Id {} 与第 {} 行重复{}",
                row, id, first_row, hint
            )));
        }
        seen.insert(id.clone(), (row, filled));

        questions.push(Question::new(id, text));
    }

    Ok(questions)
}

fn find_column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
}
