//! 输入加载服务
//!
//! 读取输入 CSV（必需列 `person_id`、`health_record`，其余列忽略）。

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info};

use crate::config::RunConfig;
use crate::error::{AppError, Result};
use crate::models::InputRecord;

pub const PERSON_ID_COLUMN: &str = "person_id";
pub const HEALTH_RECORD_COLUMN: &str = "health_record";

/// 读取全部输入记录，校验必需列与 person_id 唯一性
pub fn read_input_records(path: &Path) -> Result<Vec<InputRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| AppError::InputFormat(format!("无法打开 {}: {}", path.display(), e)))?;

    let headers = reader
        .headers()
        .map_err(|e| AppError::InputFormat(format!("无法读取列头: {e}")))?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}').trim() == name)
            .ok_or_else(|| AppError::InputFormat(format!("输入缺少必需列 '{name}'")))
    };
    let id_idx = column(PERSON_ID_COLUMN)?;
    let text_idx = column(HEALTH_RECORD_COLUMN)?;

    let mut records = Vec::new();
    let mut seen = HashSet::new();

    for (idx, row) in reader.records().enumerate() {
        // 列头占第 1 行
        let line = idx + 2;
        let row = row.map_err(|e| AppError::InputFormat(format!("第 {line} 行: {e}")))?;

        let raw_id = row.get(id_idx).unwrap_or_default();
        let person_id = parse_person_id(raw_id).ok_or_else(|| {
            AppError::InputFormat(format!("第 {line} 行: person_id '{raw_id}' 不是整数"))
        })?;

        let record = InputRecord::new(person_id, row.get(text_idx).unwrap_or_default());
        if record.is_blank() {
            return Err(AppError::InputFormat(format!(
                "第 {line} 行: person_id {person_id} 的 health_record 为空"
            )));
        }

        if !seen.insert(person_id) {
            return Err(AppError::DuplicateId(person_id));
        }
        records.push(record);
    }

    debug!(path = %path.display(), count = records.len(), "Input records read");
    Ok(records)
}

/// 按 person_id 区间筛选后的输入
#[derive(Debug, Clone, Default)]
pub struct InputSelection {
    /// 本次运行要处理的记录，保持输入顺序
    pub records: Vec<InputRecord>,
    /// 输入文件中的全部 person_id，包括区间之外的
    pub all_ids: HashSet<i64>,
}

/// LOADING_INPUT：读取输入并按 person_id 区间过滤
pub fn load_input(config: &RunConfig) -> Result<InputSelection> {
    let records = read_input_records(&config.input_path)?;
    let total = records.len();
    let all_ids: HashSet<i64> = records.iter().map(|r| r.person_id).collect();

    let records: Vec<InputRecord> = records
        .into_iter()
        .filter(|r| config.id_in_range(r.person_id))
        .collect();

    if config.start_id.is_some() || config.end_id.is_some() {
        info!(
            start_id = ?config.start_id,
            end_id = ?config.end_id,
            selected = records.len(),
            total,
            "Filtered input by person_id range"
        );
    }

    Ok(InputSelection { records, all_ids })
}

/// 接受 `12`，以及表格工具导出的 `12.0`
fn parse_person_id(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<i64>() {
        return Some(id);
    }
    let value = raw.parse::<f64>().ok()?;
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}
