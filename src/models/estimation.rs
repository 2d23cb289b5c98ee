use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 合理的人类年龄区间（岁），超出范围的数值一律置空
pub const PLAUSIBLE_AGE_MIN: f64 = 0.0;
pub const PLAUSIBLE_AGE_MAX: f64 = 130.0;

/// 生理系统
///
/// 顺序即输出 CSV 中系统列的顺序，在一次运行中保持稳定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgingSystem {
    Cardiovascular,
    MetabolicEndocrine,
    Hepatic,
    Renal,
    ImmuneInflammatory,
    Respiratory,
    Neurocognitive,
    OralSensory,
}

impl AgingSystem {
    pub const ALL: [AgingSystem; 8] = [
        AgingSystem::Cardiovascular,
        AgingSystem::MetabolicEndocrine,
        AgingSystem::Hepatic,
        AgingSystem::Renal,
        AgingSystem::ImmuneInflammatory,
        AgingSystem::Respiratory,
        AgingSystem::Neurocognitive,
        AgingSystem::OralSensory,
    ];

    /// 输出 CSV 列名
    pub fn column(&self) -> &'static str {
        match self {
            AgingSystem::Cardiovascular => "cardiovascular_age",
            AgingSystem::MetabolicEndocrine => "metabolic_endocrine_age",
            AgingSystem::Hepatic => "hepatic_age",
            AgingSystem::Renal => "renal_age",
            AgingSystem::ImmuneInflammatory => "immune_inflammatory_age",
            AgingSystem::Respiratory => "respiratory_age",
            AgingSystem::Neurocognitive => "neurocognitive_age",
            AgingSystem::OralSensory => "oral_sensory_age",
        }
    }

    /// 该系统推理说明的输出列名
    pub fn reasoning_column(&self) -> &'static str {
        match self {
            AgingSystem::Cardiovascular => "cardiovascular_reasoning",
            AgingSystem::MetabolicEndocrine => "metabolic_endocrine_reasoning",
            AgingSystem::Hepatic => "hepatic_reasoning",
            AgingSystem::Renal => "renal_reasoning",
            AgingSystem::ImmuneInflammatory => "immune_inflammatory_reasoning",
            AgingSystem::Respiratory => "respiratory_reasoning",
            AgingSystem::Neurocognitive => "neurocognitive_reasoning",
            AgingSystem::OralSensory => "oral_sensory_reasoning",
        }
    }

    /// 提示词中要求模型输出的 JSON 键
    pub fn prompt_key(&self) -> &'static str {
        match self {
            AgingSystem::Cardiovascular => "cardiovascular system age",
            AgingSystem::MetabolicEndocrine => "metabolic/endocrine system age",
            AgingSystem::Hepatic => "hepatic system age",
            AgingSystem::Renal => "renal system age",
            AgingSystem::ImmuneInflammatory => "immune/inflammatory system age",
            AgingSystem::Respiratory => "respiratory system age",
            AgingSystem::Neurocognitive => "neurocognitive system age",
            AgingSystem::OralSensory => "oral-sensory system age",
        }
    }

    /// 提示词中该系统推理说明的 JSON 键，如 `"renal system reasoning"`
    pub fn reasoning_prompt_key(&self) -> String {
        format!("{} reasoning", self.prompt_key().trim_end_matches(" age"))
    }

    /// 识别模型输出中该系统时使用的词根（小写）
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            AgingSystem::Cardiovascular => &["cardiovascular", "cardio", "heart"],
            AgingSystem::MetabolicEndocrine => &["metabolic", "endocrine"],
            AgingSystem::Hepatic => &["hepatic", "liver"],
            AgingSystem::Renal => &["renal", "kidney"],
            AgingSystem::ImmuneInflammatory => &["immune", "inflammatory"],
            AgingSystem::Respiratory => &["respiratory", "pulmonary", "lung"],
            AgingSystem::Neurocognitive => &["neurocognitive", "cognitive", "neuro", "brain"],
            AgingSystem::OralSensory => &["oral", "sensory"],
        }
    }
}

impl fmt::Display for AgingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// 单条记录的处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Ok,
    ParseError,
    InferenceError,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Ok => "OK",
            ResultStatus::ParseError => "PARSE_ERROR",
            ResultStatus::InferenceError => "INFERENCE_ERROR",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "OK" => Ok(ResultStatus::Ok),
            "PARSE_ERROR" => Ok(ResultStatus::ParseError),
            "INFERENCE_ERROR" => Ok(ResultStatus::InferenceError),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

/// 单条记录的估计结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    pub person_id: i64,

    /// 整体生物学年龄
    pub biological_age: Option<f64>,

    /// 各系统年龄，始终包含 `AgingSystem::ALL` 中的每一项
    pub system_scores: BTreeMap<AgingSystem, Option<f64>>,

    /// 模型给出的整体推理说明
    pub reasoning: Option<String>,

    /// 各系统的推理说明，键与 `system_scores` 相同
    pub system_reasoning: BTreeMap<AgingSystem, Option<String>>,

    /// 失败原因或降级说明（缺失/被拒绝的字段）
    pub error: Option<String>,

    pub status: ResultStatus,

    /// 发送给模型的完整提示词
    pub prompt_sent: String,

    /// 模型原始输出，保留以便人工复核
    pub raw_response: String,
}

impl EstimationResult {
    /// 创建所有数值字段为空的结果
    pub fn empty(person_id: i64, status: ResultStatus, raw_response: impl Into<String>) -> Self {
        Self {
            person_id,
            biological_age: None,
            system_scores: AgingSystem::ALL.iter().map(|s| (*s, None)).collect(),
            reasoning: None,
            system_reasoning: AgingSystem::ALL.iter().map(|s| (*s, None)).collect(),
            error: None,
            status,
            prompt_sent: String::new(),
            raw_response: raw_response.into(),
        }
    }

    /// 推理失败时记录的结果
    pub fn inference_error(person_id: i64, reason: impl Into<String>) -> Self {
        let mut result = Self::empty(person_id, ResultStatus::InferenceError, "");
        result.error = Some(reason.into());
        result
    }

    pub fn system_score(&self, system: AgingSystem) -> Option<f64> {
        self.system_scores.get(&system).copied().flatten()
    }

    pub fn reasoning_for(&self, system: AgingSystem) -> Option<&str> {
        self.system_reasoning.get(&system).and_then(|r| r.as_deref())
    }

    /// 状态为 OK 但存在缺失或被拒绝的字段
    pub fn is_degraded(&self) -> bool {
        self.status == ResultStatus::Ok
            && (self.biological_age.is_none()
                || AgingSystem::ALL
                    .iter()
                    .any(|s| self.system_score(*s).is_none()))
    }

    /// 输出 CSV 的列头
    pub fn csv_headers() -> Vec<&'static str> {
        let mut headers = vec!["person_id", "biological_age"];
        headers.extend(AgingSystem::ALL.iter().map(|s| s.column()));
        headers.push("reasoning");
        headers.extend(AgingSystem::ALL.iter().map(|s| s.reasoning_column()));
        headers.extend(["error", "status", "prompt_sent", "raw_response"]);
        headers
    }

    /// 序列化为一行 CSV，列顺序与 `csv_headers` 一致
    pub fn to_csv_row(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(2 * AgingSystem::ALL.len() + 7);
        row.push(self.person_id.to_string());
        row.push(format_age(self.biological_age));
        for system in AgingSystem::ALL {
            row.push(format_age(self.system_score(system)));
        }
        row.push(self.reasoning.clone().unwrap_or_default());
        for system in AgingSystem::ALL {
            row.push(self.reasoning_for(system).unwrap_or_default().to_string());
        }
        row.push(self.error.clone().unwrap_or_default());
        row.push(self.status.to_string());
        row.push(self.prompt_sent.clone());
        row.push(self.raw_response.clone());
        row
    }

    /// 从一行 CSV 还原，调用方需保证列头已校验
    pub fn from_csv_row(row: &csv::StringRecord) -> Result<Self, String> {
        let expected = Self::csv_headers().len();
        if row.len() != expected {
            return Err(format!("expected {expected} columns, found {}", row.len()));
        }

        let field = |i: usize| row.get(i).unwrap_or_default();
        let person_id = field(0)
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("invalid person_id '{}': {e}", field(0)))?;

        let biological_age = parse_age(field(1))?;
        let mut system_scores = BTreeMap::new();
        for (offset, system) in AgingSystem::ALL.iter().enumerate() {
            system_scores.insert(*system, parse_age(field(2 + offset))?);
        }

        let base = 2 + AgingSystem::ALL.len();
        let reasoning = non_empty(field(base));
        let mut system_reasoning = BTreeMap::new();
        for (offset, system) in AgingSystem::ALL.iter().enumerate() {
            system_reasoning.insert(*system, non_empty(field(base + 1 + offset)));
        }

        let tail = base + 1 + AgingSystem::ALL.len();
        let status = field(tail + 1).parse::<ResultStatus>()?;

        Ok(Self {
            person_id,
            biological_age,
            system_scores,
            reasoning,
            system_reasoning,
            error: non_empty(field(tail)),
            status,
            prompt_sent: field(tail + 2).to_string(),
            raw_response: field(tail + 3).to_string(),
        })
    }
}

fn format_age(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn parse_age(cell: &str) -> Result<Option<f64>, String> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    cell.parse::<f64>()
        .map(Some)
        .map_err(|e| format!("invalid age '{cell}': {e}"))
}

fn non_empty(cell: &str) -> Option<String> {
    if cell.is_empty() {
        None
    } else {
        Some(cell.to_string())
    }
}
