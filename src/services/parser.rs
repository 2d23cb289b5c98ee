//! 模型输出解析
//!
//! 模型输出没有固定格式，按顺序尝试多种提取策略：
//! 1. `JsonObject`：整体或最外层 `{...}` 作为 JSON 对象解析
//! 2. `KeyValue`：逐行匹配 `key: value` / `key = value`
//! 3. `FreeText`：在自然语言中用正则匹配，以及单独一个数字的回答
//!
//! 第一个提取到至少一个有效字段的策略胜出。解析永远不会失败，
//! 最差情况下返回 `PARSE_ERROR` 且保留原始文本。

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::estimation::{PLAUSIBLE_AGE_MAX, PLAUSIBLE_AGE_MIN};
use crate::models::{AgingSystem, EstimationResult, ResultStatus};

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*```[a-z]*\s*$").expect("valid regex"));

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("valid regex"));

static KEY_VALUE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^\s*(?:[-*•>]+\s*)?["'“”`*]*([A-Za-z][A-Za-z0-9 _/()\-–—]*?)["'“”`*]*\s*[:=]\s*(.*?)\s*,?\s*$"#,
    )
    .expect("valid regex")
});

static BARE_AGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(-?\d{1,4}(?:\.\d+)?)\s*(?:years?(?:\s+old)?|yrs?|y)?\s*\.?\s*$")
        .expect("valid regex")
});

static FREE_TEXT_BIOLOGICAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:biological|overall|bio)[\s_-]*age\b[^0-9\n]{0,40}?(-?\d+(?:\.\d+)?)")
        .expect("valid regex")
});

static FREE_TEXT_SYSTEMS: Lazy<Vec<(AgingSystem, Regex)>> = Lazy::new(|| {
    AgingSystem::ALL
        .iter()
        .map(|system| {
            let pattern = format!(
                r"(?i)\b(?:{})\w*(?:[\s/_-]+\w+)?(?:\s+system)?\s+(?:biological\s+)?age\b[^0-9\n]{{0,30}}?(-?\d+(?:\.\d+)?)",
                system.aliases().join("|")
            );
            (*system, Regex::new(&pattern).expect("valid regex"))
        })
        .collect()
});

/// 提取策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    JsonObject,
    KeyValue,
    FreeText,
}

impl ExtractionStrategy {
    /// 尝试顺序
    pub const CHAIN: [ExtractionStrategy; 3] = [
        ExtractionStrategy::JsonObject,
        ExtractionStrategy::KeyValue,
        ExtractionStrategy::FreeText,
    ];

    pub fn extract(&self, text: &str) -> Extraction {
        match self {
            ExtractionStrategy::JsonObject => extract_json_object(text),
            ExtractionStrategy::KeyValue => extract_key_values(text),
            ExtractionStrategy::FreeText => extract_free_text(text),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExtractionStrategy::JsonObject => "json_object",
            ExtractionStrategy::KeyValue => "key_value",
            ExtractionStrategy::FreeText => "free_text",
        }
    }
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 模型输出中识别出的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    BiologicalAge,
    System(AgingSystem),
    Reasoning,
    SystemReasoning(AgingSystem),
}

/// 键的明确程度；同一字段出现多次时，更明确的键胜出
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Specificity {
    /// 单独的 `age`
    Bare,
    /// 带限定词的键，如 `overall biological age`
    Qualified,
}

/// 指向实际年龄而非生物学年龄的词
const CHRONOLOGICAL_WORDS: [&str; 4] = ["chronological", "actual", "real", "calendar"];

impl Field {
    fn column(&self) -> &'static str {
        match self {
            Field::BiologicalAge => "biological_age",
            Field::System(system) => system.column(),
            Field::Reasoning => "reasoning",
            Field::SystemReasoning(system) => system.reasoning_column(),
        }
    }
}

/// 单个策略的提取结果，只包含通过范围校验的数值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub biological_age: Option<f64>,
    pub system_scores: BTreeMap<AgingSystem, f64>,
    pub reasoning: Option<String>,
    pub system_reasoning: BTreeMap<AgingSystem, String>,
    /// 解析成功但超出合理范围的值，如 `biological_age=240`
    pub rejected: Vec<String>,
    biological_specificity: Option<Specificity>,
}

impl Extraction {
    /// 是否至少提取到一个数值字段
    pub fn found_any(&self) -> bool {
        self.biological_age.is_some() || !self.system_scores.is_empty()
    }

    fn record_age(&mut self, field: Field, specificity: Specificity, value: f64) {
        if !is_plausible_age(value) {
            self.rejected.push(format!("{}={}", field.column(), value));
            return;
        }
        match field {
            Field::BiologicalAge => {
                if self
                    .biological_specificity
                    .is_none_or(|current| specificity > current)
                {
                    self.biological_age = Some(value);
                    self.biological_specificity = Some(specificity);
                }
            }
            Field::System(system) => {
                self.system_scores.entry(system).or_insert(value);
            }
            Field::Reasoning | Field::SystemReasoning(_) => {}
        }
    }

    fn record_text(&mut self, field: Field, specificity: Specificity, text: &str) {
        let cleaned = text.trim().trim_matches(|c: char| c == '"' || c == '\'').trim();
        match field {
            Field::Reasoning => {
                if !cleaned.is_empty() && self.reasoning.is_none() {
                    self.reasoning = Some(cleaned.to_string());
                }
            }
            Field::SystemReasoning(system) => {
                if !cleaned.is_empty() {
                    self.system_reasoning
                        .entry(system)
                        .or_insert_with(|| cleaned.to_string());
                }
            }
            Field::BiologicalAge | Field::System(_) => {
                if let Some(value) = extract_number(text) {
                    self.record_age(field, specificity, value);
                }
            }
        }
    }
}

pub fn is_plausible_age(value: f64) -> bool {
    value.is_finite() && (PLAUSIBLE_AGE_MIN..=PLAUSIBLE_AGE_MAX).contains(&value)
}

/// 从带单位或噪声的文本中取出第一个数字，如 `"62 years"` → 62
pub fn extract_number(text: &str) -> Option<f64> {
    NUMBER
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// 小写化，并把空白、连字符、下划线、斜杠等统一为单个空格
pub fn normalize_key(key: &str) -> String {
    key.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 根据归一化后的键判断字段
pub fn classify_key(key: &str) -> Option<Field> {
    classify_key_ranked(key).map(|(field, _)| field)
}

/// 判断字段并给出键的明确程度
pub fn classify_key_ranked(key: &str) -> Option<(Field, Specificity)> {
    let normalized = normalize_key(key);
    let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    if words.is_empty() {
        return None;
    }
    let has = |w: &str| words.contains(&w);

    if CHRONOLOGICAL_WORDS.iter().any(|w| has(*w)) {
        return None;
    }

    if has("inference") || has("reasoning") || has("explanation") || has("rationale") {
        let field = classify_reasoning(&normalized, &words)?;
        return Some((field, Specificity::Qualified));
    }

    let numeric_hint = has("age") || has("ages") || has("score") || has("years");

    for system in AgingSystem::ALL {
        if mentions_system(&words, system) {
            let only_system_words = words
                .iter()
                .all(|w| *w == "system" || *w == "and" || system_word(system, w));
            return (numeric_hint || only_system_words)
                .then_some((Field::System(system), Specificity::Qualified));
        }
    }

    if has("age") {
        let qualified = ["biological", "overall", "bio", "estimated", "predicted"]
            .iter()
            .any(|q| has(*q));
        if qualified {
            return Some((Field::BiologicalAge, Specificity::Qualified));
        }
        if words == ["age"] {
            return Some((Field::BiologicalAge, Specificity::Bare));
        }
    }

    None
}

/// `inference process N` 按提示词中的顺序对应：1 为整体，2..=9 为各系统
fn classify_reasoning(normalized: &str, words: &[&str]) -> Option<Field> {
    if normalized.starts_with("inference process") {
        let index = words.get(2)?.parse::<usize>().ok()?;
        return match index {
            1 => Some(Field::Reasoning),
            n => AgingSystem::ALL
                .get(n.checked_sub(2)?)
                .map(|system| Field::SystemReasoning(*system)),
        };
    }
    match AgingSystem::ALL
        .iter()
        .find(|system| mentions_system(words, **system))
    {
        Some(system) => Some(Field::SystemReasoning(*system)),
        None => Some(Field::Reasoning),
    }
}

fn system_word(system: AgingSystem, word: &str) -> bool {
    system.aliases().iter().any(|alias| word.starts_with(alias))
}

fn mentions_system(words: &[&str], system: AgingSystem) -> bool {
    words.iter().any(|w| system_word(system, w))
}

fn strip_code_fences(text: &str) -> String {
    CODE_FENCE.replace_all(text, "").into_owned()
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
        return Some(map);
    }
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&candidate[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// 定位并解析 JSON 对象；先按原文解析，再尝试把弯引号替换为直引号
pub fn locate_json_object(text: &str) -> Option<Map<String, Value>> {
    let cleaned = strip_code_fences(text);
    let cleaned = cleaned.trim();
    parse_object(cleaned).or_else(|| parse_object(&cleaned.replace(['“', '”'], "\"")))
}

fn visit_object(map: &Map<String, Value>, extraction: &mut Extraction, depth: usize) {
    for (key, value) in map {
        match value {
            Value::Object(inner) if depth < 2 => visit_object(inner, extraction, depth + 1),
            _ => {
                let Some((field, specificity)) = classify_key_ranked(key) else {
                    continue;
                };
                match value {
                    Value::Number(n) => {
                        if let Some(v) = n.as_f64() {
                            extraction.record_age(field, specificity, v);
                        }
                    }
                    Value::String(s) => extraction.record_text(field, specificity, s),
                    _ => {}
                }
            }
        }
    }
}

fn extract_json_object(text: &str) -> Extraction {
    let mut extraction = Extraction::default();
    if let Some(map) = locate_json_object(text) {
        visit_object(&map, &mut extraction, 0);
    }
    extraction
}

fn extract_key_values(text: &str) -> Extraction {
    let mut extraction = Extraction::default();
    for line in text.lines() {
        let Some(caps) = KEY_VALUE_LINE.captures(line) else {
            continue;
        };
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if let Some((field, specificity)) = classify_key_ranked(key.as_str()) {
            extraction.record_text(field, specificity, value.as_str());
        }
    }
    extraction
}

fn extract_free_text(text: &str) -> Extraction {
    let mut extraction = Extraction::default();

    if let Some(value) = BARE_AGE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        extraction.record_age(Field::BiologicalAge, Specificity::Qualified, value);
        return extraction;
    }

    if let Some(value) = FREE_TEXT_BIOLOGICAL
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
    {
        extraction.record_age(Field::BiologicalAge, Specificity::Qualified, value);
    }

    for (system, regex) in FREE_TEXT_SYSTEMS.iter() {
        if let Some(value) = regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
        {
            extraction.record_age(Field::System(*system), Specificity::Qualified, value);
        }
    }

    extraction
}

/// 模型输出解析器
#[derive(Debug, Clone)]
pub struct ResponseParser {
    strategies: Vec<ExtractionStrategy>,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self {
            strategies: ExtractionStrategy::CHAIN.to_vec(),
        }
    }

    /// 只使用给定的策略（按顺序）
    pub fn with_strategies(strategies: Vec<ExtractionStrategy>) -> Self {
        Self { strategies }
    }

    /// 依次尝试各策略，返回第一个成功的策略及其结果；
    /// 全部失败时返回 `None` 和所有策略累积的被拒绝值
    pub fn extract(&self, raw: &str) -> (Option<ExtractionStrategy>, Extraction) {
        let mut rejected = Vec::new();
        for strategy in &self.strategies {
            let extraction = strategy.extract(raw);
            if extraction.found_any() {
                return (Some(*strategy), extraction);
            }
            for value in extraction.rejected {
                if !rejected.contains(&value) {
                    rejected.push(value);
                }
            }
        }
        (
            None,
            Extraction {
                rejected,
                ..Default::default()
            },
        )
    }

    /// 把原始输出转换为结果，任何输入都不会失败
    pub fn parse(&self, person_id: i64, raw: &str) -> EstimationResult {
        let (strategy, extraction) = self.extract(raw);
        let mut result = EstimationResult::empty(person_id, ResultStatus::ParseError, raw);

        let Some(strategy) = strategy else {
            let mut reason = if raw.trim().is_empty() {
                "empty response".to_string()
            } else {
                "no fields could be extracted".to_string()
            };
            if !extraction.rejected.is_empty() {
                reason.push_str(&format!(
                    "; rejected out-of-range: {}",
                    extraction.rejected.join(", ")
                ));
            }
            debug!(person_id, %reason, "Response could not be parsed");
            result.error = Some(reason);
            return result;
        };

        result.status = ResultStatus::Ok;
        result.biological_age = extraction.biological_age;
        for (system, value) in &extraction.system_scores {
            result.system_scores.insert(*system, Some(*value));
        }
        result.reasoning = extraction.reasoning.clone();
        for (system, text) in &extraction.system_reasoning {
            result.system_reasoning.insert(*system, Some(text.clone()));
        }

        let mut missing: Vec<&str> = Vec::new();
        if result.biological_age.is_none() {
            missing.push("biological_age");
        }
        missing.extend(
            AgingSystem::ALL
                .iter()
                .filter(|s| result.system_score(**s).is_none())
                .map(|s| s.column()),
        );

        let mut notes = Vec::new();
        if !missing.is_empty() {
            notes.push(format!("missing: {}", missing.join(", ")));
        }
        if !extraction.rejected.is_empty() {
            notes.push(format!(
                "rejected out-of-range: {}",
                extraction.rejected.join(", ")
            ));
        }
        if !notes.is_empty() {
            result.error = Some(format!("degraded ({}): {}", strategy, notes.join("; ")));
        }

        debug!(person_id, strategy = %strategy, degraded = result.error.is_some(), "Response parsed");
        result
    }
}
