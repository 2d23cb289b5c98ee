//! 提示词构建

use crate::error::{AppError, Result};
use crate::models::{AgingSystem, InputRecord};

const RECORD_PLACEHOLDER: &str = "{health_record}";
const SCHEMA_PLACEHOLDER: &str = "{schema}";

const DEFAULT_TEMPLATE: &str = r#"ROLE:
You are an expert in biogerontology and clinical data analysis. You estimate biological age from heterogeneous health information such as laboratory results, vital signs, imaging findings, lifestyle factors and medical history.

TASK:
Estimate the individual's overall biological age and a separate biological age for each physiological system listed in the schema. Biological age may be higher, lower or equal to chronological age. Summarise the indicators that drove the overall estimate in the "reasoning" field, and explain each system age in its own reasoning field. All ages are whole numbers of years between 0 and 130.

Respond with a single JSON object and nothing else, using exactly these keys:

{schema}

HEALTH RECORD:
{health_record}

Now output the JSON object:
"#;

/// 提示词构建器
///
/// 纯函数：相同的记录文本总是得到相同的提示词。
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::with_template(DEFAULT_TEMPLATE)
    }

    /// 使用自定义模板，模板中的 `{schema}` 与 `{health_record}` 会被替换
    pub fn with_template(template: &str) -> Self {
        Self {
            template: template.replace(SCHEMA_PLACEHOLDER, &output_schema()),
        }
    }

    pub fn build(&self, record: &InputRecord) -> Result<String> {
        if record.is_blank() {
            return Err(AppError::InvalidRecord(format!(
                "person_id {} has an empty health_record",
                record.person_id
            )));
        }
        Ok(self
            .template
            .replace(RECORD_PLACEHOLDER, record.health_record.trim()))
    }
}

/// 期望模型输出的 JSON 结构说明
pub fn output_schema() -> String {
    let mut lines = vec![
        "{".to_string(),
        r#"  "reasoning": string,"#.to_string(),
        r#"  "overall biological age": int,"#.to_string(),
    ];
    for (i, system) in AgingSystem::ALL.iter().enumerate() {
        let comma = if i + 1 == AgingSystem::ALL.len() { "" } else { "," };
        lines.push(format!(r#"  "{}": string,"#, system.reasoning_prompt_key()));
        lines.push(format!(r#"  "{}": int{}"#, system.prompt_key(), comma));
    }
    lines.push("}".to_string());
    lines.join("\n")
}
