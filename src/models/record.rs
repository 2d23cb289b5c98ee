use serde::{Deserialize, Serialize};

/// 输入记录
///
/// 从输入 CSV 的一行解析而来，读取后不可变，在流水线中只被消费一次。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    /// 个体唯一标识
    pub person_id: i64,

    /// 自由文本的临床记录
    pub health_record: String,
}

impl InputRecord {
    pub fn new(person_id: i64, health_record: impl Into<String>) -> Self {
        Self {
            person_id,
            health_record: health_record.into(),
        }
    }

    /// 临床记录是否为空（只含空白也视为空）
    pub fn is_blank(&self) -> bool {
        self.health_record.trim().is_empty()
    }
}
