use std::collections::HashSet;

use crate::models::estimation::EstimationResult;

/// 检查点状态
///
/// 已持久化的结果（按处理顺序）以及已处理的 person_id 集合。
/// 一次运行中集合只增不减，每个 person_id 至多对应一条结果。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointState {
    results: Vec<EstimationResult>,
    processed: HashSet<i64>,
}

impl CheckpointState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从结果序列构建，遇到重复 person_id 时返回该 id
    pub fn from_results(results: Vec<EstimationResult>) -> Result<Self, i64> {
        let mut state = Self::new();
        for result in results {
            let person_id = result.person_id;
            if !state.push(result) {
                return Err(person_id);
            }
        }
        Ok(state)
    }

    /// 追加一条结果；若该 person_id 已处理则忽略并返回 false
    pub fn push(&mut self, result: EstimationResult) -> bool {
        if !self.processed.insert(result.person_id) {
            return false;
        }
        self.results.push(result);
        true
    }

    pub fn is_processed(&self, person_id: i64) -> bool {
        self.processed.contains(&person_id)
    }

    pub fn results(&self) -> &[EstimationResult] {
        &self.results
    }

    pub fn processed_ids(&self) -> &HashSet<i64> {
        &self.processed
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
