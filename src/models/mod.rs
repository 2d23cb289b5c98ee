//! 核心数据模型模块
//!
//! 定义流水线的核心数据结构：InputRecord, EstimationResult, CheckpointState。

pub mod checkpoint;
pub mod estimation;
pub mod record;

pub use checkpoint::CheckpointState;
pub use estimation::{AgingSystem, EstimationResult, ResultStatus};
pub use record::InputRecord;
