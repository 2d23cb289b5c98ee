//! 错误处理模块
//!
//! 定义流水线的错误类型以及致命错误到进程退出码的映射。
//! 单条记录的推理或解析失败不会以 `Err` 形式向上传播，
//! 而是记录在 `EstimationResult::status` 中。

use std::path::PathBuf;

use thiserror::Error;

/// 应用程序错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 输入文件格式错误（缺列、无法解析的 person_id 等）
    #[error("输入格式错误: {0}")]
    InputFormat(String),

    /// 输入中 person_id 重复
    #[error("输入中存在重复的 person_id: {0}")]
    DuplicateId(i64),

    /// 检查点文件损坏，无法恢复
    #[error("检查点损坏 ({}): {reason}", path.display())]
    CheckpointCorrupt { path: PathBuf, reason: String },

    /// 单条记录无法构建提示词
    #[error("无效记录: {0}")]
    InvalidRecord(String),

    /// 推理服务在重试耗尽后仍然失败
    #[error("推理失败 (尝试 {attempts} 次): {reason}")]
    Inference { reason: String, attempts: u32 },

    /// CSV 读写错误
    #[error("CSV 错误: {0}")]
    Csv(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AppError {
    /// 进程退出码，0 保留给成功完成
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) => 2,
            AppError::InputFormat(_) | AppError::DuplicateId(_) => 3,
            AppError::CheckpointCorrupt { .. } => 4,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(e: csv::Error) -> Self {
        AppError::Csv(e.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;
