use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 推理服务默认地址
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// 默认模型名称
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1:8b";

/// 推理客户端配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceConfig {
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 总尝试次数（含首次请求）
    pub max_attempts: u32,
    /// 首次重试前的退避时间（毫秒），之后按指数增长
    pub retry_backoff_ms: u64,
    /// 退避上限（毫秒）
    pub max_backoff_ms: u64,
    /// 两条记录之间的间隔（毫秒）
    pub pause_between_calls_ms: u64,
    /// 采样温度
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// 最大生成 token 数
    pub num_predict: u32,
    /// 上下文窗口大小
    pub num_ctx: u32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 600,
            max_attempts: 3,
            retry_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            pause_between_calls_ms: 500,
            temperature: 0.0,
            top_p: 1.0,
            top_k: 1,
            num_predict: 2048,
            num_ctx: 8192,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: String,
    /// 结构化（JSON）日志格式
    pub structured: bool,
    /// 日志文件目录，未设置时只输出到 stderr
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            structured: false,
            log_dir: None,
        }
    }
}

/// 一次批处理运行的完整配置，运行期间不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// 模型名称（OLLAMA_MODEL）
    pub model_name: String,
    /// 推理服务地址（OLLAMA_HOST）
    pub host_url: String,
    /// 输入 CSV 路径
    pub input_path: PathBuf,
    /// 输出 CSV 路径，同时也是检查点
    pub output_path: PathBuf,
    /// 本次运行最多处理的记录数
    pub limit: Option<usize>,
    /// 每处理多少条记录写一次检查点
    pub checkpoint_every: usize,
    /// person_id 下界（含）
    pub start_id: Option<i64>,
    /// person_id 上界（含）
    pub end_id: Option<i64>,
    /// 忽略已有检查点，从头开始
    pub fresh: bool,
    /// 推理客户端配置
    pub inference: InferenceConfig,
    /// 日志配置
    pub logging: LoggingConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model_name: DEFAULT_OLLAMA_MODEL.into(),
            host_url: DEFAULT_OLLAMA_HOST.into(),
            input_path: PathBuf::new(),
            output_path: PathBuf::new(),
            limit: None,
            checkpoint_every: 1,
            start_id: None,
            end_id: None,
            fresh: false,
            inference: InferenceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RunConfig {
    /// 创建指向给定输入输出的配置，其余字段取默认值
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            ..Self::default()
        }
    }

    /// 检查 person_id 是否落在配置的区间内
    pub fn id_in_range(&self, person_id: i64) -> bool {
        self.start_id.is_none_or(|start| person_id >= start)
            && self.end_id.is_none_or(|end| person_id <= end)
    }

    /// Ollama generate 接口地址
    pub fn generate_endpoint(&self) -> String {
        format!("{}/api/generate", self.host_url.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_conventions() {
        let config = RunConfig::default();
        assert_eq!(config.host_url, "http://localhost:11434");
        assert_eq!(config.checkpoint_every, 1);
        assert_eq!(config.inference.max_attempts, 3);
        assert_eq!(config.inference.request_timeout_secs, 600);
        assert!(config.limit.is_none());
    }

    #[test]
    fn test_id_range_is_inclusive() {
        let mut config = RunConfig::new("in.csv", "out.csv");
        assert!(config.id_in_range(-5));

        config.start_id = Some(10);
        config.end_id = Some(20);
        assert!(config.id_in_range(10));
        assert!(config.id_in_range(20));
        assert!(!config.id_in_range(9));
        assert!(!config.id_in_range(21));
    }

    #[test]
    fn test_generate_endpoint_trims_trailing_slash() {
        let mut config = RunConfig::default();
        config.host_url = "http://gpu-box:11434/".into();
        assert_eq!(config.generate_endpoint(), "http://gpu-box:11434/api/generate");
    }
}
