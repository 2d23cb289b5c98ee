use crate::config::config::RunConfig;
use crate::error::{AppError, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// 环境变量前缀，嵌套字段用 `__` 分隔，例如 `BIOAGE_INFERENCE__MAX_ATTEMPTS`
pub const ENV_PREFIX: &str = "BIOAGE_";

/// 命令行显式给出的覆盖项，优先级最高
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_every: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fresh: Option<bool>,
    #[serde(skip_serializing_if = "LoggingOverrides::is_empty")]
    pub logging: LoggingOverrides,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoggingOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<bool>,
}

impl LoggingOverrides {
    fn is_empty(&self) -> bool {
        self.level.is_none() && self.structured.is_none()
    }
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 按优先级合并配置：
    /// 1. 内置默认值
    /// 2. TOML 配置文件（可选）
    /// 3. `BIOAGE_` 前缀环境变量
    /// 4. `OLLAMA_MODEL` / `OLLAMA_HOST`
    /// 5. 命令行覆盖项
    pub fn figment(config_file: Option<&Path>, overrides: &ConfigOverrides) -> Figment {
        let file = config_file
            .map(Path::to_path_buf)
            .unwrap_or_else(default_config_path);

        Figment::from(Serialized::defaults(RunConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Env::raw().filter_map(|key| {
                if key.as_str().eq_ignore_ascii_case("OLLAMA_MODEL") {
                    Some("model_name".into())
                } else if key.as_str().eq_ignore_ascii_case("OLLAMA_HOST") {
                    Some("host_url".into())
                } else {
                    None
                }
            }))
            .merge(Serialized::defaults(overrides))
    }

    /// 加载并校验配置
    pub fn load(config_file: Option<&Path>, overrides: &ConfigOverrides) -> Result<RunConfig> {
        let config: RunConfig = Self::figment(config_file, overrides).extract()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// 校验配置（INIT 阶段）
    pub fn validate(config: &RunConfig) -> Result<()> {
        if config.model_name.trim().is_empty() {
            return Err(AppError::Config("模型名称未配置 (OLLAMA_MODEL)".into()));
        }

        if !(config.host_url.starts_with("http://") || config.host_url.starts_with("https://")) {
            return Err(AppError::Config(format!(
                "推理服务地址必须以 http:// 或 https:// 开头: {}",
                config.host_url
            )));
        }

        if config.checkpoint_every == 0 {
            return Err(AppError::Config("checkpoint_every 必须 >= 1".into()));
        }

        if config.inference.max_attempts == 0 {
            return Err(AppError::Config("inference.max_attempts 必须 >= 1".into()));
        }

        if let (Some(start), Some(end)) = (config.start_id, config.end_id) {
            if start > end {
                return Err(AppError::Config(format!(
                    "start_id ({start}) 不能大于 end_id ({end})"
                )));
            }
        }

        if !config.input_path.is_file() {
            return Err(AppError::Config(format!(
                "输入文件不存在: {}",
                config.input_path.display()
            )));
        }

        Self::validate_output_path(config)
    }

    fn validate_output_path(config: &RunConfig) -> Result<()> {
        let output = &config.output_path;
        if output.as_os_str().is_empty() {
            return Err(AppError::Config("输出路径未配置".into()));
        }
        if output.is_dir() {
            return Err(AppError::Config(format!(
                "输出路径是一个目录: {}",
                output.display()
            )));
        }
        if output == &config.input_path {
            return Err(AppError::Config("输出路径不能与输入路径相同".into()));
        }

        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let metadata = std::fs::metadata(&parent).map_err(|e| {
            AppError::Config(format!("输出目录不可用 {}: {}", parent.display(), e))
        })?;
        if !metadata.is_dir() || metadata.permissions().readonly() {
            return Err(AppError::Config(format!(
                "输出目录不可写: {}",
                parent.display()
            )));
        }

        Ok(())
    }
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    PathBuf::from("bioage.toml")
}
