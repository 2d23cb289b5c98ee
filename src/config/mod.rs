//! 配置管理模块
//!
//! 提供运行配置的加载与校验，支持 TOML 配置文件、环境变量和命令行覆盖。

pub mod config;
pub mod loader;

pub use config::{InferenceConfig, LoggingConfig, RunConfig};
pub use loader::{ConfigLoader, ConfigOverrides, LoggingOverrides};
