//! 命令行参数

use clap::Parser;
use std::path::PathBuf;

use crate::config::{ConfigOverrides, LoggingOverrides};

#[derive(Debug, Parser)]
#[command(
    name = "bioage",
    version,
    about = "Estimate biological and per-system ages from clinical records with a local LLM"
)]
pub struct Cli {
    /// Input CSV with `person_id` and `health_record` columns
    #[arg(long)]
    pub input: PathBuf,

    /// Output CSV; also used as the resumable checkpoint
    #[arg(long)]
    pub output: PathBuf,

    /// Maximum number of records to process in this run
    #[arg(long)]
    pub limit: Option<usize>,

    /// Persist a checkpoint every N processed records [default: 1]
    #[arg(long)]
    pub checkpoint_every: Option<usize>,

    /// Only process records with person_id >= this value
    #[arg(long)]
    pub start_id: Option<i64>,

    /// Only process records with person_id <= this value
    #[arg(long)]
    pub end_id: Option<i64>,

    /// Model identifier (overrides OLLAMA_MODEL)
    #[arg(long)]
    pub model: Option<String>,

    /// Inference service base URL (overrides OLLAMA_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// TOML configuration file
    #[arg(long, env = "BIOAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Ignore any existing checkpoint and start over
    #[arg(long)]
    pub fresh: bool,

    /// Log level or filter directive, e.g. `debug` or `bioage=trace`
    #[arg(long)]
    pub log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    /// 只有显式给出的参数才会覆盖配置文件和环境变量
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            model_name: self.model.clone(),
            host_url: self.host.clone(),
            input_path: Some(self.input.clone()),
            output_path: Some(self.output.clone()),
            limit: self.limit,
            checkpoint_every: self.checkpoint_every,
            start_id: self.start_id,
            end_id: self.end_id,
            fresh: self.fresh.then_some(true),
            logging: LoggingOverrides {
                level: self.log_level.clone(),
                structured: self.json_logs.then_some(true),
            },
        }
    }
}
