//! 可观测性模块
//!
//! 提供结构化日志初始化和批处理运行汇总。

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use crate::error::{AppError, Result};
use crate::models::{EstimationResult, ResultStatus};

// ===== Run Summary =====

/// 运行汇总
///
/// 单条记录的错误只在这里以计数形式体现。
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    /// 输入记录数（区间过滤后）
    pub total_input: usize,
    /// 从检查点恢复、本次跳过的记录数
    pub resumed: usize,
    /// 本次运行处理的记录数
    pub processed: usize,
    pub ok: usize,
    /// OK 但有字段缺失或被拒绝
    pub degraded: usize,
    pub parse_error: usize,
    pub inference_error: usize,
    pub checkpoints_written: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            total_input: 0,
            resumed: 0,
            processed: 0,
            ok: 0,
            degraded: 0,
            parse_error: 0,
            inference_error: 0,
            checkpoints_written: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录本次运行处理的一条结果
    pub fn record(&mut self, result: &EstimationResult) {
        self.processed += 1;
        match result.status {
            ResultStatus::Ok => {
                self.ok += 1;
                if result.is_degraded() {
                    self.degraded += 1;
                }
            }
            ResultStatus::ParseError => self.parse_error += 1,
            ResultStatus::InferenceError => self.inference_error += 1,
        }
    }

    pub fn record_checkpoint(&mut self) {
        self.checkpoints_written += 1;
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn elapsed_seconds(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// 面向终端用户的一行汇总
    pub fn render(&self) -> String {
        format!(
            "processed {} of {} records ({} resumed): {} OK ({} degraded), {} PARSE_ERROR, {} INFERENCE_ERROR in {:.1}s",
            self.processed,
            self.total_input,
            self.resumed,
            self.ok,
            self.degraded,
            self.parse_error,
            self.inference_error,
            self.elapsed_seconds()
        )
    }

    pub fn log(&self) {
        info!(
            total_input = self.total_input,
            resumed = self.resumed,
            processed = self.processed,
            ok = self.ok,
            degraded = self.degraded,
            parse_error = self.parse_error,
            inference_error = self.inference_error,
            checkpoints_written = self.checkpoints_written,
            elapsed_secs = self.elapsed_seconds(),
            "Run summary"
        );
    }
}

// ===== Structured Logging =====

/// 初始化日志
///
/// `RUST_LOG` 优先于配置中的级别。配置了 `log_dir` 时额外写入按天滚动的
/// JSON 日志文件，返回的 guard 必须持有到进程结束。
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = if config.structured {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "bioage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .with(filter)
        .try_init()
        .map_err(|e| AppError::Internal(format!("failed to set tracing subscriber: {e}")))?;

    Ok(guard)
}
