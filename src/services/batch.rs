//! 批处理运行器
//!
//! 状态机：INIT → LOADING_INPUT → (RESUMING) → PROCESSING → FINALIZING → DONE，
//! 任何未完成阶段遇到不可恢复错误都会进入 FAILED。
//! 单条记录的推理失败只会记录为 `INFERENCE_ERROR`，不会中止批处理。

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{ConfigLoader, RunConfig};
use crate::error::{AppError, Result};
use crate::models::{CheckpointState, EstimationResult, InputRecord};
use crate::observability::RunSummary;
use crate::services::checkpoint::{CheckpointStore, CsvCheckpointStore};
use crate::services::inference::{InferenceClient, OllamaInferenceClient};
use crate::services::input::{InputSelection, load_input};
use crate::services::parser::ResponseParser;
use crate::services::prompt::PromptBuilder;

/// 运行阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Init,
    LoadingInput,
    Resuming,
    Processing,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Init => "INIT",
            RunPhase::LoadingInput => "LOADING_INPUT",
            RunPhase::Resuming => "RESUMING",
            RunPhase::Processing => "PROCESSING",
            RunPhase::Finalizing => "FINALIZING",
            RunPhase::Done => "DONE",
            RunPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// 成功运行的报告
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    pub output_path: PathBuf,
    /// 输出文件中的结果总数（含恢复的记录）
    pub results_written: usize,
}

pub struct BatchRunner {
    config: RunConfig,
    prompt_builder: PromptBuilder,
    parser: ResponseParser,
    client: Box<dyn InferenceClient>,
    store: Box<dyn CheckpointStore>,
    phase: RunPhase,
}

impl BatchRunner {
    pub fn new(
        config: RunConfig,
        client: Box<dyn InferenceClient>,
        store: Box<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            prompt_builder: PromptBuilder::new(),
            parser: ResponseParser::new(),
            client,
            store,
            phase: RunPhase::Init,
        }
    }

    /// 使用 Ollama 客户端和 CSV 检查点的默认组合
    pub fn with_ollama(config: RunConfig) -> Result<Self> {
        let client = OllamaInferenceClient::new(&config)?;
        Ok(Self::new(
            config,
            Box::new(client),
            Box::new(CsvCheckpointStore::new()),
        ))
    }

    pub fn with_prompt_builder(mut self, prompt_builder: PromptBuilder) -> Self {
        self.prompt_builder = prompt_builder;
        self
    }

    pub fn with_parser(mut self, parser: ResponseParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn transition(&mut self, next: RunPhase) {
        info!(from = %self.phase, to = %next, "Run phase transition");
        self.phase = next;
    }

    /// 执行完整运行
    pub async fn run(&mut self) -> Result<RunReport> {
        match self.run_phases().await {
            Ok(report) => {
                self.transition(RunPhase::Done);
                Ok(report)
            }
            Err(e) => {
                error!(phase = %self.phase, error = %e, "Run failed");
                self.transition(RunPhase::Failed);
                Err(e)
            }
        }
    }

    async fn run_phases(&mut self) -> Result<RunReport> {
        self.phase = RunPhase::Init;
        ConfigLoader::validate(&self.config)?;
        info!(
            model = %self.config.model_name,
            host = %self.config.host_url,
            input = %self.config.input_path.display(),
            output = %self.config.output_path.display(),
            limit = ?self.config.limit,
            checkpoint_every = self.config.checkpoint_every,
            "Configuration validated"
        );

        self.transition(RunPhase::LoadingInput);
        let InputSelection { records, all_ids } = load_input(&self.config)?;
        info!(records = records.len(), "Input loaded");

        let mut summary = RunSummary::new();
        summary.total_input = records.len();

        let mut state = self.resume(&all_ids)?;
        summary.resumed = state.len();

        self.transition(RunPhase::Processing);
        self.process(&records, &mut state, &mut summary).await?;

        self.transition(RunPhase::Finalizing);
        self.finalize(&state, &mut summary)?;

        summary.finish();
        summary.log();

        Ok(RunReport {
            summary,
            output_path: self.config.output_path.clone(),
            results_written: state.len(),
        })
    }

    /// RESUMING：读取已有检查点，校验其中的 id 都出现在输入文件中。
    /// 校验不受 id 区间影响，换区间续跑同一个输出文件是允许的。
    fn resume(&mut self, input_ids: &HashSet<i64>) -> Result<CheckpointState> {
        let path = self.config.output_path.clone();
        if self.config.fresh {
            if path.exists() {
                warn!(path = %path.display(), "Fresh run requested, existing output will be overwritten");
            }
            return Ok(CheckpointState::new());
        }
        if !path.exists() {
            return Ok(CheckpointState::new());
        }

        self.transition(RunPhase::Resuming);
        let state = self.store.load(&path)?;

        let mut foreign: Vec<i64> = state
            .processed_ids()
            .iter()
            .filter(|id| !input_ids.contains(id))
            .copied()
            .collect();
        if !foreign.is_empty() {
            foreign.sort_unstable();
            return Err(AppError::CheckpointCorrupt {
                path,
                reason: format!("checkpoint contains person_id(s) not in the input: {foreign:?}"),
            });
        }

        info!(resumed = state.len(), "Resuming from checkpoint");
        Ok(state)
    }

    /// PROCESSING：按输入顺序处理未完成的记录
    async fn process(
        &mut self,
        records: &[InputRecord],
        state: &mut CheckpointState,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let budget = self.config.limit.unwrap_or(usize::MAX);
        let pending: Vec<&InputRecord> = records
            .iter()
            .filter(|r| !state.is_processed(r.person_id))
            .take(budget)
            .collect();
        let total = pending.len();
        let pause = Duration::from_millis(self.config.inference.pause_between_calls_ms);

        info!(pending = total, skipped = state.len(), "Processing records");

        let mut since_checkpoint = 0;
        for (i, record) in pending.into_iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            let result = self.process_record(record).await;
            info!(
                person_id = record.person_id,
                status = %result.status,
                progress = %format!("{}/{}", i + 1, total),
                "Record processed"
            );
            summary.record(&result);
            state.push(result);
            since_checkpoint += 1;

            if since_checkpoint >= self.config.checkpoint_every {
                self.persist(state, summary)?;
                since_checkpoint = 0;
            }
        }

        if since_checkpoint > 0 {
            self.persist(state, summary)?;
        }
        Ok(())
    }

    /// 单条记录：构建提示词 → 推理 → 解析，永不返回错误
    pub async fn process_record(&self, record: &InputRecord) -> EstimationResult {
        let prompt = match self.prompt_builder.build(record) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(person_id = record.person_id, error = %e, "Record skipped");
                return EstimationResult::inference_error(record.person_id, e.to_string());
            }
        };

        let mut result = match self.client.infer(&prompt).await {
            Ok(raw) => self.parser.parse(record.person_id, &raw),
            Err(e) => {
                warn!(
                    person_id = record.person_id,
                    error = %e,
                    "Inference failed, recording INFERENCE_ERROR"
                );
                EstimationResult::inference_error(record.person_id, e.to_string())
            }
        };
        result.prompt_sent = prompt;
        result
    }

    fn persist(&self, state: &CheckpointState, summary: &mut RunSummary) -> Result<()> {
        self.store.persist(state, &self.config.output_path)?;
        summary.record_checkpoint();
        info!(records = state.len(), "Checkpoint saved");
        Ok(())
    }

    /// FINALIZING：最后一次持久化，并回读确认输出与内存中的结果一致
    fn finalize(&self, state: &CheckpointState, summary: &mut RunSummary) -> Result<()> {
        self.store.persist(state, &self.config.output_path)?;
        summary.record_checkpoint();

        let written = self.store.load(&self.config.output_path)?;
        if written.len() != state.len() || written.processed_ids() != state.processed_ids() {
            return Err(AppError::Internal(format!(
                "output verification failed: expected {} results, found {}",
                state.len(),
                written.len()
            )));
        }

        info!(
            path = %self.config.output_path.display(),
            results = written.len(),
            "Output finalized"
        );
        Ok(())
    }
}
