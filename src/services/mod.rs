//! 服务模块

pub mod batch;
pub mod checkpoint;
pub mod inference;
pub mod input;
pub mod parser;
pub mod prompt;

pub use batch::{BatchRunner, RunPhase, RunReport};
pub use checkpoint::{CheckpointStore, CsvCheckpointStore};
pub use inference::{InferenceClient, OllamaInferenceClient};
pub use input::{InputSelection, load_input, read_input_records};
pub use parser::{ExtractionStrategy, ResponseParser};
pub use prompt::PromptBuilder;
