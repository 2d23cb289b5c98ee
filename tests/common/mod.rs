//! Shared helpers for integration tests: a fake Ollama server and CSV fixtures.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use bioage::config::RunConfig;
use bioage::error::Result;
use bioage::models::CheckpointState;
use bioage::services::{CheckpointStore, CsvCheckpointStore};
use serde_json::json;
use wiremock::ResponseTemplate;

pub const GENERATE_PATH: &str = "/api/generate";

pub const FULL_RESPONSE: &str = r#"{
  "reasoning": "Elevated blood pressure and LDL; normal renal markers.",
  "overall biological age": 63,
  "cardiovascular system reasoning": "BP 140/90 with raised LDL.",
  "cardiovascular system age": 68,
  "metabolic/endocrine system age": 64,
  "hepatic system age": 60,
  "renal system age": 59,
  "immune/inflammatory system age": 62,
  "respiratory system age": 61,
  "neurocognitive system age": 60,
  "oral-sensory system age": 65
}"#;

/// Body of a successful non-streaming `/api/generate` reply.
pub fn ollama_reply(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "test-model",
        "created_at": "2024-05-01T00:00:00Z",
        "response": text,
        "done": true
    }))
}

/// Writes `count` records whose text is `record for <id>`.
pub fn write_input(dir: &Path, count: i64) -> PathBuf {
    let path = dir.join("records.csv");
    let mut content = String::from("person_id,health_record,clinic\n");
    for id in 1..=count {
        content.push_str(&format!("{id},\"record for {id}; BP 140/90\",north\n"));
    }
    std::fs::write(&path, content).unwrap();
    path
}

pub fn test_config(dir: &Path, count: i64, host: &str) -> RunConfig {
    let mut config = RunConfig::new(write_input(dir, count), dir.join("ages.csv"));
    config.host_url = host.to_string();
    config.model_name = "test-model".into();
    config.inference.pause_between_calls_ms = 0;
    config.inference.retry_backoff_ms = 1;
    config.inference.max_backoff_ms = 5;
    config
}

pub fn person_ids(state: &CheckpointState) -> Vec<i64> {
    state.results().iter().map(|r| r.person_id).collect()
}

/// Delegates to the CSV store and records the ids on disk after every persist.
#[derive(Clone, Default)]
pub struct RecordingStore {
    inner: CsvCheckpointStore,
    pub snapshots: Arc<Mutex<Vec<Vec<i64>>>>,
}

impl CheckpointStore for RecordingStore {
    fn load(&self, output_path: &Path) -> Result<CheckpointState> {
        self.inner.load(output_path)
    }

    fn persist(&self, state: &CheckpointState, output_path: &Path) -> Result<()> {
        self.inner.persist(state, output_path)?;
        let on_disk = self.inner.load(output_path)?;
        self.snapshots.lock().unwrap().push(person_ids(&on_disk));
        Ok(())
    }
}
