//! 检查点存储
//!
//! 检查点就是输出 CSV 本身：列头固定，每次持久化都完整重写，
//! 因此任何一个检查点都可以独立用于恢复。写入采用"临时文件 + rename"，
//! 读者永远看不到写了一半的文件。

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{AppError, Result};
use crate::models::{CheckpointState, EstimationResult};

pub trait CheckpointStore: Send + Sync {
    /// 读取已有的检查点；文件不存在时返回空状态
    fn load(&self, output_path: &Path) -> Result<CheckpointState>;

    /// 原子地写入完整结果集，覆盖上一个检查点
    fn persist(&self, state: &CheckpointState, output_path: &Path) -> Result<()>;
}

/// 基于 CSV 文件的检查点存储
#[derive(Debug, Clone, Default)]
pub struct CsvCheckpointStore;

impl CsvCheckpointStore {
    pub fn new() -> Self {
        Self
    }
}

/// 与输出文件同目录的临时文件路径
pub fn temp_path(output_path: &Path) -> PathBuf {
    let file_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkpoint".to_string());
    output_path.with_file_name(format!("{file_name}.tmp"))
}

fn corrupt(path: &Path, reason: impl Into<String>) -> AppError {
    AppError::CheckpointCorrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

impl CheckpointStore for CsvCheckpointStore {
    fn load(&self, output_path: &Path) -> Result<CheckpointState> {
        if !output_path.exists() {
            debug!(path = %output_path.display(), "No checkpoint found");
            return Ok(CheckpointState::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(output_path)
            .map_err(|e| corrupt(output_path, e.to_string()))?;

        let headers = reader
            .headers()
            .map_err(|e| corrupt(output_path, format!("unreadable header: {e}")))?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect::<Vec<_>>();
        let expected = EstimationResult::csv_headers();
        if headers != expected {
            return Err(corrupt(
                output_path,
                format!(
                    "unexpected header [{}], expected [{}]",
                    headers.join(","),
                    expected.join(",")
                ),
            ));
        }

        let mut results = Vec::new();
        for (idx, row) in reader.records().enumerate() {
            let line = idx + 2;
            let row = row.map_err(|e| corrupt(output_path, format!("line {line}: {e}")))?;
            let result = EstimationResult::from_csv_row(&row)
                .map_err(|e| corrupt(output_path, format!("line {line}: {e}")))?;
            results.push(result);
        }

        let state = CheckpointState::from_results(results).map_err(|person_id| {
            corrupt(output_path, format!("duplicate person_id {person_id}"))
        })?;

        info!(
            path = %output_path.display(),
            records = state.len(),
            "Checkpoint loaded"
        );
        Ok(state)
    }

    fn persist(&self, state: &CheckpointState, output_path: &Path) -> Result<()> {
        let tmp = temp_path(output_path);

        let write = || -> Result<()> {
            let mut writer = csv::Writer::from_writer(File::create(&tmp)?);
            writer.write_record(EstimationResult::csv_headers())?;
            for result in state.results() {
                writer.write_record(result.to_csv_row())?;
            }
            let file = writer
                .into_inner()
                .map_err(|e| AppError::Io(e.to_string()))?;
            file.sync_all()?;
            Ok(())
        };

        if let Err(e) = write().and_then(|_| fs::rename(&tmp, output_path).map_err(AppError::from))
        {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        debug!(
            path = %output_path.display(),
            records = state.len(),
            "Checkpoint persisted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgingSystem, ResultStatus};

    fn sample_state() -> CheckpointState {
        let mut ok = EstimationResult::empty(1, ResultStatus::Ok, "{\"overall biological age\": 62}");
        ok.biological_age = Some(62.0);
        ok.system_scores.insert(AgingSystem::Respiratory, Some(58.0));
        ok.reasoning = Some("multi-line\nreasoning, with \"quotes\"".into());
        ok.error = Some("degraded (json_object): missing: hepatic_age".into());
        ok.system_reasoning
            .insert(AgingSystem::Respiratory, Some("FEV1, 82% predicted".into()));
        ok.prompt_sent = "ROLE:\nestimate\n\nHEALTH RECORD:\nspirometry".into();

        let failed = EstimationResult::inference_error(2, "HTTP 500: boom");
        let unparsed = EstimationResult::empty(3, ResultStatus::ParseError, "???");

        let mut state = CheckpointState::new();
        state.push(ok);
        state.push(failed);
        state.push(unparsed);
        state
    }

    #[test]
    fn test_persist_then_load_reproduces_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let store = CsvCheckpointStore::new();
        let state = sample_state();

        store.persist(&state, &path).unwrap();
        let loaded = store.load(&path).unwrap();

        assert_eq!(loaded, state);
        assert_eq!(loaded.processed_ids(), state.processed_ids());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_failed_persist_keeps_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let store = CsvCheckpointStore::new();

        let mut state = CheckpointState::new();
        state.push(EstimationResult::empty(1, ResultStatus::ParseError, "a"));
        store.persist(&state, &path).unwrap();
        let before = fs::read(&path).unwrap();

        // 临时文件路径被目录占用，写入必然失败
        fs::create_dir(temp_path(&path)).unwrap();
        state.push(EstimationResult::empty(2, ResultStatus::ParseError, "b"));
        assert!(store.persist(&state, &path).is_err());

        assert_eq!(fs::read(&path).unwrap(), before);
        let loaded = store.load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.is_processed(1));
        assert!(!loaded.is_processed(2));
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CsvCheckpointStore::new()
            .load(&dir.path().join("absent.csv"))
            .unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_persist_overwrites_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let store = CsvCheckpointStore::new();

        let mut state = CheckpointState::new();
        state.push(EstimationResult::empty(1, ResultStatus::ParseError, "a"));
        store.persist(&state, &path).unwrap();
        state.push(EstimationResult::empty(2, ResultStatus::ParseError, "b"));
        store.persist(&state, &path).unwrap();

        assert_eq!(store.load(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_wrong_header_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "person_id,age\n1,60\n").unwrap();

        let err = CsvCheckpointStore::new().load(&path).unwrap_err();
        assert!(matches!(err, AppError::CheckpointCorrupt { .. }));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_truncated_row_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let store = CsvCheckpointStore::new();
        store.persist(&sample_state(), &path).unwrap();

        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("4,61,\n");
        fs::write(&path, content).unwrap();

        assert!(matches!(
            store.load(&path),
            Err(AppError::CheckpointCorrupt { .. })
        ));
    }

    #[test]
    fn test_empty_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "").unwrap();

        assert!(matches!(
            CsvCheckpointStore::new().load(&path),
            Err(AppError::CheckpointCorrupt { .. })
        ));
    }

    #[test]
    fn test_duplicate_rows_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let row = EstimationResult::empty(5, ResultStatus::ParseError, "x").to_csv_row();

        let mut writer = csv::Writer::from_path(&path).unwrap();
        writer.write_record(EstimationResult::csv_headers()).unwrap();
        writer.write_record(&row).unwrap();
        writer.write_record(&row).unwrap();
        writer.flush().unwrap();

        let err = CsvCheckpointStore::new().load(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate person_id 5"));
    }
}
