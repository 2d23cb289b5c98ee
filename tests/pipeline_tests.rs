// End-to-end tests for the batch pipeline against a mock inference service
//
// Tests cover:
// - One result per input record
// - Per-record inference failures and checkpoint cadence
// - Resume after interruption
// - Record limit
// - Idempotent reruns

mod common;

use std::collections::HashSet;
use std::time::Duration;

use bioage::models::{AgingSystem, ResultStatus};
use bioage::services::{BatchRunner, CheckpointStore, CsvCheckpointStore, OllamaInferenceClient, RunPhase};
use common::{FULL_RESPONSE, GENERATE_PATH, RecordingStore, ollama_reply, person_ids, test_config};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_success(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ollama_reply(FULL_RESPONSE))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_every_input_gets_exactly_one_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("record for 3;"))
        .respond_with(ollama_reply("I am unable to provide an estimate."))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("record for 4;"))
        .respond_with(ollama_reply("Biological age: 58\nRenal: 61"))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_success(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path(), 6, &server.uri());
    let report = BatchRunner::with_ollama(config.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    let state = CsvCheckpointStore::new().load(&config.output_path).unwrap();
    assert_eq!(person_ids(&state), vec![1, 2, 3, 4, 5, 6]);
    let unique: HashSet<i64> = person_ids(&state).into_iter().collect();
    assert_eq!(unique.len(), 6);

    assert_eq!(report.summary.ok, 5);
    assert_eq!(report.summary.parse_error, 1);
    assert_eq!(report.summary.degraded, 1);

    let unparsed = &state.results()[2];
    assert_eq!(unparsed.status, ResultStatus::ParseError);
    assert_eq!(unparsed.raw_response, "I am unable to provide an estimate.");

    let partial = &state.results()[3];
    assert_eq!(partial.status, ResultStatus::Ok);
    assert_eq!(partial.biological_age, Some(58.0));
    assert_eq!(partial.system_score(AgingSystem::Renal), Some(61.0));
    assert_eq!(partial.system_score(AgingSystem::Hepatic), None);

    let complete = &state.results()[0];
    assert_eq!(complete.biological_age, Some(63.0));
    assert_eq!(complete.system_score(AgingSystem::OralSensory), Some(65.0));
    assert_eq!(
        complete.reasoning_for(AgingSystem::Cardiovascular),
        Some("BP 140/90 with raised LDL.")
    );
    assert!(complete.prompt_sent.contains("record for 1; BP 140/90"));
}

#[tokio::test]
async fn test_inference_failure_on_one_record_with_checkpoint_after_each() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .and(body_string_contains("record for 2;"))
        .respond_with(ResponseTemplate::new(500).set_body_string("runner crashed"))
        .with_priority(1)
        .expect(3)
        .mount(&server)
        .await;
    mount_success(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 3, &server.uri());
    config.checkpoint_every = 1;
    config.inference.max_attempts = 3;

    let store = RecordingStore::default();
    let snapshots = store.snapshots.clone();
    let client = OllamaInferenceClient::new(&config).unwrap();
    let mut runner = BatchRunner::new(config.clone(), Box::new(client), Box::new(store));
    runner.run().await.unwrap();
    assert_eq!(runner.phase(), RunPhase::Done);

    let snapshots = snapshots.lock().unwrap().clone();
    assert_eq!(snapshots[0], vec![1]);
    assert_eq!(snapshots[1], vec![1, 2]);
    assert_eq!(snapshots[2], vec![1, 2, 3]);
    assert_eq!(snapshots.last().unwrap(), &vec![1, 2, 3]);

    let state = CsvCheckpointStore::new().load(&config.output_path).unwrap();
    assert_eq!(state.len(), 3);
    let failed = &state.results()[1];
    assert_eq!(failed.person_id, 2);
    assert_eq!(failed.status, ResultStatus::InferenceError);
    assert!(failed.biological_age.is_none());
    assert!(failed.system_scores.values().all(Option::is_none));
    assert_eq!(state.results()[2].status, ResultStatus::Ok);
}

#[tokio::test]
async fn test_resume_after_interruption_processes_only_remaining() {
    let dir = tempfile::tempdir().unwrap();

    // Record 4 hangs so the first run is cut off after the checkpoint at record 3.
    let first = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("record for 4;"))
        .respond_with(ollama_reply(FULL_RESPONSE).set_delay(Duration::from_secs(30)))
        .with_priority(1)
        .mount(&first)
        .await;
    mount_success(&first).await;

    let config = test_config(dir.path(), 5, &first.uri());
    let mut runner = BatchRunner::with_ollama(config.clone()).unwrap();
    let interrupted = tokio::time::timeout(Duration::from_secs(2), runner.run()).await;
    assert!(interrupted.is_err(), "first run should have been interrupted");

    let before = CsvCheckpointStore::new().load(&config.output_path).unwrap();
    assert_eq!(person_ids(&before), vec![1, 2, 3]);

    let second = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ollama_reply(FULL_RESPONSE))
        .expect(2)
        .mount(&second)
        .await;

    let mut resumed_config = config.clone();
    resumed_config.host_url = second.uri();
    let report = BatchRunner::with_ollama(resumed_config)
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(report.summary.resumed, 3);
    assert_eq!(report.summary.processed, 2);

    let after = CsvCheckpointStore::new().load(&config.output_path).unwrap();
    assert_eq!(person_ids(&after), vec![1, 2, 3, 4, 5]);
    assert_eq!(&after.results()[..3], before.results());
}

#[tokio::test]
async fn test_limit_processes_exactly_that_many_records() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ollama_reply(FULL_RESPONSE))
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 10, &server.uri());
    config.limit = Some(2);

    let report = BatchRunner::with_ollama(config.clone())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(report.summary.processed, 2);
    assert_eq!(report.summary.total_input, 10);

    let state = CsvCheckpointStore::new().load(&config.output_path).unwrap();
    assert_eq!(person_ids(&state), vec![1, 2]);
}

#[tokio::test]
async fn test_limit_counts_only_records_processed_in_this_run() {
    let server = MockServer::start().await;
    mount_success(&server).await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 10, &server.uri());
    config.limit = Some(3);

    BatchRunner::with_ollama(config.clone()).unwrap().run().await.unwrap();
    let report = BatchRunner::with_ollama(config.clone()).unwrap().run().await.unwrap();

    assert_eq!(report.summary.resumed, 3);
    assert_eq!(report.summary.processed, 3);
    let state = CsvCheckpointStore::new().load(&config.output_path).unwrap();
    assert_eq!(person_ids(&state), vec![1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn test_rerun_with_resume_is_idempotent() {
    let server = MockServer::start().await;
    mount_success(&server).await;

    let once_dir = tempfile::tempdir().unwrap();
    let once = test_config(once_dir.path(), 4, &server.uri());
    BatchRunner::with_ollama(once.clone()).unwrap().run().await.unwrap();

    let twice_dir = tempfile::tempdir().unwrap();
    let twice = test_config(twice_dir.path(), 4, &server.uri());
    BatchRunner::with_ollama(twice.clone()).unwrap().run().await.unwrap();
    let report = BatchRunner::with_ollama(twice.clone()).unwrap().run().await.unwrap();
    assert_eq!(report.summary.processed, 0);
    assert_eq!(report.summary.resumed, 4);

    let once_bytes = std::fs::read(&once.output_path).unwrap();
    let twice_bytes = std::fs::read(&twice.output_path).unwrap();
    assert_eq!(once_bytes, twice_bytes);
}

#[tokio::test]
async fn test_id_window_selects_subset() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(GENERATE_PATH))
        .respond_with(ollama_reply(FULL_RESPONSE))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 8, &server.uri());
    config.start_id = Some(3);
    config.end_id = Some(5);

    BatchRunner::with_ollama(config.clone()).unwrap().run().await.unwrap();
    let state = CsvCheckpointStore::new().load(&config.output_path).unwrap();
    assert_eq!(person_ids(&state), vec![3, 4, 5]);
}
