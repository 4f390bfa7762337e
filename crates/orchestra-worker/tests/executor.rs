use orchestra_model::protocol::RunRequest;
use orchestra_model::{JobStep, RunStatus, StepStatus};
use orchestra_worker::{Executor, WorkerStorage};
use serde_json::{json, Map, Value as JsonValue};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn step(name: &str, command: &[&str]) -> JobStep {
  JobStep { name: name.into(), command: command.iter().map(|c| c.to_string()).collect() }
}

fn prepare(storage: &WorkerStorage, steps: Vec<JobStep>, parameters: Map<String, JsonValue>) -> Executor {
  let request = RunRequest { project: "p".into(),
                             run_identifier: "r1".into(),
                             job_identifier: "j1".into(),
                             workspace: "my-workspace".into(),
                             steps,
                             parameters };
  storage.create_run("j1", "r1").unwrap();
  storage.save_request(&request).unwrap();
  Executor::new(storage.clone(), "j1", "r1")
}

fn step_statuses(storage: &WorkerStorage) -> Vec<StepStatus> {
  storage.load_status("j1", "r1").unwrap().steps.iter().map(|s| s.status).collect()
}

#[tokio::test]
async fn steps_after_a_failure_are_skipped() {
  let dir = tempfile::tempdir().unwrap();
  let storage = WorkerStorage::new(dir.path());
  let steps = vec![step("hello", &["echo", "hello"]), step("broken", &["false"]), step("never", &["echo", "no"])];
  let executor = prepare(&storage, steps, Map::new());

  assert_eq!(executor.run(CancellationToken::new()).await.unwrap(), RunStatus::Failed);
  let status = storage.load_status("j1", "r1").unwrap();
  assert_eq!(status.status, Some(RunStatus::Failed));
  assert!(status.start_date.is_some() && status.completion_date.is_some());
  assert_eq!(step_statuses(&storage), vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Skipped]);
  assert_eq!(storage.load_log("j1", "r1", 0, "hello").unwrap(), "hello\n");
  assert!(!storage.log_path("j1", "r1", 2, "never").exists());
}

#[tokio::test]
async fn commands_are_resolved_and_run_inside_the_workspace() {
  let dir = tempfile::tempdir().unwrap();
  let storage = WorkerStorage::new(dir.path());
  let parameters = json!({"message": "hola", "marker": "built.txt"}).as_object().cloned().unwrap();
  let executor = prepare(&storage,
                         vec![step("say", &["echo", "{message}"]), step("touch", &["touch", "{marker}"])],
                         parameters);

  assert_eq!(executor.run(CancellationToken::new()).await.unwrap(), RunStatus::Succeeded);
  assert_eq!(storage.load_log("j1", "r1", 0, "say").unwrap(), "hola\n");
  assert!(storage.workspace_directory("my-workspace").join("built.txt").is_file());
}

#[tokio::test]
async fn unresolvable_placeholder_is_an_exception() {
  let dir = tempfile::tempdir().unwrap();
  let storage = WorkerStorage::new(dir.path());
  let executor = prepare(&storage,
                         vec![step("bad", &["echo", "{ORCHESTRA_NOT_A_PARAMETER}"]), step("after", &["true"])],
                         Map::new());

  assert_eq!(executor.run(CancellationToken::new()).await.unwrap(), RunStatus::Exception);
  assert_eq!(step_statuses(&storage), vec![StepStatus::Exception, StepStatus::Skipped]);
}

#[tokio::test]
async fn steps_can_publish_results() {
  let dir = tempfile::tempdir().unwrap();
  let storage = WorkerStorage::new(dir.path());
  let executor = prepare(&storage,
                         vec![step("publish", &["sh", "-c", "echo '{{\"version\": 7}}' > \"$ORCHESTRA_RESULTS_FILE\""])],
                         Map::new());

  assert_eq!(executor.run(CancellationToken::new()).await.unwrap(), RunStatus::Succeeded);
  assert_eq!(storage.load_results("j1", "r1").unwrap(), json!({"version": 7}));
}

#[tokio::test]
async fn abort_stops_the_current_step_and_skips_the_rest() {
  let dir = tempfile::tempdir().unwrap();
  let storage = WorkerStorage::new(dir.path());
  let executor = prepare(&storage, vec![step("long", &["sleep", "30"]), step("after", &["echo", "late"])], Map::new());

  let token = CancellationToken::new();
  let started = Instant::now();
  let running = tokio::spawn({
    let token = token.clone();
    async move { executor.run(token).await }
  });
  for _ in 0..100 {
    if step_statuses(&storage).first() == Some(&StepStatus::Running) {
      break;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  token.cancel();

  let status = tokio::time::timeout(Duration::from_secs(10), running).await.unwrap().unwrap().unwrap();
  assert_eq!(status, RunStatus::Aborted);
  assert!(started.elapsed() < Duration::from_secs(10));
  assert_eq!(step_statuses(&storage), vec![StepStatus::Aborted, StepStatus::Skipped]);
  assert_eq!(storage.load_status("j1", "r1").unwrap().status, Some(RunStatus::Aborted));
}
