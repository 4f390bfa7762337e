use orchestra_model::RunStatus;
use orchestra_worker::{ExecutorWatcher, LocalRunStatus, TerminationOutcome, WorkerStorage};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

fn shell(script: &str) -> Vec<String> {
  vec!["sh".into(), "-c".into(), script.into()]
}

#[tokio::test]
async fn terminate_forces_a_process_that_ignores_sigint() {
  let mut watcher = ExecutorWatcher::new("j", "r");
  watcher.start(&shell("trap '' INT; exec sleep 30"), None).unwrap();
  assert!(watcher.is_running());
  // dar tiempo a que el trap quede instalado
  tokio::time::sleep(Duration::from_millis(200)).await;

  let started = Instant::now();
  let outcome = watcher.terminate(Duration::from_secs(1)).await.unwrap();
  assert_eq!(outcome, TerminationOutcome::Forced);
  assert!(started.elapsed() < Duration::from_secs(5));
  assert!(!watcher.is_running());
}

#[tokio::test]
async fn terminate_is_graceful_when_the_process_honours_sigint() {
  let mut watcher = ExecutorWatcher::new("j", "r");
  watcher.start(&["sleep".to_string(), "30".to_string()], None).unwrap();
  let outcome = watcher.terminate(Duration::from_secs(5)).await.unwrap();
  assert_eq!(outcome, TerminationOutcome::Graceful);
  assert_eq!(watcher.terminate(Duration::from_secs(1)).await.unwrap(), TerminationOutcome::NotRunning);
}

#[test]
fn watcher_that_never_started_is_not_running() {
  let mut watcher = ExecutorWatcher::new("j", "r");
  assert!(!watcher.is_running());
  watcher.abort().unwrap();
  let outcome = tokio_test::block_on(watcher.terminate(Duration::from_secs(1))).unwrap();
  assert_eq!(outcome, TerminationOutcome::NotRunning);
  assert!(tokio_test::block_on(watcher.wait()).unwrap().is_none());
}

#[tokio::test]
async fn output_lines_are_relayed() {
  let (sender, mut receiver) = mpsc::unbounded_channel();
  let mut watcher = ExecutorWatcher::new("j", "r");
  watcher.start(&shell("echo hello; echo oops 1>&2"), Some(sender)).unwrap();
  let status = watcher.wait().await.unwrap().unwrap();
  assert!(status.success());

  let mut lines = Vec::new();
  while let Ok(line) = receiver.try_recv() {
    lines.push(line);
  }
  lines.sort();
  assert_eq!(lines, vec!["hello".to_string(), "oops".to_string()]);
}

#[tokio::test]
async fn executor_exit_without_final_status_becomes_exception() {
  let dir = tempfile::tempdir().unwrap();
  let storage = WorkerStorage::new(dir.path());
  storage.create_run("j", "r").unwrap();

  let mut watcher = ExecutorWatcher::new("j", "r");
  watcher.start(&shell("exit 3"), None).unwrap();
  watcher.wait().await.unwrap();

  assert!(watcher.check_termination(&storage).unwrap());
  let status = storage.load_status("j", "r").unwrap();
  assert_eq!(status.status, Some(RunStatus::Exception));
  assert!(status.completion_date.is_some());
  assert!(!watcher.check_termination(&storage).unwrap());
}

#[tokio::test]
async fn final_status_written_by_the_executor_is_kept() {
  let dir = tempfile::tempdir().unwrap();
  let storage = WorkerStorage::new(dir.path());
  storage.create_run("j", "r").unwrap();
  let mut status = LocalRunStatus::unknown("j", "r");
  status.status = Some(RunStatus::Failed);
  storage.save_status(&status).unwrap();

  let mut watcher = ExecutorWatcher::new("j", "r");
  assert!(!watcher.check_termination(&storage).unwrap());
  assert_eq!(storage.load_status("j", "r").unwrap().status, Some(RunStatus::Failed));
}
