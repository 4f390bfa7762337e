use orchestra_model::protocol::RunRequest;
use orchestra_model::{JobStep, RunStatus};
use orchestra_worker::{LocalRunStatus, WorkerStorage};
use serde_json::{json, Map};

fn request(job: &str, run: &str) -> RunRequest {
  RunRequest { project: "p".into(),
               run_identifier: run.into(),
               job_identifier: job.into(),
               workspace: "p".into(),
               steps: vec![JobStep { name: "build".into(), command: vec!["make".into()] }],
               parameters: Map::new() }
}

#[test]
fn runs_are_listed_from_their_requests() {
  let dir = tempfile::tempdir().unwrap();
  let storage = WorkerStorage::new(dir.path());
  assert!(storage.list_runs().unwrap().is_empty());

  storage.create_run("build", "r2").unwrap();
  storage.save_request(&request("build", "r2")).unwrap();
  storage.create_run("test", "r1").unwrap();
  storage.save_request(&request("test", "r1")).unwrap();
  // un directorio sin request.json no cuenta como run
  std::fs::create_dir_all(dir.path().join("runs").join("stray")).unwrap();

  assert_eq!(storage.list_runs().unwrap(),
             vec![("build".to_string(), "r2".to_string()), ("test".to_string(), "r1".to_string())]);
  assert!(storage.create_run("build", "r2").is_err());

  storage.delete_run("build", "r2").unwrap();
  assert_eq!(storage.list_runs().unwrap().len(), 1);
  assert!(!storage.run_directory("build", "r2").exists());
}

#[test]
fn missing_files_read_as_defaults() {
  let dir = tempfile::tempdir().unwrap();
  let storage = WorkerStorage::new(dir.path());
  storage.create_run("j", "r").unwrap();

  assert_eq!(storage.load_status("j", "r").unwrap(), LocalRunStatus::unknown("j", "r"));
  assert_eq!(storage.load_results("j", "r").unwrap(), json!({}));
  assert_eq!(storage.load_log("j", "r", 0, "build").unwrap(), "");
  assert_eq!(storage.load_log_chunk("j", "r", 0, "build", 0).unwrap(), (String::new(), 0));
}

#[test]
fn status_results_and_logs_are_kept_per_run() {
  let dir = tempfile::tempdir().unwrap();
  let storage = WorkerStorage::new(dir.path());
  storage.create_run("j", "r").unwrap();
  storage.save_request(&request("j", "r")).unwrap();
  assert_eq!(storage.load_request("j", "r").unwrap(), request("j", "r"));

  let mut status = LocalRunStatus::unknown("j", "r");
  status.status = Some(RunStatus::Running);
  storage.save_status(&status).unwrap();
  assert_eq!(storage.load_status("j", "r").unwrap().status, Some(RunStatus::Running));
  assert!(!storage.run_directory("j", "r").join("status.json.tmp").exists());

  storage.save_results("j", "r", &json!({"artifact": "app.zip"})).unwrap();
  assert_eq!(storage.load_results("j", "r").unwrap(), json!({"artifact": "app.zip"}));

  let log_path = storage.log_path("j", "r", 1, "package");
  assert!(log_path.ends_with("runs/j_r/step_1_package.log"));
  std::fs::write(&log_path, "line 1\nline 2\n").unwrap();
  assert_eq!(storage.load_log("j", "r", 1, "package").unwrap(), "line 1\nline 2\n");
  let (text, offset) = storage.load_log_chunk("j", "r", 1, "package", 7).unwrap();
  assert_eq!(text, "line 2\n");
  assert_eq!(offset, 14);
}
