use document_store::InMemoryDatabaseClient;
use orchestra_master::{ConfigurationLoader, FirstAvailableWorkerSelector, JsonConfigurationLoader, Master, MasterConfig,
                       MasterConfiguration, MasterDependencies, MasterError, OperationStatus};
use orchestra_model::protocol::{decode_line, encode_line, MasterMessage, WorkerMessage};
use orchestra_model::{initialize_database, FakeDateTimeProvider, JobDefinition, JobStep, MemoryDataStorage, RunSource,
                      RunStatus, TaskStatus};
use serde_json::Map;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

fn job(identifier: &str) -> JobDefinition {
  JobDefinition { identifier: identifier.into(),
                  project: "my-project".into(),
                  description: Some("compila".into()),
                  workspace: "my-project".into(),
                  steps: vec![JobStep { name: "build".into(), command: vec!["make".into()] }],
                  parameters: Vec::new(),
                  properties: Map::new() }
}

fn master(jobs: Arc<Mutex<Vec<JobDefinition>>>) -> Master {
  let database = Arc::new(InMemoryDatabaseClient::new());
  initialize_database(database.as_ref()).unwrap();
  let loader = move || -> orchestra_master::Result<MasterConfiguration> {
    Ok(MasterConfiguration { jobs: jobs.lock().unwrap().clone() })
  };
  let config = MasterConfig { scheduler_interval: Duration::from_millis(100),
                              task_interval: Duration::from_millis(50),
                              ..MasterConfig::default() };
  Master::new(config,
              MasterDependencies { database,
                                   data_storage: Arc::new(MemoryDataStorage::new()),
                                   date_time: Arc::new(FakeDateTimeProvider::new()),
                                   worker_selector: Arc::new(FirstAvailableWorkerSelector),
                                   configuration_loader: Arc::new(loader) })
}

fn user() -> RunSource {
  RunSource::User { identifier: "alice".into() }
}

#[test]
fn reload_configuration_adds_updates_and_removes_jobs() {
  let jobs = Arc::new(Mutex::new(vec![job("build"), job("test")]));
  let master = master(jobs.clone());
  master.reload_configuration().unwrap();
  assert_eq!(master.job_provider().count(None).unwrap(), 2);

  master.control_service().disable("build").unwrap();
  *jobs.lock().unwrap() = vec![job("build")];
  master.reload_configuration().unwrap();
  let remaining = master.job_provider().get_list(None, 0, None).unwrap();
  assert_eq!(remaining.len(), 1);
  assert!(!remaining[0].is_enabled);
}

#[test]
fn default_tasks_are_registered_with_their_priorities() {
  let master = master(Arc::new(Mutex::new(Vec::new())));
  let mut registered = master.task_processor().registered_types();
  registered.sort_by_key(|(_, priority)| *priority);
  let priorities: Vec<u32> = registered.iter().map(|(_, p)| *p).collect();
  assert_eq!(priorities, vec![20, 50, 90, 95, 100]);
}

#[tokio::test]
async fn cancelling_a_trigger_task_cancels_its_run() {
  let master = master(Arc::new(Mutex::new(vec![job("build")])));
  master.reload_configuration().unwrap();
  let control = master.control_service();

  let (run_identifier, task_identifier) = control.trigger("build", Map::new(), user()).unwrap();
  assert_eq!(control.cancel_task(&task_identifier).unwrap(), OperationStatus::Succeeded);
  master.task_processor().process_pending(&CancellationToken::new()).await.unwrap();

  let task = master.task_provider().get(&task_identifier).unwrap().unwrap();
  assert_eq!(task.status, TaskStatus::Cancelled);
  let run = master.run_provider().find(&run_identifier).unwrap().unwrap();
  assert_eq!(run.status, RunStatus::Cancelled);
  assert_eq!(control.cancel(&run_identifier).unwrap(), OperationStatus::Failed);
  assert_eq!(control.abort(&run_identifier).unwrap(), OperationStatus::Failed);
  assert!(control.trigger("missing", Map::new(), user()).is_err());
}

#[test]
fn json_configuration_file_is_read_on_every_load() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("master_configuration.json");
  let loader = JsonConfigurationLoader::new(&path);
  assert!(matches!(loader.load(), Err(MasterError::Configuration(_))));

  let configuration = MasterConfiguration { jobs: vec![job("build")] };
  std::fs::write(&path, serde_json::to_string_pretty(&configuration).unwrap()).unwrap();
  assert_eq!(loader.load().unwrap(), configuration);

  std::fs::write(&path, r#"{"jobs": [{"identifier": "lint", "project": "p", "workspace": "p", "steps": []}]}"#).unwrap();
  let reloaded = loader.load().unwrap();
  assert_eq!(reloaded.jobs.len(), 1);
  assert_eq!(reloaded.jobs[0].identifier, "lint");
  assert!(reloaded.jobs[0].parameters.is_empty());

  std::fs::write(&path, "{ no es json").unwrap();
  assert!(matches!(loader.load(), Err(MasterError::Configuration(_))));
}

#[test]
fn trigger_task_waits_for_a_worker() {
  let master = master(Arc::new(Mutex::new(vec![job("build")])));
  master.reload_configuration().unwrap();
  let control = master.control_service();
  let (run_identifier, task_identifier) = control.trigger("build", Map::new(), user()).unwrap();

  tokio_test::block_on(master.task_processor().process_pending(&CancellationToken::new())).unwrap();
  assert_eq!(master.task_provider().get(&task_identifier).unwrap().unwrap().status, TaskStatus::Pending);

  let (_worker, mut receiver) = master.supervisor().register_worker("w1").unwrap();
  tokio_test::block_on(master.task_processor().process_pending(&CancellationToken::new())).unwrap();
  assert_eq!(master.task_provider().get(&task_identifier).unwrap().unwrap().status, TaskStatus::Succeeded);
  assert!(matches!(receiver.try_recv().unwrap(), MasterMessage::AssignRun { .. }));
  assert_eq!(master.run_provider().find(&run_identifier).unwrap().unwrap().status, RunStatus::Running);
}

#[tokio::test]
async fn full_run_through_a_connected_worker() {
  let master = Arc::new(master(Arc::new(Mutex::new(vec![job("build")]))));
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let address = listener.local_addr().unwrap();
  let token = CancellationToken::new();
  let running = {
    let master = master.clone();
    let token = token.clone();
    tokio::spawn(async move { master.run(listener, token).await })
  };

  let (read_half, mut write_half) = TcpStream::connect(address).await.unwrap().into_split();
  let mut lines = BufReader::new(read_half).lines();
  let hello = WorkerMessage::Hello { worker_identifier: "w1".into() };
  write_half.write_all(encode_line(&hello).unwrap().as_bytes()).await.unwrap();

  // la configuración se carga al arrancar; esperar a que el job exista
  for _ in 0..100 {
    if master.job_provider().get("build").unwrap().is_some() {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  let (run_identifier, task_identifier) = master.control_service().trigger("build", Map::new(), user()).unwrap();

  let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line()).await.unwrap().unwrap().unwrap();
  match decode_line::<MasterMessage>(&line).unwrap() {
    MasterMessage::AssignRun { run_request } => assert_eq!(run_request.run_identifier, run_identifier),
    other => panic!("mensaje inesperado: {:?}", other),
  }
  let done = WorkerMessage::RunStatus { run_identifier: run_identifier.clone(),
                                        status: RunStatus::Succeeded,
                                        start_date: None,
                                        completion_date: None };
  write_half.write_all(encode_line(&done).unwrap().as_bytes()).await.unwrap();

  for _ in 0..200 {
    let run = master.run_provider().find(&run_identifier).unwrap().unwrap();
    let task = master.task_provider().get(&task_identifier).unwrap().unwrap();
    if run.status == RunStatus::Succeeded && task.status == TaskStatus::Succeeded {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  assert_eq!(master.run_provider().find(&run_identifier).unwrap().unwrap().status, RunStatus::Succeeded);
  assert_eq!(master.task_provider().get(&task_identifier).unwrap().unwrap().status, TaskStatus::Succeeded);

  token.cancel();
  tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap().unwrap();
}
