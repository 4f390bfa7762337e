use document_store::InMemoryDatabaseClient;
use orchestra_master::{Supervisor, WorkerState};
use orchestra_model::protocol::{decode_line, encode_line, MasterMessage, WorkerMessage};
use orchestra_model::{initialize_database, FakeDateTimeProvider, Job, MemoryDataStorage, RunProvider, RunSource,
                      RunStatus, RunStep, RunUpdate, StepStatus};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

fn run_provider() -> Arc<RunProvider> {
  let database = Arc::new(InMemoryDatabaseClient::new());
  initialize_database(database.as_ref()).unwrap();
  Arc::new(RunProvider::new(database, Arc::new(MemoryDataStorage::new()), Arc::new(FakeDateTimeProvider::new())))
}

fn job() -> Job {
  Job { identifier: "j1".into(),
        project: "p".into(),
        description: None,
        workspace: "p".into(),
        steps: Vec::new(),
        parameters: Vec::new(),
        properties: Map::new(),
        is_enabled: true,
        creation_date: chrono::Utc::now(),
        update_date: chrono::Utc::now() }
}

async fn send(stream: &mut tokio::net::tcp::OwnedWriteHalf, message: &WorkerMessage) {
  stream.write_all(encode_line(message).unwrap().as_bytes()).await.unwrap();
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
  for _ in 0..200 {
    if condition() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("la condición no se cumplió a tiempo");
}

#[tokio::test]
async fn worker_session_reports_are_persisted() {
  let runs = run_provider();
  let supervisor = Arc::new(Supervisor::new(runs.clone()));
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let address = listener.local_addr().unwrap();
  let token = CancellationToken::new();
  let server = tokio::spawn(supervisor.clone().run_server(listener, token.clone()));

  let (read_half, mut write_half) = TcpStream::connect(address).await.unwrap().into_split();
  let mut lines = BufReader::new(read_half).lines();
  send(&mut write_half, &WorkerMessage::Hello { worker_identifier: "w1".into() }).await;
  wait_for(|| supervisor.get_worker("w1").is_some()).await;

  let run = runs.create("p", "j1", Map::new(), RunSource::User { identifier: "alice".into() }).unwrap();
  let run = runs.update_status(&run, RunUpdate::new().status(RunStatus::Running).worker("w1")).unwrap();
  supervisor.assign_run("w1", &job(), &run).unwrap();

  let line = lines.next_line().await.unwrap().unwrap();
  match decode_line::<MasterMessage>(&line).unwrap() {
    MasterMessage::AssignRun { run_request } => assert_eq!(run_request.run_identifier, run.identifier),
    other => panic!("mensaje inesperado: {:?}", other),
  }

  let steps = vec![RunStep { index: 0, name: "build".into(), command: vec!["make".into()], status: StepStatus::Succeeded }];
  send(&mut write_half,
       &WorkerMessage::StepUpdate { run_identifier: run.identifier.clone(), steps: steps.clone() }).await;
  send(&mut write_half,
       &WorkerMessage::LogChunk { run_identifier: run.identifier.clone(),
                                  step_index: 0,
                                  step_name: "build".into(),
                                  text: "ok\n".into() }).await;
  send(&mut write_half,
       &WorkerMessage::Results { run_identifier: run.identifier.clone(), results: json!({"version": 3}) }).await;
  send(&mut write_half,
       &WorkerMessage::RunStatus { run_identifier: run.identifier.clone(),
                                   status: RunStatus::Succeeded,
                                   start_date: None,
                                   completion_date: Some(chrono::Utc::now()) }).await;

  let worker = supervisor.get_worker("w1").unwrap();
  wait_for(|| worker.state() == WorkerState::Idle).await;
  let stored = runs.find(&run.identifier).unwrap().unwrap();
  assert_eq!(stored.status, RunStatus::Succeeded);
  assert_eq!(stored.steps, Some(steps));
  assert_eq!(stored.results, Some(json!({"version": 3})));
  assert_eq!(runs.get_step_log("p", &run.identifier, 0).unwrap().0, "ok\n");

  // un segundo worker con el mismo identificador se rechaza
  let (duplicate_read, mut duplicate_write) = TcpStream::connect(address).await.unwrap().into_split();
  send(&mut duplicate_write, &WorkerMessage::Hello { worker_identifier: "w1".into() }).await;
  let mut duplicate_lines = BufReader::new(duplicate_read).lines();
  assert!(duplicate_lines.next_line().await.unwrap_or(None).is_none());

  token.cancel();
  tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();
  assert!(supervisor.list_workers().is_empty());
}

#[tokio::test]
async fn stop_request_closes_the_session_cleanly() {
  let supervisor = Arc::new(Supervisor::new(run_provider()));
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let address = listener.local_addr().unwrap();
  let token = CancellationToken::new();
  let server = tokio::spawn(supervisor.clone().run_server(listener, token.clone()));

  let (read_half, mut write_half) = TcpStream::connect(address).await.unwrap().into_split();
  let mut lines = BufReader::new(read_half).lines();
  send(&mut write_half, &WorkerMessage::Hello { worker_identifier: "w2".into() }).await;
  wait_for(|| supervisor.get_worker("w2").is_some()).await;

  assert!(supervisor.stop_worker("w2"));
  assert!(!supervisor.stop_worker("unknown"));
  let line = lines.next_line().await.unwrap().unwrap();
  assert_eq!(decode_line::<MasterMessage>(&line).unwrap(), MasterMessage::Stop);
  drop(write_half);
  drop(lines);
  wait_for(|| supervisor.get_worker("w2").is_none()).await;

  token.cancel();
  tokio::time::timeout(Duration::from_secs(5), server).await.unwrap().unwrap().unwrap();
}
