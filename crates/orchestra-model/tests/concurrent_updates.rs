use document_store::{DatabaseClient, Document, Filter, InMemoryDatabaseClient, OrderBy};
use orchestra_model::{initialize_database, FakeDateTimeProvider, MemoryDataStorage, ModelError, RunProvider, RunSource,
                      RunStatus, RunUpdate, TaskKind, TaskProvider, TaskStatus, TaskUpdate};
use serde_json::{json, Map};
use std::sync::{Arc, Mutex};

/// Cliente que aplica una escritura ajena justo antes de la siguiente
/// `update_one`, como haría otro escritor entre la lectura y la escritura.
struct InterleavedWriteClient {
  inner: InMemoryDatabaseClient,
  competing_write: Mutex<Option<(Filter, Document)>>,
}

impl InterleavedWriteClient {
  fn new() -> Self {
    let inner = InMemoryDatabaseClient::new();
    initialize_database(&inner).unwrap();
    Self { inner, competing_write: Mutex::new(None) }
  }

  fn before_next_update(&self, filter: Filter, update: serde_json::Value) {
    *self.competing_write.lock().unwrap() = Some((filter, update.as_object().cloned().unwrap()));
  }
}

impl DatabaseClient for InterleavedWriteClient {
  fn count(&self, table: &str, filter: &Filter) -> document_store::Result<usize> {
    self.inner.count(table, filter)
  }

  fn find_many(&self,
               table: &str,
               filter: &Filter,
               skip: usize,
               limit: Option<usize>,
               order_by: &[OrderBy])
               -> document_store::Result<Vec<Document>> {
    self.inner.find_many(table, filter, skip, limit, order_by)
  }

  fn find_one(&self, table: &str, filter: &Filter) -> document_store::Result<Option<Document>> {
    self.inner.find_one(table, filter)
  }

  fn insert_one(&self, table: &str, document: Document) -> document_store::Result<()> {
    self.inner.insert_one(table, document)
  }

  fn insert_many(&self, table: &str, documents: Vec<Document>) -> document_store::Result<()> {
    self.inner.insert_many(table, documents)
  }

  fn update_one(&self, table: &str, filter: &Filter, update: Document) -> document_store::Result<bool> {
    let competing = self.competing_write.lock().unwrap().take();
    if let Some((competing_filter, competing_update)) = competing {
      self.inner.update_one(table, &competing_filter, competing_update)?;
    }
    self.inner.update_one(table, filter, update)
  }

  fn delete_one(&self, table: &str, filter: &Filter) -> document_store::Result<bool> {
    self.inner.delete_one(table, filter)
  }

  fn list_tables(&self) -> document_store::Result<Vec<String>> {
    self.inner.list_tables()
  }
}

fn user() -> RunSource {
  RunSource::User { identifier: "alice".into() }
}

#[test]
fn terminal_status_written_between_read_and_write_is_kept() {
  let database = Arc::new(InterleavedWriteClient::new());
  let runs = RunProvider::new(database.clone(),
                              Arc::new(MemoryDataStorage::new()),
                              Arc::new(FakeDateTimeProvider::new()));
  let run = runs.create("p", "j", Map::new(), user()).unwrap();
  let running = runs.update_status(&run, RunUpdate::new().status(RunStatus::Running).worker("w1")).unwrap();

  // el worker informa `succeeded` mientras se pide el abort
  database.before_next_update(Filter::new().eq("identifier", run.identifier.as_str()),
                              json!({"status": "succeeded"}));
  let err = runs.update_status(&running, RunUpdate::new().status(RunStatus::Aborting)).unwrap_err();
  assert!(matches!(err, ModelError::InvalidTransition(_)));
  assert_eq!(runs.get("p", &run.identifier).unwrap().unwrap().status, RunStatus::Succeeded);
}

#[test]
fn compatible_status_written_concurrently_is_revalidated() {
  let database = Arc::new(InterleavedWriteClient::new());
  let runs = RunProvider::new(database.clone(),
                              Arc::new(MemoryDataStorage::new()),
                              Arc::new(FakeDateTimeProvider::new()));
  let run = runs.create("p", "j", Map::new(), user()).unwrap();
  let running = runs.update_status(&run, RunUpdate::new().status(RunStatus::Running).worker("w1")).unwrap();

  // aborting -> failed sigue siendo válido al releer
  database.before_next_update(Filter::new().eq("identifier", run.identifier.as_str()),
                              json!({"status": "aborting"}));
  let failed = runs.update_status(&running, RunUpdate::new().status(RunStatus::Failed)).unwrap();
  assert_eq!(failed.status, RunStatus::Failed);
  assert_eq!(runs.get("p", &run.identifier).unwrap().unwrap().status, RunStatus::Failed);
}

#[test]
fn racing_abort_never_overwrites_a_terminal_report() {
  for _ in 0..50 {
    let database = Arc::new(InMemoryDatabaseClient::new());
    initialize_database(database.as_ref()).unwrap();
    let runs = RunProvider::new(database, Arc::new(MemoryDataStorage::new()), Arc::new(FakeDateTimeProvider::new()));
    let run = runs.create("p", "j", Map::new(), user()).unwrap();
    let running = runs.update_status(&run, RunUpdate::new().status(RunStatus::Running).worker("w1")).unwrap();

    std::thread::scope(|scope| {
      scope.spawn(|| {
             let _ = runs.update_status(&running, RunUpdate::new().status(RunStatus::Aborting));
           });
      scope.spawn(|| {
             runs.update_status(&running, RunUpdate::new().status(RunStatus::Succeeded)).unwrap();
           });
    });
    assert_eq!(runs.get("p", &run.identifier).unwrap().unwrap().status, RunStatus::Succeeded);
  }
}

#[test]
fn finished_task_is_not_reopened_by_a_concurrent_write() {
  let database = Arc::new(InterleavedWriteClient::new());
  let tasks = TaskProvider::new(database.clone(), Arc::new(FakeDateTimeProvider::new()));
  let task = tasks.create(TaskKind::ReloadConfiguration).unwrap();
  let running = tasks.update_status(&task, TaskUpdate::status(TaskStatus::Running)).unwrap();

  database.before_next_update(Filter::new().eq("identifier", task.identifier.as_str()),
                              json!({"status": serde_json::to_value(TaskStatus::Cancelled).unwrap()}));
  let err = tasks.update_status(&running, TaskUpdate::status(TaskStatus::Succeeded)).unwrap_err();
  assert!(matches!(err, ModelError::InvalidTransition(_)));
  assert_eq!(tasks.get(&task.identifier).unwrap().unwrap().status, TaskStatus::Cancelled);
}
