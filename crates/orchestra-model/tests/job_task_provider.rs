use document_store::InMemoryDatabaseClient;
use orchestra_model::{initialize_database, FakeDateTimeProvider, JobDefinition, JobProvider, JobStep, ModelError,
                      TaskKind, TaskProvider, TaskStatus, TaskUpdate};
use serde_json::Map;
use std::sync::Arc;

fn definition(identifier: &str, description: &str) -> JobDefinition {
  JobDefinition { identifier: identifier.into(),
                  project: "my-project".into(),
                  description: Some(description.into()),
                  workspace: "my-project".into(),
                  steps: vec![JobStep { name: "build".into(), command: vec!["make".into()] }],
                  parameters: Vec::new(),
                  properties: Map::new() }
}

#[test]
fn job_update_keeps_enabled_flag_and_creation_date() {
  let database = Arc::new(InMemoryDatabaseClient::new());
  initialize_database(database.as_ref()).unwrap();
  let clock = Arc::new(FakeDateTimeProvider::new());
  let jobs = JobProvider::new(database, clock.clone());

  let created = jobs.create_or_update(definition("build", "first")).unwrap();
  assert!(created.is_enabled);
  let disabled = jobs.update_status("build", false).unwrap();
  assert!(!disabled.is_enabled);

  clock.advance(60);
  let updated = jobs.create_or_update(definition("build", "second")).unwrap();
  assert!(!updated.is_enabled);
  assert_eq!(updated.creation_date, created.creation_date);
  assert_ne!(updated.update_date, created.update_date);
  assert_eq!(jobs.get("build").unwrap().unwrap().description.as_deref(), Some("second"));
  assert_eq!(jobs.count(Some("my-project")).unwrap(), 1);
  assert_eq!(jobs.count(Some("other")).unwrap(), 0);

  assert!(matches!(jobs.update_status("missing", true), Err(ModelError::NotFound(_))));
  assert!(jobs.delete("build").unwrap());
  assert!(jobs.get_list(None, 0, None).unwrap().is_empty());
}

#[test]
fn task_lifecycle_and_cancel_requests() {
  let database = Arc::new(InMemoryDatabaseClient::new());
  initialize_database(database.as_ref()).unwrap();
  let clock = Arc::new(FakeDateTimeProvider::new());
  let tasks = TaskProvider::new(database, clock.clone());

  let reload = tasks.create(TaskKind::ReloadConfiguration).unwrap();
  clock.advance(1);
  let trigger = tasks.create(TaskKind::TriggerRun { run_identifier: "r1".into() }).unwrap();
  assert_eq!(tasks.count(Some(TaskStatus::Pending)).unwrap(), 2);
  let pending = tasks.get_list(Some(TaskStatus::Pending)).unwrap();
  assert_eq!(pending.iter().map(|t| t.identifier.clone()).collect::<Vec<_>>(),
             vec![reload.identifier.clone(), trigger.identifier.clone()]);

  assert!(tasks.request_cancel(&trigger.identifier).unwrap());
  assert!(tasks.get(&trigger.identifier).unwrap().unwrap().should_cancel);

  let done = tasks.update_status(&reload, TaskUpdate::status(TaskStatus::Succeeded)).unwrap();
  assert_eq!(done.status, TaskStatus::Succeeded);
  assert!(!tasks.request_cancel(&reload.identifier).unwrap());
  assert!(matches!(tasks.update_status(&done, TaskUpdate::status(TaskStatus::Running)),
                   Err(ModelError::InvalidTransition(_))));
  assert_eq!(tasks.count(None).unwrap(), 2);
}
