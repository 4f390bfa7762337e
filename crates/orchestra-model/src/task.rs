// task.rs
use crate::run::FieldUpdate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Operaciones de control que procesa el `TaskProcessor`. Cada variante
/// lleva su carga tipada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "snake_case")]
pub enum TaskKind {
  ReloadConfiguration,
  StopWorker { worker_identifier: String },
  TriggerRun { run_identifier: String },
  CancelRun { run_identifier: String },
  AbortRun { run_identifier: String },
}

/// Discriminante de `TaskKind`, usado como clave de la tabla de handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
  ReloadConfiguration,
  StopWorker,
  TriggerRun,
  CancelRun,
  AbortRun,
}

impl TaskKind {
  pub fn task_type(&self) -> TaskType {
    match self {
      TaskKind::ReloadConfiguration => TaskType::ReloadConfiguration,
      TaskKind::StopWorker { .. } => TaskType::StopWorker,
      TaskKind::TriggerRun { .. } => TaskType::TriggerRun,
      TaskKind::CancelRun { .. } => TaskType::CancelRun,
      TaskKind::AbortRun { .. } => TaskType::AbortRun,
    }
  }
}

impl fmt::Display for TaskType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      TaskType::ReloadConfiguration => "reload_configuration",
      TaskType::StopWorker => "stop_worker",
      TaskType::TriggerRun => "trigger_run",
      TaskType::CancelRun => "cancel_run",
      TaskType::AbortRun => "abort_run",
    };
    write!(f, "{}", s)
  }
}

/// Estado de una tarea.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
  Exception,
  Cancelled,
}

impl TaskStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, TaskStatus::Pending | TaskStatus::Running)
  }
}

/// Registro persistido de una tarea.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub identifier: String,
  pub kind: TaskKind,
  pub status: TaskStatus,
  pub should_cancel: bool,
  pub creation_date: DateTime<Utc>,
  pub update_date: DateTime<Utc>,
}

/// Parche sobre una tarea.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
  pub status: FieldUpdate<TaskStatus>,
  pub should_cancel: FieldUpdate<bool>,
}

impl TaskUpdate {
  pub fn status(status: TaskStatus) -> Self {
    Self { status: FieldUpdate::Set(status), ..Default::default() }
  }

  pub fn cancel_requested() -> Self {
    Self { should_cancel: FieldUpdate::Set(true), ..Default::default() }
  }

  pub fn apply(&self, task: &Task, update_date: DateTime<Utc>) -> Task {
    let mut next = task.clone();
    next.status = self.status.or(next.status);
    next.should_cancel = self.should_cancel.or(next.should_cancel);
    next.update_date = update_date;
    next
  }

  pub fn to_document(&self, update_date: DateTime<Utc>) -> serde_json::Result<Map<String, JsonValue>> {
    let mut document = Map::new();
    self.status.write_into("status", &mut document)?;
    self.should_cancel.write_into("should_cancel", &mut document)?;
    document.insert("update_date".to_string(), serde_json::to_value(update_date)?);
    Ok(document)
  }
}
