// task_provider.rs
use crate::database::{from_document, to_document, TASK_TABLE};
use crate::date_time::DateTimeProvider;
use crate::errors::{ModelError, Result};
use crate::task::{Task, TaskKind, TaskStatus, TaskUpdate};
use document_store::{DatabaseClient, Filter, OrderBy};
use std::sync::Arc;
use uuid::Uuid;

const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Accesos tipados a la tabla `task`.
pub struct TaskProvider {
  database: Arc<dyn DatabaseClient>,
  date_time: Arc<dyn DateTimeProvider>,
}

impl TaskProvider {
  pub fn new(database: Arc<dyn DatabaseClient>, date_time: Arc<dyn DateTimeProvider>) -> Self {
    Self { database, date_time }
  }

  fn key_filter(identifier: &str) -> Filter {
    Filter::new().eq("identifier", identifier)
  }

  fn status_filter(status: Option<TaskStatus>) -> Result<Filter> {
    Ok(match status {
      Some(status) => Filter::new().eq("status", serde_json::to_value(status)?),
      None => Filter::new(),
    })
  }

  pub fn create(&self, kind: TaskKind) -> Result<Task> {
    let now = self.date_time.now();
    let task = Task { identifier: Uuid::new_v4().to_string(),
                      kind,
                      status: TaskStatus::Pending,
                      should_cancel: false,
                      creation_date: now,
                      update_date: now };
    self.database.insert_one(TASK_TABLE, to_document(&task)?)?;
    log::debug!("Tarea {} ({}) creada", task.identifier, task.kind.task_type());
    Ok(task)
  }

  pub fn get(&self, identifier: &str) -> Result<Option<Task>> {
    self.database.find_one(TASK_TABLE, &Self::key_filter(identifier))?.map(from_document).transpose()
  }

  /// Tareas por orden de creación, opcionalmente filtradas por estado.
  pub fn get_list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
    self.database
        .find_many(TASK_TABLE, &Self::status_filter(status)?, 0, None, &[OrderBy::ascending("creation_date")])?
        .into_iter()
        .map(from_document)
        .collect()
  }

  pub fn count(&self, status: Option<TaskStatus>) -> Result<usize> {
    Ok(self.database.count(TASK_TABLE, &Self::status_filter(status)?)?)
  }

  /// Aplica el parche y devuelve la nueva instantánea. Una tarea terminada
  /// no cambia de estado; la escritura exige que el estado almacenado sea
  /// el que se validó.
  pub fn update_status(&self, task: &Task, update: TaskUpdate) -> Result<Task> {
    for _ in 0..MAX_UPDATE_ATTEMPTS {
      let current = self.get(&task.identifier)?
                        .ok_or_else(|| ModelError::NotFound(format!("tarea {}", task.identifier)))?;
      if let Some(next_status) = update.status.value() {
        if current.status.is_terminal() && *next_status != current.status {
          return Err(ModelError::InvalidTransition(format!("tarea {}: {:?} -> {:?}",
                                                           current.identifier, current.status, next_status)));
        }
      }
      let now = self.date_time.now();
      let filter = Self::key_filter(&task.identifier).eq("status", serde_json::to_value(current.status)?);
      if self.database.update_one(TASK_TABLE, &filter, update.to_document(now)?)? {
        return Ok(update.apply(&current, now));
      }
      log::debug!("La tarea {} cambió de estado durante la actualización", current.identifier);
    }
    Err(ModelError::InvalidTransition(format!("tarea {}: el estado cambia de forma concurrente", task.identifier)))
  }

  /// Marca la tarea para cancelación; el procesador la resuelve en el
  /// siguiente ciclo. Devuelve `false` si ya terminó.
  pub fn request_cancel(&self, identifier: &str) -> Result<bool> {
    let task = match self.get(identifier)? {
      Some(task) => task,
      None => return Err(ModelError::NotFound(format!("tarea {}", identifier))),
    };
    if task.status.is_terminal() {
      return Ok(false);
    }
    self.update_status(&task, TaskUpdate::cancel_requested())?;
    Ok(true)
  }
}
