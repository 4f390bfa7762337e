// Archivo: tasks.rs
// Propósito: handlers de las tareas de control por defecto.
use crate::blocking::run_blocking;
use crate::configuration::{reload_configuration, ConfigurationLoader};
use crate::errors::{MasterError, Result};
use crate::job_scheduler::JobScheduler;
use crate::supervisor::Supervisor;
use crate::task_processor::TaskHandler;
use async_trait::async_trait;
use orchestra_model::{JobProvider, RunProvider, RunStatus, Task, TaskKind, TaskStatus};
use std::sync::Arc;

fn unexpected(task: &Task) -> MasterError {
  MasterError::InvalidTask(format!("{} con carga {:?}", task.identifier, task.kind))
}

fn outcome(done: bool) -> TaskStatus {
  if done {
    TaskStatus::Succeeded
  } else {
    TaskStatus::Failed
  }
}

pub struct ReloadConfigurationHandler {
  pub job_provider: Arc<JobProvider>,
  pub loader: Arc<dyn ConfigurationLoader>,
}

#[async_trait]
impl TaskHandler for ReloadConfigurationHandler {
  async fn execute(&self, _task: &Task) -> Result<TaskStatus> {
    let job_provider = self.job_provider.clone();
    let loader = self.loader.clone();
    run_blocking(move || reload_configuration(&job_provider, loader.as_ref())).await?;
    Ok(TaskStatus::Succeeded)
  }
}

pub struct StopWorkerHandler {
  pub supervisor: Arc<Supervisor>,
}

#[async_trait]
impl TaskHandler for StopWorkerHandler {
  async fn execute(&self, task: &Task) -> Result<TaskStatus> {
    match &task.kind {
      TaskKind::StopWorker { worker_identifier } => Ok(outcome(self.supervisor.stop_worker(worker_identifier))),
      _ => Err(unexpected(task)),
    }
  }
}

/// Asigna el run en cuanto haya un worker. Mientras el run siga pendiente
/// la tarea también queda pendiente.
pub struct TriggerRunHandler {
  pub job_scheduler: Arc<JobScheduler>,
  pub run_provider: Arc<RunProvider>,
}

#[async_trait]
impl TaskHandler for TriggerRunHandler {
  async fn execute(&self, task: &Task) -> Result<TaskStatus> {
    let run_identifier = match &task.kind {
      TaskKind::TriggerRun { run_identifier } => run_identifier.clone(),
      _ => return Err(unexpected(task)),
    };
    let job_scheduler = self.job_scheduler.clone();
    let run_provider = self.run_provider.clone();
    run_blocking(move || {
      if job_scheduler.trigger_run(&run_identifier)? {
        return Ok(TaskStatus::Succeeded);
      }
      match run_provider.find(&run_identifier)? {
        Some(run) if run.status == RunStatus::Pending => Ok(TaskStatus::Pending),
        Some(run) if run.status != RunStatus::Cancelled && run.status != RunStatus::Exception => {
          Ok(TaskStatus::Succeeded)
        }
        _ => Ok(TaskStatus::Failed),
      }
    }).await
  }
}

/// Cancela un run pendiente. Sirve también de compensación al cancelar una
/// tarea `trigger_run`.
pub struct CancelRunHandler {
  pub job_scheduler: Arc<JobScheduler>,
}

#[async_trait]
impl TaskHandler for CancelRunHandler {
  async fn execute(&self, task: &Task) -> Result<TaskStatus> {
    match &task.kind {
      TaskKind::CancelRun { run_identifier } | TaskKind::TriggerRun { run_identifier } => {
        let job_scheduler = self.job_scheduler.clone();
        let run_identifier = run_identifier.clone();
        Ok(outcome(run_blocking(move || job_scheduler.cancel_run(&run_identifier)).await?))
      }
      _ => Err(unexpected(task)),
    }
  }
}

pub struct AbortRunHandler {
  pub job_scheduler: Arc<JobScheduler>,
}

#[async_trait]
impl TaskHandler for AbortRunHandler {
  async fn execute(&self, task: &Task) -> Result<TaskStatus> {
    match &task.kind {
      TaskKind::AbortRun { run_identifier } => {
        let job_scheduler = self.job_scheduler.clone();
        let run_identifier = run_identifier.clone();
        Ok(outcome(run_blocking(move || job_scheduler.abort_run(&run_identifier)).await?))
      }
      _ => Err(unexpected(task)),
    }
  }
}
