// Archivo: control_service.rs
// Propósito: operaciones de control que invoca la capa de servicio/API
// externa (disparar, cancelar y abortar runs, habilitar jobs, encolar
// tareas).
use crate::errors::{MasterError, Result};
use crate::job_scheduler::JobScheduler;
use orchestra_model::{JobProvider, RunProvider, RunSource, TaskKind, TaskProvider};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

/// Resultado visible de una operación de control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
  Succeeded,
  Failed,
}

impl From<bool> for OperationStatus {
  fn from(done: bool) -> Self {
    if done {
      OperationStatus::Succeeded
    } else {
      OperationStatus::Failed
    }
  }
}

/// Fachada de control sobre los proveedores y el planificador.
#[derive(Clone)]
pub struct ControlService {
  job_provider: Arc<JobProvider>,
  run_provider: Arc<RunProvider>,
  task_provider: Arc<TaskProvider>,
  job_scheduler: Arc<JobScheduler>,
}

impl ControlService {
  pub fn new(job_provider: Arc<JobProvider>,
             run_provider: Arc<RunProvider>,
             task_provider: Arc<TaskProvider>,
             job_scheduler: Arc<JobScheduler>)
             -> Self {
    Self { job_provider, run_provider, task_provider, job_scheduler }
  }

  /// Crea un run pendiente y la tarea que lo dispara. Devuelve
  /// `(run, tarea)`.
  pub fn trigger(&self,
                 job_identifier: &str,
                 parameters: Map<String, JsonValue>,
                 source: RunSource)
                 -> Result<(String, String)> {
    let job = self.job_provider
                  .get(job_identifier)?
                  .ok_or_else(|| MasterError::NotFound(format!("job {}", job_identifier)))?;
    let run = self.run_provider.create(&job.project, &job.identifier, parameters, source)?;
    let task = self.task_provider.create(TaskKind::TriggerRun { run_identifier: run.identifier.clone() })?;
    log::info!("Run {} creado para el job {} (tarea {})", run.identifier, job.identifier, task.identifier);
    Ok((run.identifier, task.identifier))
  }

  pub fn cancel(&self, run_identifier: &str) -> Result<OperationStatus> {
    Ok(self.job_scheduler.cancel_run(run_identifier)?.into())
  }

  pub fn abort(&self, run_identifier: &str) -> Result<OperationStatus> {
    Ok(self.job_scheduler.abort_run(run_identifier)?.into())
  }

  pub fn enable(&self, job_identifier: &str) -> Result<()> {
    self.job_provider.update_status(job_identifier, true)?;
    Ok(())
  }

  pub fn disable(&self, job_identifier: &str) -> Result<()> {
    self.job_provider.update_status(job_identifier, false)?;
    Ok(())
  }

  /// Encola la parada de un worker; devuelve la tarea.
  pub fn stop_worker(&self, worker_identifier: &str) -> Result<String> {
    let kind = TaskKind::StopWorker { worker_identifier: worker_identifier.to_string() };
    Ok(self.task_provider.create(kind)?.identifier)
  }

  pub fn reload_configuration(&self) -> Result<String> {
    Ok(self.task_provider.create(TaskKind::ReloadConfiguration)?.identifier)
  }

  /// Pide cancelar una tarea aún no terminada.
  pub fn cancel_task(&self, task_identifier: &str) -> Result<OperationStatus> {
    Ok(self.task_provider.request_cancel(task_identifier)?.into())
  }
}
