// Archivo: job_scheduler.rs
// Propósito: asignar periódicamente los runs pendientes a workers
// disponibles y exponer las operaciones de control sobre runs.
use crate::blocking::run_blocking;
use crate::errors::{MasterError, Result};
use crate::supervisor::Supervisor;
use crate::worker_selector::WorkerSelector;
use orchestra_model::{DateTimeProvider, JobProvider, ModelError, Run, RunProvider, RunStatus, RunUpdate};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Planificador de runs.
///
/// Cada pasada lista los runs `pending` sin worker por fecha de creación y
/// los asigna uno a uno. Las asignaciones y cancelaciones se serializan para
/// que un run no pueda asignarse dos veces ni cancelarse mientras se asigna.
pub struct JobScheduler {
  supervisor: Arc<Supervisor>,
  job_provider: Arc<JobProvider>,
  run_provider: Arc<RunProvider>,
  worker_selector: Arc<dyn WorkerSelector>,
  date_time: Arc<dyn DateTimeProvider>,
  update_interval: Duration,
  assignment_lock: Mutex<()>,
}

impl JobScheduler {
  pub fn new(supervisor: Arc<Supervisor>,
             job_provider: Arc<JobProvider>,
             run_provider: Arc<RunProvider>,
             worker_selector: Arc<dyn WorkerSelector>,
             date_time: Arc<dyn DateTimeProvider>)
             -> Self {
    Self { supervisor,
           job_provider,
           run_provider,
           worker_selector,
           date_time,
           update_interval: Duration::from_secs(10),
           assignment_lock: Mutex::new(()) }
  }

  pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
    self.update_interval = update_interval;
    self
  }

  /// Bucle principal. Cada pasada corre en un hilo bloqueante; un error se
  /// registra y se reintenta en la siguiente.
  pub async fn run(self: Arc<Self>, token: CancellationToken) {
    log::info!("Planificador iniciado (intervalo {:?})", self.update_interval);
    loop {
      let scheduler = self.clone();
      if let Err(e) = run_blocking(move || scheduler.update()).await {
        log::error!("Error en la pasada del planificador: {}", e);
      }
      tokio::select! {
        _ = token.cancelled() => break,
        _ = tokio::time::sleep(self.update_interval) => {}
      }
    }
    log::info!("Planificador detenido");
  }

  /// Una pasada de planificación; devuelve cuántos runs se asignaron.
  pub fn update(&self) -> Result<usize> {
    let pending = self.run_provider.get_pending_unassigned()?;
    let mut assigned = 0;
    for run in pending {
      match self.trigger(&run) {
        Ok(true) => assigned += 1,
        Ok(false) => {}
        Err(e) => {
          log::error!("La asignación del run {} falló: {}", run.identifier, e);
          let update = RunUpdate::new().status(RunStatus::Exception).completion_date(self.date_time.now());
          if let Err(e) = self.run_provider.update_status(&run, update) {
            log::error!("No se pudo marcar el run {} como exception: {}", run.identifier, e);
          }
        }
      }
    }
    Ok(assigned)
  }

  fn trigger(&self, run: &Run) -> Result<bool> {
    let _guard = self.assignment_lock.lock().unwrap_or_else(|e| e.into_inner());
    // la copia listada puede haber cambiado (cancelación, otra asignación)
    let run = match self.run_provider.get(&run.project, &run.identifier)? {
      Some(current) if current.status == RunStatus::Pending && current.worker.is_none() => current,
      _ => return Ok(false),
    };
    let job = self.job_provider
                  .get(&run.job)?
                  .ok_or_else(|| MasterError::NotFound(format!("job {}", run.job)))?;
    if !job.is_enabled {
      return Ok(false);
    }
    let worker = match self.worker_selector.select_worker(&self.supervisor, &job) {
      Some(worker) => worker,
      None => return Ok(false),
    };

    log::info!("Asignando el run {} ({}) al worker {}", run.identifier, run.job, worker);
    let update = RunUpdate::new().status(RunStatus::Running).worker(worker.clone()).start_date(self.date_time.now());
    let run = self.run_provider.update_status(&run, update)?;
    if let Err(e) = self.supervisor.assign_run(&worker, &job, &run) {
      let update = RunUpdate::new().status(RunStatus::Exception).completion_date(self.date_time.now());
      self.run_provider.update_status(&run, update)?;
      return Err(e);
    }
    Ok(true)
  }

  /// Intenta asignar un run concreto de inmediato. `false` si sigue a la
  /// espera de un worker o ya no está pendiente.
  pub fn trigger_run(&self, run_identifier: &str) -> Result<bool> {
    let run = self.run_provider
                  .find(run_identifier)?
                  .ok_or_else(|| MasterError::NotFound(format!("run {}", run_identifier)))?;
    self.trigger(&run)
  }

  /// Cancela un run que sigue exactamente en `pending`.
  pub fn cancel_run(&self, run_identifier: &str) -> Result<bool> {
    let _guard = self.assignment_lock.lock().unwrap_or_else(|e| e.into_inner());
    let run = self.run_provider
                  .find(run_identifier)?
                  .ok_or_else(|| MasterError::NotFound(format!("run {}", run_identifier)))?;
    if run.status != RunStatus::Pending {
      return Ok(false);
    }
    let update = RunUpdate::new().should_cancel(true)
                                 .status(RunStatus::Cancelled)
                                 .completion_date(self.date_time.now());
    self.run_provider.update_status(&run, update)?;
    log::info!("Run {} cancelado", run_identifier);
    Ok(true)
  }

  /// Pide abortar un run en `running`. El estado final lo reporta el
  /// worker; aquí sólo se marca `aborting`.
  pub fn abort_run(&self, run_identifier: &str) -> Result<bool> {
    let run = self.run_provider
                  .find(run_identifier)?
                  .ok_or_else(|| MasterError::NotFound(format!("run {}", run_identifier)))?;
    if run.status != RunStatus::Running {
      return Ok(false);
    }
    let worker = match &run.worker {
      Some(worker) => worker.clone(),
      None => return Ok(false),
    };
    if self.supervisor.get_worker(&worker).is_none() {
      log::warn!("No se puede abortar el run {}: el worker {} no está conectado", run_identifier, worker);
      return Ok(false);
    }
    // el worker puede haber terminado el run entre la lectura y la escritura
    match self.run_provider.update_status(&run, RunUpdate::new().should_abort(true).status(RunStatus::Aborting)) {
      Ok(_) => {}
      Err(ModelError::InvalidTransition(_)) => return Ok(false),
      Err(e) => return Err(e.into()),
    }
    if !self.supervisor.abort_run(&worker, run_identifier)? {
      log::warn!("El worker {} se desconectó antes de recibir la orden de abortar {}", worker, run_identifier);
    }
    log::info!("Abortando el run {} en el worker {}", run_identifier, worker);
    Ok(true)
  }
}
