// Archivo: worker_selector.rs
// Propósito: política intercambiable para elegir el worker de un run.
use crate::supervisor::Supervisor;
use orchestra_model::Job;

/// Elige un worker para ejecutar un job, o `None` si ninguno es elegible.
/// Un worker con un run asignado nunca es elegible.
pub trait WorkerSelector: Send + Sync {
  fn select_worker(&self, supervisor: &Supervisor, job: &Job) -> Option<String>;
}

/// Primer worker disponible por orden de identificador.
#[derive(Debug, Default, Clone)]
pub struct FirstAvailableWorkerSelector;

impl WorkerSelector for FirstAvailableWorkerSelector {
  fn select_worker(&self, supervisor: &Supervisor, _job: &Job) -> Option<String> {
    supervisor.list_workers()
              .into_iter()
              .find(|worker| worker.is_available())
              .map(|worker| worker.identifier().to_string())
  }
}

impl<F> WorkerSelector for F where F: Fn(&Supervisor, &Job) -> Option<String> + Send + Sync
{
  fn select_worker(&self, supervisor: &Supervisor, job: &Job) -> Option<String> {
    self(supervisor, job)
  }
}
