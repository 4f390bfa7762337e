// Archivo: task_processor.rs
// Propósito: cola persistente de operaciones de control, ejecutadas por
// prioridad mediante handlers registrados al arrancar.
use crate::blocking::run_blocking;
use crate::errors::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use orchestra_model::{Task, TaskProvider, TaskStatus, TaskType, TaskUpdate};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Operación asociada a un tipo de tarea. Devuelve el estado final de la
/// tarea; `Pending` la deja para el siguiente ciclo.
#[async_trait]
pub trait TaskHandler: Send + Sync {
  async fn execute(&self, task: &Task) -> Result<TaskStatus>;
}

struct Registration {
  priority: u32,
  execute: Arc<dyn TaskHandler>,
  cancel: Option<Arc<dyn TaskHandler>>,
}

/// Procesador de tareas.
///
/// Las tareas listas se ordenan por (prioridad, fecha de creación); una
/// prioridad menor se ejecuta antes.
pub struct TaskProcessor {
  task_provider: Arc<TaskProvider>,
  handlers: IndexMap<TaskType, Registration>,
  update_interval: Duration,
}

impl TaskProcessor {
  pub fn new(task_provider: Arc<TaskProvider>) -> Self {
    Self { task_provider, handlers: IndexMap::new(), update_interval: Duration::from_secs(5) }
  }

  pub fn with_update_interval(mut self, update_interval: Duration) -> Self {
    self.update_interval = update_interval;
    self
  }

  /// Registra (o reemplaza) el handler de un tipo de tarea. `cancel` es la
  /// compensación que se ejecuta si la tarea se cancela antes de correr.
  pub fn register_handler(&mut self,
                          task_type: TaskType,
                          priority: u32,
                          execute: Arc<dyn TaskHandler>,
                          cancel: Option<Arc<dyn TaskHandler>>) {
    self.handlers.insert(task_type, Registration { priority, execute, cancel });
  }

  /// Tipos registrados, en orden de registro.
  pub fn registered_types(&self) -> Vec<(TaskType, u32)> {
    self.handlers.iter().map(|(t, r)| (*t, r.priority)).collect()
  }

  pub async fn run(&self, token: CancellationToken) {
    log::info!("Procesador de tareas iniciado (intervalo {:?})", self.update_interval);
    match self.recover_interrupted().await {
      Ok(0) => {}
      Ok(count) => log::warn!("{} tareas interrumpidas marcadas como exception", count),
      Err(e) => log::error!("Error recuperando tareas interrumpidas: {}", e),
    }
    loop {
      match self.process_pending(&token).await {
        Ok(0) => {}
        Ok(count) => log::debug!("{} tareas procesadas", count),
        Err(e) => log::error!("Error procesando tareas: {}", e),
      }
      tokio::select! {
        _ = token.cancelled() => break,
        _ = tokio::time::sleep(self.update_interval) => {}
      }
    }
    log::info!("Procesador de tareas detenido");
  }

  /// Las tareas que quedaron en `running` (el proceso se detuvo a mitad o
  /// no pudo guardar su estado final) no se vuelven a ejecutar: se marcan
  /// `exception`. Devuelve cuántas se corrigieron.
  pub async fn recover_interrupted(&self) -> Result<usize> {
    let task_provider = self.task_provider.clone();
    let interrupted = run_blocking(move || Ok(task_provider.get_list(Some(TaskStatus::Running))?)).await?;
    for task in interrupted.iter() {
      log::warn!("Tarea {} ({}) interrumpida", task.identifier, task.kind.task_type());
      self.update_task(task, TaskStatus::Exception).await?;
    }
    Ok(interrupted.len())
  }

  /// Ejecuta todas las tareas `pending` en orden de prioridad. Se detiene
  /// entre tareas si el token se cancela.
  pub async fn process_pending(&self, token: &CancellationToken) -> Result<usize> {
    let task_provider = self.task_provider.clone();
    let mut ready = run_blocking(move || Ok(task_provider.get_list(Some(TaskStatus::Pending))?)).await?;
    let unknown = u32::MAX;
    ready.sort_by_key(|task| {
           (self.handlers.get(&task.kind.task_type()).map(|r| r.priority).unwrap_or(unknown), task.creation_date)
         });

    let mut processed = 0;
    for task in ready {
      if token.is_cancelled() {
        break;
      }
      if let Err(e) = self.process(&task).await {
        log::error!("Tarea {} ({}): {}", task.identifier, task.kind.task_type(), e);
      }
      processed += 1;
    }
    Ok(processed)
  }

  async fn update_task(&self, task: &Task, status: TaskStatus) -> Result<Task> {
    let task_provider = self.task_provider.clone();
    let task = task.clone();
    run_blocking(move || Ok(task_provider.update_status(&task, TaskUpdate::status(status))?)).await
  }

  /// Guarda el estado final. Si la escritura falla se reintenta una vez y,
  /// si vuelve a fallar, se intenta dejar la tarea en `exception`.
  async fn finish(&self, task: &Task, status: TaskStatus) -> Result<()> {
    let first_error = match self.update_task(task, status).await {
      Ok(_) => return Ok(()),
      Err(e) => e,
    };
    log::warn!("No se pudo guardar el estado {:?} de la tarea {}: {}; reintentando",
               status,
               task.identifier,
               first_error);
    let error = match self.update_task(task, status).await {
      Ok(_) => return Ok(()),
      Err(e) => e,
    };
    if status != TaskStatus::Exception {
      if let Err(e) = self.update_task(task, TaskStatus::Exception).await {
        log::error!("La tarea {} queda en {:?}: {}", task.identifier, task.status, e);
      }
    }
    Err(error)
  }

  async fn process(&self, task: &Task) -> Result<()> {
    let task_type = task.kind.task_type();
    let registration = match self.handlers.get(&task_type) {
      Some(registration) => registration,
      None => {
        log::error!("No hay handler para la tarea {} ({})", task.identifier, task_type);
        self.update_task(task, TaskStatus::Exception).await?;
        return Ok(());
      }
    };

    if task.should_cancel {
      let status = match &registration.cancel {
        Some(cancel) => match cancel.execute(task).await {
          Ok(_) => TaskStatus::Cancelled,
          Err(e) => {
            log::error!("La cancelación de la tarea {} falló: {}", task.identifier, e);
            TaskStatus::Exception
          }
        },
        None => TaskStatus::Cancelled,
      };
      self.update_task(task, status).await?;
      log::info!("Tarea {} ({}) cancelada: {:?}", task.identifier, task_type, status);
      return Ok(());
    }

    let running = self.update_task(task, TaskStatus::Running).await?;
    let status = match registration.execute.execute(&running).await {
      Ok(status) => status,
      Err(e) => {
        log::error!("La tarea {} ({}) lanzó un error: {}", task.identifier, task_type, e);
        TaskStatus::Exception
      }
    };
    self.finish(&running, status).await?;
    if status != TaskStatus::Pending {
      log::info!("Tarea {} ({}) terminada: {:?}", task.identifier, task_type, status);
    }
    Ok(())
  }
}
