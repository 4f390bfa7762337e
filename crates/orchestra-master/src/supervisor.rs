// Archivo: supervisor.rs
// Propósito: mantener una conexión viva por worker, aceptar nuevas
// conexiones y trasladar al `RunProvider` lo que reportan los workers.
use crate::blocking::run_blocking;
use crate::errors::{MasterError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use orchestra_model::protocol::{decode_line, encode_line, MasterMessage, RunRequest, WorkerMessage};
use orchestra_model::{Job, Run, RunProvider, RunStatus, RunUpdate};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Estado de una conexión de worker:
/// `connecting → active (idle | assigned) → disconnecting → closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Connecting,
  Idle,
  Assigned,
  Disconnecting,
  Closed,
}

impl WorkerState {
  pub fn is_active(&self) -> bool {
    matches!(self, WorkerState::Idle | WorkerState::Assigned)
  }
}

struct ConnectionState {
  state: WorkerState,
  assigned_run: Option<String>,
  should_stop: bool,
}

/// Conexión en memoria con un worker. Sólo el `Supervisor` la crea y la
/// muta; el planificador la consulta a través de los accesores.
pub struct WorkerConnection {
  identifier: String,
  sender: mpsc::UnboundedSender<MasterMessage>,
  inner: Mutex<ConnectionState>,
}

impl WorkerConnection {
  fn new(identifier: &str, sender: mpsc::UnboundedSender<MasterMessage>) -> Self {
    Self { identifier: identifier.to_string(),
           sender,
           inner: Mutex::new(ConnectionState { state: WorkerState::Connecting,
                                               assigned_run: None,
                                               should_stop: false }) }
  }

  fn lock(&self) -> MutexGuard<'_, ConnectionState> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn identifier(&self) -> &str {
    &self.identifier
  }

  pub fn state(&self) -> WorkerState {
    self.lock().state
  }

  pub fn assigned_run(&self) -> Option<String> {
    self.lock().assigned_run.clone()
  }

  pub fn should_stop(&self) -> bool {
    self.lock().should_stop
  }

  /// Activo, sin run asignado y sin parada pendiente.
  pub fn is_available(&self) -> bool {
    let state = self.lock();
    state.state == WorkerState::Idle && !state.should_stop
  }

  fn set_state(&self, next: WorkerState) {
    self.lock().state = next;
  }

  fn send(&self, message: MasterMessage) -> Result<()> {
    self.sender.send(message).map_err(|_| MasterError::ConnectionLost(self.identifier.clone()))
  }

  /// Envía el run al worker. Un worker sólo puede tener un run a la vez.
  pub fn assign_run(&self, job: &Job, run: &Run) -> Result<()> {
    let mut state = self.lock();
    if !state.state.is_active() {
      return Err(MasterError::ConnectionLost(self.identifier.clone()));
    }
    if let Some(current) = &state.assigned_run {
      return Err(MasterError::WorkerBusy { worker: self.identifier.clone(), run: current.clone() });
    }
    let run_request = RunRequest { project: run.project.clone(),
                                   run_identifier: run.identifier.clone(),
                                   job_identifier: job.identifier.clone(),
                                   workspace: job.workspace.clone(),
                                   steps: job.steps.clone(),
                                   parameters: run.parameters.clone() };
    self.send(MasterMessage::AssignRun { run_request })?;
    state.assigned_run = Some(run.identifier.clone());
    state.state = WorkerState::Assigned;
    Ok(())
  }

  /// Reenvía la orden de abortar; el estado final lo reporta el worker.
  pub fn abort_run(&self, run_identifier: &str) -> Result<()> {
    self.send(MasterMessage::AbortRun { run_identifier: run_identifier.to_string() })
  }

  pub fn stop(&self) -> Result<()> {
    self.lock().should_stop = true;
    self.send(MasterMessage::Stop)
  }

  /// Registra un run que el worker reporta como en curso (por ejemplo tras
  /// reconectar con trabajo pendiente).
  fn track_run(&self, run_identifier: &str) {
    let mut state = self.lock();
    if state.state.is_active() && state.assigned_run.is_none() {
      state.assigned_run = Some(run_identifier.to_string());
      state.state = WorkerState::Assigned;
    }
  }

  fn release_run(&self, run_identifier: &str) {
    let mut state = self.lock();
    if state.assigned_run.as_deref() == Some(run_identifier) {
      state.assigned_run = None;
      if state.state == WorkerState::Assigned {
        state.state = WorkerState::Idle;
      }
    }
  }
}

/// Registro de workers conectados y servidor de conexiones.
pub struct Supervisor {
  workers: DashMap<String, Arc<WorkerConnection>>,
  run_provider: Arc<RunProvider>,
  handshake_timeout: Duration,
}

impl Supervisor {
  pub fn new(run_provider: Arc<RunProvider>) -> Self {
    Self { workers: DashMap::new(), run_provider, handshake_timeout: Duration::from_secs(10) }
  }

  /// Registra una conexión nueva y devuelve el extremo receptor de sus
  /// mensajes salientes. Un identificador ya conectado se rechaza.
  pub fn register_worker(&self,
                         identifier: &str)
                         -> Result<(Arc<WorkerConnection>, mpsc::UnboundedReceiver<MasterMessage>)> {
    match self.workers.entry(identifier.to_string()) {
      Entry::Occupied(_) => Err(MasterError::Protocol(format!("el worker {} ya está conectado", identifier))),
      Entry::Vacant(entry) => {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection = Arc::new(WorkerConnection::new(identifier, sender));
        connection.set_state(WorkerState::Idle);
        entry.insert(connection.clone());
        Ok((connection, receiver))
      }
    }
  }

  /// Da de baja la conexión. Un run aún asignado se deja en `running` para
  /// intervención del operador.
  pub fn unregister_worker(&self, connection: &Arc<WorkerConnection>) {
    connection.set_state(WorkerState::Disconnecting);
    self.workers.remove_if(connection.identifier(), |_, current| Arc::ptr_eq(current, connection));
    if let Some(run_identifier) = connection.assigned_run() {
      log::warn!("El worker {} se desconectó con el run {} asignado; requiere intervención",
                 connection.identifier(),
                 run_identifier);
    }
    connection.set_state(WorkerState::Closed);
    log::info!("Worker {} desconectado", connection.identifier());
  }

  pub fn get_worker(&self, identifier: &str) -> Option<Arc<WorkerConnection>> {
    self.workers.get(identifier).map(|entry| entry.value().clone())
  }

  /// Workers conectados ordenados por identificador.
  pub fn list_workers(&self) -> Vec<Arc<WorkerConnection>> {
    let mut workers: Vec<Arc<WorkerConnection>> = self.workers.iter().map(|entry| entry.value().clone()).collect();
    workers.sort_by(|a, b| a.identifier().cmp(b.identifier()));
    workers
  }

  pub fn assign_run(&self, worker_identifier: &str, job: &Job, run: &Run) -> Result<()> {
    let worker = self.get_worker(worker_identifier)
                     .ok_or_else(|| MasterError::NotFound(format!("worker {}", worker_identifier)))?;
    worker.assign_run(job, run)
  }

  /// Devuelve `false` si el worker ya no está conectado.
  pub fn abort_run(&self, worker_identifier: &str, run_identifier: &str) -> Result<bool> {
    match self.get_worker(worker_identifier) {
      Some(worker) => {
        worker.abort_run(run_identifier)?;
        Ok(true)
      }
      None => Ok(false),
    }
  }

  pub fn stop_worker(&self, worker_identifier: &str) -> bool {
    match self.get_worker(worker_identifier) {
      Some(worker) => worker.stop().is_ok(),
      None => false,
    }
  }

  /// Cierra el registro; las tareas de conexión terminan al observar el
  /// token cancelado.
  pub fn shutdown(&self) {
    for entry in self.workers.iter() {
      entry.value().set_state(WorkerState::Disconnecting);
    }
    self.workers.clear();
  }

  fn owned_run(&self, connection: &WorkerConnection, run_identifier: &str) -> Result<Run> {
    let run = self.run_provider
                  .find(run_identifier)?
                  .ok_or_else(|| MasterError::NotFound(format!("run {}", run_identifier)))?;
    if run.worker.as_deref() != Some(connection.identifier()) {
      return Err(MasterError::Protocol(format!("el run {} no pertenece al worker {}",
                                               run_identifier,
                                               connection.identifier())));
    }
    Ok(run)
  }

  /// Aplica un mensaje recibido de un worker ya registrado. Llama al
  /// almacén de forma síncrona; desde código async se invoca con
  /// `spawn_blocking`.
  pub fn handle_message(&self, connection: &WorkerConnection, message: WorkerMessage) -> Result<()> {
    match message {
      WorkerMessage::Hello { .. } => Err(MasterError::Protocol("hello repetido".into())),
      WorkerMessage::RunStatus { run_identifier, status, start_date, completion_date } => {
        let run = self.owned_run(connection, &run_identifier)?;
        if run.status == RunStatus::Aborting && status == RunStatus::Running {
          return Ok(());
        }
        let mut update = RunUpdate::new().status(status);
        if let Some(date) = start_date {
          update = update.start_date(date);
        }
        if let Some(date) = completion_date {
          update = update.completion_date(date);
        }
        self.run_provider.update_status(&run, update)?;
        if status.is_terminal() {
          log::info!("Run {} terminado en {} ({})", run_identifier, status, connection.identifier());
          connection.release_run(&run_identifier);
        } else {
          connection.track_run(&run_identifier);
        }
        Ok(())
      }
      WorkerMessage::StepUpdate { run_identifier, steps } => {
        let run = self.owned_run(connection, &run_identifier)?;
        self.run_provider.update_steps(&run, steps)?;
        Ok(())
      }
      WorkerMessage::LogChunk { run_identifier, step_index, text, .. } => {
        let run = self.owned_run(connection, &run_identifier)?;
        self.run_provider.append_step_log(&run.project, &run.identifier, step_index, &text)?;
        Ok(())
      }
      WorkerMessage::Results { run_identifier, results } => {
        let run = self.owned_run(connection, &run_identifier)?;
        self.run_provider.set_results(&run, results)?;
        Ok(())
      }
    }
  }

  /// Bucle de aceptación. Termina cuando se cancela el token, después de
  /// esperar a que las conexiones abiertas se cierren.
  pub async fn run_server(self: Arc<Self>, listener: TcpListener, token: CancellationToken) -> Result<()> {
    log::info!("Supervisor escuchando en {}", listener.local_addr()?);
    let mut connections = JoinSet::new();
    loop {
      tokio::select! {
        _ = token.cancelled() => break,
        Some(_) = connections.join_next(), if !connections.is_empty() => {}
        accepted = listener.accept() => match accepted {
          Ok((stream, address)) => {
            log::debug!("Conexión entrante desde {}", address);
            let supervisor = self.clone();
            let token = token.clone();
            connections.spawn(async move {
              if let Err(e) = supervisor.handle_connection(stream, token).await {
                log::warn!("Conexión desde {} cerrada: {}", address, e);
              }
            });
          }
          Err(e) => log::error!("Error aceptando conexión: {}", e),
        },
      }
    }
    self.shutdown();
    while connections.join_next().await.is_some() {}
    log::info!("Supervisor detenido");
    Ok(())
  }

  async fn handle_connection(self: Arc<Self>, stream: TcpStream, token: CancellationToken) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let hello = tokio::time::timeout(self.handshake_timeout, lines.next_line())
      .await
      .map_err(|_| MasterError::Protocol("tiempo de handshake agotado".into()))??;
    let worker_identifier = match hello.as_deref().map(decode_line::<WorkerMessage>) {
      Some(Ok(WorkerMessage::Hello { worker_identifier })) => worker_identifier,
      Some(Ok(other)) => return Err(MasterError::Protocol(format!("se esperaba hello: {:?}", other))),
      Some(Err(e)) => return Err(e.into()),
      None => return Err(MasterError::ConnectionLost("(sin handshake)".into())),
    };
    let (connection, mut receiver) = self.register_worker(&worker_identifier)?;
    log::info!("Worker {} conectado", worker_identifier);

    let writer_identifier = worker_identifier.clone();
    let writer = tokio::spawn(async move {
      while let Some(message) = receiver.recv().await {
        let line = match encode_line(&message) {
          Ok(line) => line,
          Err(e) => {
            log::error!("Worker {}: no se pudo serializar el mensaje: {}", writer_identifier, e);
            continue;
          }
        };
        if let Err(e) = write_half.write_all(line.as_bytes()).await {
          log::warn!("Worker {}: error de escritura: {}", writer_identifier, e);
          break;
        }
      }
    });

    let result = loop {
      let line = tokio::select! {
        _ = token.cancelled() => break Ok(()),
        line = lines.next_line() => line,
      };
      match line {
        Ok(Some(line)) if line.trim().is_empty() => {}
        Ok(Some(line)) => match decode_line::<WorkerMessage>(&line) {
          Ok(message) => {
            let supervisor = self.clone();
            let handled = connection.clone();
            if let Err(e) = run_blocking(move || supervisor.handle_message(&handled, message)).await {
              log::error!("Worker {}: error procesando mensaje: {}", worker_identifier, e);
            }
          }
          Err(e) => log::warn!("Worker {}: mensaje inválido: {}", worker_identifier, e),
        },
        Ok(None) if connection.should_stop() => break Ok(()),
        Ok(None) => break Err(MasterError::ConnectionLost(worker_identifier.clone())),
        Err(e) => break Err(e.into()),
      }
    };

    self.unregister_worker(&connection);
    drop(connection);
    if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
      log::debug!("Worker {}: el escritor no terminó a tiempo", worker_identifier);
    }
    result
  }
}
