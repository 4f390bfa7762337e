// Archivo: worker.rs
// Propósito: proceso worker. Mantiene la sesión con el master, guarda cada
// asignación en disco, lanza un executor por run y sincroniza
// periódicamente el estado local (estado, pasos, logs y resultados).
use crate::config::WorkerConfig;
use crate::errors::{Result, WorkerError};
use crate::executor_watcher::ExecutorWatcher;
use crate::worker_storage::{LocalRunStatus, WorkerStorage};
use orchestra_model::protocol::{decode_line, encode_line, MasterMessage, RunRequest, WorkerMessage};
use orchestra_model::{RunStatus, RunStep, StepStatus};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Motivo por el que terminó una sesión con el master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
  /// El master pidió parar el worker.
  Stopped,
  Cancelled,
  Disconnected,
}

/// Lo último que el master ya recibió de un run.
#[derive(Debug, Default)]
struct SentState {
  status: Option<RunStatus>,
  steps: Option<Vec<RunStep>>,
  results: Option<JsonValue>,
  log_offsets: HashMap<usize, u64>,
}

impl SentState {
  /// Tras reconectar se reenvía todo salvo los logs, que el master ya
  /// acumuló.
  fn reset_for_new_session(&mut self) {
    self.status = None;
    self.steps = None;
    self.results = None;
  }
}

struct ActiveRun {
  job_identifier: String,
  run_identifier: String,
  watcher: ExecutorWatcher,
  sent: SentState,
}

pub struct Worker {
  config: WorkerConfig,
  storage: WorkerStorage,
  runs: BTreeMap<String, ActiveRun>,
  /// Estados `exception` de runs que no llegaron a prepararse en disco;
  /// se envían en la siguiente sincronización.
  rejected_runs: Vec<WorkerMessage>,
}

impl Worker {
  pub fn new(config: WorkerConfig) -> Self {
    let storage = WorkerStorage::new(&config.working_directory);
    Self { config, storage, runs: BTreeMap::new(), rejected_runs: Vec::new() }
  }

  pub fn storage(&self) -> &WorkerStorage {
    &self.storage
  }

  /// Runs que el worker aún tiene que reportar.
  pub fn active_runs(&self) -> Vec<String> {
    self.runs.keys().cloned().collect()
  }

  /// Recupera los runs que quedaron en disco de una ejecución anterior. Su
  /// executor ya no está vigilado, así que los que no llegaron a un estado
  /// final se reportarán como exception.
  pub fn recover_runs(&mut self) -> Result<usize> {
    let mut recovered = 0;
    for (job_identifier, run_identifier) in self.storage.list_runs()? {
      if self.runs.contains_key(&run_identifier) {
        continue;
      }
      log::info!("Recuperando run {} del job {}", run_identifier, job_identifier);
      let watcher = ExecutorWatcher::new(&job_identifier, &run_identifier);
      self.runs.insert(run_identifier.clone(),
                       ActiveRun { job_identifier, run_identifier, watcher, sent: SentState::default() });
      recovered += 1;
    }
    Ok(recovered)
  }

  /// Bucle principal: conecta, atiende la sesión y reconecta tras una
  /// desconexión hasta que el master pide parar o se cancela `token`.
  pub async fn run(&mut self, token: CancellationToken) -> Result<()> {
    let recovered = self.recover_runs()?;
    if recovered > 0 {
      log::info!("{} runs recuperados del disco", recovered);
    }

    loop {
      if token.is_cancelled() {
        break;
      }
      match TcpStream::connect(&self.config.master_address).await {
        Ok(stream) => {
          log::info!("Conectado al master en {}", self.config.master_address);
          match self.session(stream, &token).await {
            Ok(SessionEnd::Stopped) | Ok(SessionEnd::Cancelled) => break,
            Ok(SessionEnd::Disconnected) => log::warn!("Conexión con el master perdida"),
            Err(e) => log::warn!("Sesión con el master terminada: {}", e),
          }
        }
        Err(e) => log::warn!("No se pudo conectar con el master en {}: {}", self.config.master_address, e),
      }
      log::info!("Reintento de conexión en {:?}", self.config.reconnect_delay);
      tokio::select! {
        _ = token.cancelled() => break,
        _ = tokio::time::sleep(self.config.reconnect_delay) => {}
      }
    }

    self.terminate_all().await;
    log::info!("Worker {} detenido", self.config.worker_identifier);
    Ok(())
  }

  /// Atiende una conexión ya establecida.
  pub async fn session(&mut self, stream: TcpStream, token: &CancellationToken) -> Result<SessionEnd> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    send(&mut write_half, &WorkerMessage::Hello { worker_identifier: self.config.worker_identifier.clone() }).await?;
    for run in self.runs.values_mut() {
      run.sent.reset_for_new_session();
    }

    let mut interval = tokio::time::interval(self.config.synchronization_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      tokio::select! {
        _ = token.cancelled() => {
          self.finish(&mut write_half).await;
          return Ok(SessionEnd::Cancelled);
        }
        line = lines.next_line() => match line {
          Ok(Some(line)) if line.trim().is_empty() => {}
          Ok(Some(line)) => match decode_line::<MasterMessage>(&line) {
            Ok(MasterMessage::Stop) => {
              log::info!("El master pidió parar el worker");
              self.finish(&mut write_half).await;
              return Ok(SessionEnd::Stopped);
            }
            Ok(message) => {
              if let Err(e) = self.handle_message(message) {
                log::error!("Error procesando mensaje del master: {}", e);
              }
            }
            Err(e) => log::warn!("Mensaje inválido del master: {}", e),
          },
          Ok(None) => return Ok(SessionEnd::Disconnected),
          Err(e) => return Err(e.into()),
        },
        _ = interval.tick() => {
          match self.synchronize(&mut write_half).await {
            Ok(()) => {}
            Err(WorkerError::ConnectionLost(_)) => return Ok(SessionEnd::Disconnected),
            Err(e) => log::error!("Error sincronizando runs: {}", e),
          }
        }
      }
    }
  }

  /// Aplica una orden del master distinta de `stop`.
  pub fn handle_message(&mut self, message: MasterMessage) -> Result<()> {
    match message {
      MasterMessage::AssignRun { run_request } => self.start_run(run_request),
      MasterMessage::AbortRun { run_identifier } => match self.runs.get_mut(&run_identifier) {
        Some(run) => run.watcher.abort(),
        None => {
          log::warn!("Abort para un run desconocido: {}", run_identifier);
          Ok(())
        }
      },
      MasterMessage::Stop => Err(WorkerError::Protocol("stop se atiende en la sesión".into())),
    }
  }

  /// Persiste la petición y lanza su executor. Si el executor no arranca,
  /// el run queda como exception para que la próxima sincronización lo
  /// reporte. Si ni siquiera se puede guardar en disco, el exception queda
  /// en cola y se envía al master en la próxima sincronización.
  pub fn start_run(&mut self, request: RunRequest) -> Result<()> {
    if self.runs.contains_key(&request.run_identifier) {
      return Err(WorkerError::Protocol(format!("el run {} ya está asignado", request.run_identifier)));
    }
    log::info!("Run {} asignado (job {})", request.run_identifier, request.job_identifier);
    let prepared = self.storage
                       .create_run(&request.job_identifier, &request.run_identifier)
                       .and_then(|()| self.storage.save_request(&request));
    if let Err(e) = prepared {
      self.reject_run(&request.run_identifier, &e);
      return Err(e);
    }

    let mut watcher = ExecutorWatcher::new(&request.job_identifier, &request.run_identifier);
    let mut command = self.config.executor_command.clone();
    command.push(self.storage.root().display().to_string());
    command.push(request.job_identifier.clone());
    command.push(request.run_identifier.clone());
    if let Err(e) = watcher.start(&command, None) {
      log::error!("No se pudo lanzar el executor del run {}: {}", request.run_identifier, e);
      let mut status = LocalRunStatus::unknown(&request.job_identifier, &request.run_identifier);
      status.status = Some(RunStatus::Exception);
      status.completion_date = Some(chrono::Utc::now());
      if let Err(e) = self.storage.save_status(&status) {
        self.reject_run(&request.run_identifier, &e);
        return Err(e);
      }
    }

    self.runs.insert(request.run_identifier.clone(),
                     ActiveRun { job_identifier: request.job_identifier,
                                 run_identifier: request.run_identifier,
                                 watcher,
                                 sent: SentState::default() });
    Ok(())
  }

  fn reject_run(&mut self, run_identifier: &str, error: &WorkerError) {
    log::error!("No se pudo preparar el run {}: {}", run_identifier, error);
    self.rejected_runs.push(WorkerMessage::RunStatus { run_identifier: run_identifier.to_string(),
                                                       status: RunStatus::Exception,
                                                       start_date: None,
                                                       completion_date: Some(chrono::Utc::now()) });
  }

  /// Envía al master lo que cambió en cada run desde la última vez. Los
  /// runs cuyo estado final ya se reportó se borran del disco.
  pub async fn synchronize<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> Result<()> {
    for message in self.rejected_runs.iter() {
      send(writer, message).await?;
    }
    self.rejected_runs.clear();

    let mut completed = Vec::new();
    for run in self.runs.values_mut() {
      match synchronize_run(&self.storage, run, writer).await {
        Ok(true) => completed.push(run.run_identifier.clone()),
        Ok(false) => {}
        Err(e @ WorkerError::ConnectionLost(_)) => return Err(e),
        Err(e) => log::error!("Error sincronizando el run {}: {}", run.run_identifier, e),
      }
    }
    for run_identifier in completed {
      if let Some(run) = self.runs.remove(&run_identifier) {
        log::info!("Run {} reportado, limpiando estado local", run_identifier);
        if let Err(e) = self.storage.delete_run(&run.job_identifier, &run.run_identifier) {
          log::warn!("No se pudo borrar el run {}: {}", run_identifier, e);
        }
      }
    }
    Ok(())
  }

  async fn finish<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) {
    self.terminate_all().await;
    if let Err(e) = self.synchronize(writer).await {
      log::warn!("Sincronización final incompleta: {}", e);
    }
  }

  async fn terminate_all(&mut self) {
    for run in self.runs.values_mut() {
      match run.watcher.terminate(self.config.termination_timeout).await {
        Ok(outcome) => log::debug!("Run {}: {:?}", run.run_identifier, outcome),
        Err(e) => log::error!("No se pudo terminar el run {}: {}", run.run_identifier, e),
      }
    }
  }
}

/// Sincroniza un run. Devuelve `true` cuando el estado final ya está en el
/// master y el executor no sigue vivo.
async fn synchronize_run<W: AsyncWrite + Unpin>(storage: &WorkerStorage, run: &mut ActiveRun, writer: &mut W)
                                                -> Result<bool> {
  run.watcher.check_termination(storage)?;
  let status = storage.load_status(&run.job_identifier, &run.run_identifier)?;

  if !status.steps.is_empty() && run.sent.steps.as_ref() != Some(&status.steps) {
    let message = WorkerMessage::StepUpdate { run_identifier: run.run_identifier.clone(), steps: status.steps.clone() };
    send(writer, &message).await?;
    run.sent.steps = Some(status.steps.clone());
  }

  for step in status.steps.iter().filter(|s| s.status != StepStatus::Pending) {
    let offset = run.sent.log_offsets.get(&step.index).copied().unwrap_or(0);
    let (text, next_offset) =
      storage.load_log_chunk(&run.job_identifier, &run.run_identifier, step.index, &step.name, offset)?;
    if text.is_empty() {
      continue;
    }
    let message = WorkerMessage::LogChunk { run_identifier: run.run_identifier.clone(),
                                            step_index: step.index,
                                            step_name: step.name.clone(),
                                            text };
    send(writer, &message).await?;
    run.sent.log_offsets.insert(step.index, next_offset);
  }

  match storage.load_results(&run.job_identifier, &run.run_identifier) {
    Ok(results) => {
      let is_empty = results.as_object().is_some_and(|o| o.is_empty());
      if !is_empty && run.sent.results.as_ref() != Some(&results) {
        let message = WorkerMessage::Results { run_identifier: run.run_identifier.clone(), results: results.clone() };
        send(writer, &message).await?;
        run.sent.results = Some(results);
      }
    }
    // el paso puede estar escribiendo el fichero; se reintenta luego
    Err(e) => log::warn!("Resultados del run {} no legibles: {}", run.run_identifier, e),
  }

  let Some(current) = status.status else {
    return Ok(false);
  };
  if run.sent.status != Some(current) {
    let message = WorkerMessage::RunStatus { run_identifier: run.run_identifier.clone(),
                                             status: current,
                                             start_date: status.start_date,
                                             completion_date: status.completion_date };
    send(writer, &message).await?;
    run.sent.status = Some(current);
  }
  Ok(current.is_terminal() && !run.watcher.is_running())
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, message: &WorkerMessage) -> Result<()> {
  let line = encode_line(message)?;
  writer.write_all(line.as_bytes())
        .await
        .map_err(|e| WorkerError::ConnectionLost(e.to_string()))?;
  writer.flush().await.map_err(|e| WorkerError::ConnectionLost(e.to_string()))
}
