// Archivo: executor_watcher.rs
// Propósito: vigilar el subproceso executor de un run. Reenvía su salida
// al log (target `raw`), permite abortarlo con SIGINT y detecta si terminó
// sin dejar un estado final en `status.json`.
use crate::errors::{Result, WorkerError};
use crate::worker_storage::WorkerStorage;
use orchestra_model::RunStatus;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const RELAY_TIMEOUT: Duration = Duration::from_secs(1);

/// Cómo terminó un `terminate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
  /// El executor atendió SIGINT dentro del plazo.
  Graceful,
  /// Hubo que matarlo.
  Forced,
  NotRunning,
}

pub struct ExecutorWatcher {
  job_identifier: String,
  run_identifier: String,
  child: Option<Child>,
  exit_status: Option<ExitStatus>,
  relays: Vec<JoinHandle<()>>,
}

impl ExecutorWatcher {
  pub fn new(job_identifier: &str, run_identifier: &str) -> Self {
    Self { job_identifier: job_identifier.to_string(),
           run_identifier: run_identifier.to_string(),
           child: None,
           exit_status: None,
           relays: Vec::new() }
  }

  pub fn run_identifier(&self) -> &str {
    &self.run_identifier
  }

  /// Lanza `command` (programa y argumentos). Cada línea de stdout/stderr
  /// se escribe en el log y, si se da, se envía por `lines`.
  pub fn start(&mut self, command: &[String], lines: Option<mpsc::UnboundedSender<String>>) -> Result<()> {
    let (program, arguments) =
      command.split_first()
             .ok_or_else(|| WorkerError::Template(format!("comando vacío para el run {}", self.run_identifier)))?;
    let mut child = Command::new(program).args(arguments)
                                         .stdin(Stdio::null())
                                         .stdout(Stdio::piped())
                                         .stderr(Stdio::piped())
                                         .kill_on_drop(false)
                                         .spawn()?;
    log::info!("({}) Executor lanzado con pid {:?}", self.run_identifier, child.id());
    if let Some(stdout) = child.stdout.take() {
      self.relays.push(tokio::spawn(relay_lines(stdout, lines.clone())));
    }
    if let Some(stderr) = child.stderr.take() {
      self.relays.push(tokio::spawn(relay_lines(stderr, lines)));
    }
    self.child = Some(child);
    self.exit_status = None;
    Ok(())
  }

  pub fn is_running(&mut self) -> bool {
    let Some(child) = self.child.as_mut() else {
      return false;
    };
    if self.exit_status.is_some() {
      return false;
    }
    match child.try_wait() {
      Ok(Some(status)) => {
        self.exit_status = Some(status);
        false
      }
      Ok(None) => true,
      Err(e) => {
        log::warn!("({}) No se pudo consultar el executor: {}", self.run_identifier, e);
        false
      }
    }
  }

  /// Pide al executor que aborte (SIGINT). No fuerza nada: si el executor
  /// no responde, el run queda en running y requiere intervención.
  pub fn abort(&mut self) -> Result<()> {
    if !self.is_running() {
      return Ok(());
    }
    log::info!("({}) Abortando", self.run_identifier);
    self.send_interrupt()
  }

  /// Espera a que el executor termine y a que se vacíe su salida.
  pub async fn wait(&mut self) -> Result<Option<ExitStatus>> {
    if let Some(status) = self.exit_status {
      return Ok(Some(status));
    }
    let Some(child) = self.child.as_mut() else {
      return Ok(None);
    };
    let status = child.wait().await?;
    self.exit_status = Some(status);
    self.wait_relays().await;
    Ok(Some(status))
  }

  /// SIGINT, espera acotada por `timeout` y, si sigue vivo, kill.
  pub async fn terminate(&mut self, timeout: Duration) -> Result<TerminationOutcome> {
    if !self.is_running() {
      return Ok(TerminationOutcome::NotRunning);
    }
    log::info!("({}) Terminando executor", self.run_identifier);
    self.send_interrupt()?;
    let Some(child) = self.child.as_mut() else {
      return Ok(TerminationOutcome::NotRunning);
    };

    let outcome = match tokio::time::timeout(timeout, child.wait()).await {
      Ok(status) => {
        self.exit_status = Some(status?);
        TerminationOutcome::Graceful
      }
      Err(_) => {
        log::warn!("({}) Forzando la terminación", self.run_identifier);
        child.start_kill()?;
        match tokio::time::timeout(timeout, child.wait()).await {
          Ok(status) => self.exit_status = Some(status?),
          Err(_) => return Err(WorkerError::ProcessTerminationTimeout(self.run_identifier.clone())),
        }
        TerminationOutcome::Forced
      }
    };
    self.wait_relays().await;
    Ok(outcome)
  }

  /// Si el executor ya no corre y `status.json` sigue en unknown o
  /// running, el run terminó antes de tiempo: se reescribe como
  /// exception. Devuelve `true` si hubo que corregirlo.
  pub fn check_termination(&mut self, storage: &WorkerStorage) -> Result<bool> {
    if self.is_running() {
      return Ok(false);
    }
    let mut status = storage.load_status(&self.job_identifier, &self.run_identifier)?;
    if matches!(status.status, None | Some(RunStatus::Running)) {
      log::error!("Run {} terminado antes de completarse", self.run_identifier);
      status.status = Some(RunStatus::Exception);
      if status.completion_date.is_none() {
        status.completion_date = Some(chrono::Utc::now());
      }
      storage.save_status(&status)?;
      return Ok(true);
    }
    Ok(false)
  }

  fn send_interrupt(&self) -> Result<()> {
    let Some(pid) = self.child.as_ref().and_then(|c| c.id()) else {
      return Ok(());
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc != 0 {
      let err = std::io::Error::last_os_error();
      // ESRCH: el proceso acaba de salir
      if err.raw_os_error() != Some(libc::ESRCH) {
        return Err(err.into());
      }
    }
    Ok(())
  }

  async fn wait_relays(&mut self) {
    for relay in self.relays.drain(..) {
      if tokio::time::timeout(RELAY_TIMEOUT, relay).await.is_err() {
        log::warn!("({}) La salida del executor no se cerró a tiempo", self.run_identifier);
      }
    }
  }
}

async fn relay_lines<R: AsyncRead + Unpin>(source: R, lines: Option<mpsc::UnboundedSender<String>>) {
  let mut reader = BufReader::new(source);
  let mut buffer = Vec::new();
  loop {
    buffer.clear();
    match reader.read_until(b'\n', &mut buffer).await {
      Ok(0) => break,
      Ok(_) => {
        let line = String::from_utf8_lossy(&buffer).trim_end().to_string();
        log::info!(target: "raw", "{}", line);
        if let Some(sender) = &lines {
          let _ = sender.send(line);
        }
      }
      Err(e) => {
        log::warn!("Error leyendo la salida del executor: {}", e);
        break;
      }
    }
  }
}
