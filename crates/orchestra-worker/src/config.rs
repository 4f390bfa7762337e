// Archivo: config.rs
// Propósito: configuración del worker a partir de variables de entorno
// (con `.env` opcional vía dotenvy).
use crate::errors::{Result, WorkerError};
use std::path::PathBuf;
use std::time::Duration;

/// Parámetros de arranque del worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub worker_identifier: String,
  /// Dirección del supervisor del master.
  pub master_address: String,
  /// Raíz de `runs/` y `workspaces/`.
  pub working_directory: PathBuf,
  /// Programa (y argumentos fijos) del executor; el worker añade la raíz,
  /// el job y el run.
  pub executor_command: Vec<String>,
  pub synchronization_interval: Duration,
  pub reconnect_delay: Duration,
  pub termination_timeout: Duration,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    let short_identifier = uuid::Uuid::new_v4().simple().to_string();
    Self { worker_identifier: format!("worker-{}", &short_identifier[..8]),
           master_address: "127.0.0.1:5902".to_string(),
           working_directory: PathBuf::from("worker_data"),
           executor_command: vec![default_executor_path()],
           synchronization_interval: Duration::from_secs(1),
           reconnect_delay: Duration::from_secs(10),
           termination_timeout: Duration::from_secs(10) }
  }
}

impl WorkerConfig {
  /// Lee `ORCHESTRA_*` del entorno; los valores ausentes toman el valor por
  /// defecto.
  pub fn from_env() -> Result<Self> {
    dotenvy::dotenv().ok();
    let defaults = Self::default();
    Ok(Self { worker_identifier: std::env::var("ORCHESTRA_WORKER_IDENTIFIER").unwrap_or(defaults.worker_identifier),
              master_address: std::env::var("ORCHESTRA_MASTER_ADDRESS").unwrap_or(defaults.master_address),
              working_directory: std::env::var("ORCHESTRA_WORKER_DIRECTORY").map(PathBuf::from)
                                                                             .unwrap_or(defaults.working_directory),
              executor_command: std::env::var("ORCHESTRA_EXECUTOR").map(|raw| {
                                                                      raw.split_whitespace().map(String::from).collect()
                                                                    })
                                                                    .unwrap_or(defaults.executor_command),
              synchronization_interval: defaults.synchronization_interval,
              reconnect_delay: env_seconds("ORCHESTRA_RECONNECT_DELAY")?.unwrap_or(defaults.reconnect_delay),
              termination_timeout: env_seconds("ORCHESTRA_TERMINATION_TIMEOUT")?
                                     .unwrap_or(defaults.termination_timeout) })
  }
}

/// `orchestra-executor` junto al binario actual, o en el PATH si no se
/// puede resolver.
fn default_executor_path() -> String {
  std::env::current_exe().ok()
                         .and_then(|exe| exe.parent().map(|dir| dir.join("orchestra-executor")))
                         .filter(|path| path.is_file())
                         .map(|path| path.display().to_string())
                         .unwrap_or_else(|| "orchestra-executor".to_string())
}

fn env_seconds(key: &str) -> Result<Option<Duration>> {
  match std::env::var(key) {
    Ok(raw) => raw.trim()
                  .parse::<u64>()
                  .map(|s| Some(Duration::from_secs(s)))
                  .map_err(|_| WorkerError::Configuration(format!("{} debe ser un número de segundos: {}", key, raw))),
    Err(_) => Ok(None),
  }
}
