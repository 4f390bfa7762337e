// Archivo: config.rs
// Propósito: configuración del master a partir de variables de entorno
// (con `.env` opcional vía dotenvy).
use crate::errors::{MasterError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Parámetros de arranque del master.
#[derive(Debug, Clone)]
pub struct MasterConfig {
  /// Dirección donde escuchan las conexiones de workers.
  pub listen_address: String,
  /// Directorio de las tablas del almacén documental.
  pub database_directory: PathBuf,
  /// Directorio de los blobs de log.
  pub data_directory: PathBuf,
  /// Fichero JSON con las definiciones de jobs.
  pub configuration_path: PathBuf,
  pub scheduler_interval: Duration,
  pub task_interval: Duration,
}

impl Default for MasterConfig {
  fn default() -> Self {
    Self { listen_address: "127.0.0.1:5902".to_string(),
           database_directory: PathBuf::from("master_data/database"),
           data_directory: PathBuf::from("master_data/storage"),
           configuration_path: PathBuf::from("master_configuration.json"),
           scheduler_interval: Duration::from_secs(10),
           task_interval: Duration::from_secs(5) }
  }
}

impl MasterConfig {
  /// Lee `ORCHESTRA_*` del entorno; los valores ausentes toman el valor por
  /// defecto.
  pub fn from_env() -> Result<Self> {
    dotenvy::dotenv().ok();
    let defaults = Self::default();
    Ok(Self { listen_address: std::env::var("ORCHESTRA_LISTEN_ADDRESS").unwrap_or(defaults.listen_address),
              database_directory: env_path("ORCHESTRA_DATABASE_DIRECTORY").unwrap_or(defaults.database_directory),
              data_directory: env_path("ORCHESTRA_DATA_DIRECTORY").unwrap_or(defaults.data_directory),
              configuration_path: env_path("ORCHESTRA_CONFIGURATION").unwrap_or(defaults.configuration_path),
              scheduler_interval: env_seconds("ORCHESTRA_SCHEDULER_INTERVAL")?.unwrap_or(defaults.scheduler_interval),
              task_interval: env_seconds("ORCHESTRA_TASK_INTERVAL")?.unwrap_or(defaults.task_interval) })
  }
}

fn env_path(key: &str) -> Option<PathBuf> {
  std::env::var(key).ok().map(PathBuf::from)
}

pub(crate) fn env_seconds(key: &str) -> Result<Option<Duration>> {
  match std::env::var(key) {
    Ok(raw) => raw.trim()
                  .parse::<u64>()
                  .map(|s| Some(Duration::from_secs(s)))
                  .map_err(|_| MasterError::Configuration(format!("{} debe ser un número de segundos: {}", key, raw))),
    Err(_) => Ok(None),
  }
}
