// Archivo: errors.rs
// Propósito: errores del master y alias Result<T>.
use orchestra_model::ModelError;
use thiserror::Error;

/// Errores del master.
///
/// - `Model`: error de un proveedor o del almacén, se propaga tal cual.
/// - `WorkerBusy`: se intentó asignar un run a un worker que ya tiene uno.
/// - `ConnectionLost`: el canal con el worker se cerró.
#[derive(Error, Debug)]
pub enum MasterError {
  #[error("Error de modelo: {0}")]
  Model(#[from] ModelError),
  /// Run, job o worker inexistente.
  #[error("No encontrado: {0}")]
  NotFound(String),
  #[error("Conexión perdida con el worker {0}")]
  ConnectionLost(String),
  #[error("El worker {worker} ya tiene asignado el run {run}")]
  WorkerBusy { worker: String, run: String },
  /// Mensaje inesperado o mal formado en el protocolo de workers.
  #[error("Error de protocolo: {0}")]
  Protocol(String),
  /// Tarea cuya carga no corresponde al handler que la procesa.
  #[error("Tarea inválida: {0}")]
  InvalidTask(String),
  #[error("Error de entrada/salida: {0}")]
  Io(#[from] std::io::Error),
  #[error("Error de configuración: {0}")]
  Configuration(String),
  /// Una operación delegada a un hilo bloqueante no terminó (pánico o
  /// runtime detenido).
  #[error("Operación interrumpida: {0}")]
  Interrupted(String),
}

impl From<serde_json::Error> for MasterError {
  fn from(e: serde_json::Error) -> Self {
    MasterError::Protocol(e.to_string())
  }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, MasterError>;
