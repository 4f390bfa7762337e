// Archivo: errors.rs
// Propósito: errores del worker y del executor, y alias Result<T>.
use document_store::StoreError;
use thiserror::Error;

/// Errores del lado worker.
///
/// - `Store`: fallo del lock de ficheros compartido con el almacén.
/// - `Template`: un argumento de comando referencia un parámetro que no
///   existe ni en el run ni en el entorno.
#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("Error de entrada/salida: {0}")]
  Io(#[from] std::io::Error),
  #[error("Error de serialización: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("Error de almacenamiento: {0}")]
  Store(#[from] StoreError),
  #[error("Plantilla inválida: {0}")]
  Template(String),
  /// El proceso no terminó ni siquiera después de forzarlo.
  #[error("El proceso del run {0} no terminó a tiempo")]
  ProcessTerminationTimeout(String),
  #[error("Conexión perdida con el master: {0}")]
  ConnectionLost(String),
  #[error("Error de protocolo: {0}")]
  Protocol(String),
  #[error("Error de configuración: {0}")]
  Configuration(String),
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, WorkerError>;
