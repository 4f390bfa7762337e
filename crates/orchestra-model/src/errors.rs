// errors.rs
use document_store::StoreError;
use thiserror::Error;

/// Errores de los proveedores del modelo.
#[derive(Debug, Error)]
pub enum ModelError {
  /// Error del almacén documental (nunca se silencia).
  #[error("Error de almacén: {0}")]
  Store(#[from] StoreError),
  /// Run, job, tarea o paso inexistente.
  #[error("No encontrado: {0}")]
  NotFound(String),
  /// Transición de estado no permitida.
  #[error("Transición inválida: {0}")]
  InvalidTransition(String),
  /// Clave de blob inválida.
  #[error("Clave inválida: {0}")]
  InvalidKey(String),
  /// Registro que no se serializa como objeto JSON.
  #[error("Registro inválido: {0}")]
  InvalidRecord(String),
  #[error("Error de archivo zip: {0}")]
  Archive(#[from] zip::result::ZipError),
  #[error("Error de serialización: {0}")]
  Serialization(#[from] serde_json::Error),
  #[error("Error de entrada/salida: {0}")]
  Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
