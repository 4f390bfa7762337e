// Archivo: errors.rs
// Propósito: definir los errores del almacén documental y el alias
// Result<T> usado por las APIs del crate.
use thiserror::Error;

/// Errores del almacén documental.
///
/// - `DuplicateKey`: violación de un índice único al insertar. No debe
///   reintentarse a ciegas: indica un error lógico o una carrera.
/// - `LockTimeout`: no se pudo obtener el lock de la tabla a tiempo.
/// - `Io`: error del sistema de ficheros.
/// - `Serialization`: contenido JSON inválido.
/// - `InvalidDocument`: el contenido de una tabla no tiene la forma esperada.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Clave duplicada en un índice único.
    #[error("Clave duplicada {key} en la tabla '{table}' para el índice '{index}'")]
    DuplicateKey { table: String, index: String, key: String },
    /// Timeout esperando el lock de una tabla.
    #[error("Timeout esperando el lock {0}")]
    LockTimeout(String),
    /// Error de entrada/salida.
    #[error("Error de almacenamiento: {0}")]
    Io(#[from] std::io::Error),
    /// Error de serialización JSON.
    #[error("Error de serialización: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Documento o tabla con formato inesperado.
    #[error("Documento inválido: {0}")]
    InvalidDocument(String),
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, StoreError>;
