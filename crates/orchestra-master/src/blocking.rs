// Archivo: blocking.rs
// Propósito: ejecutar las llamadas síncronas al almacén (ficheros JSON con
// lock de fichero) en el pool de hilos bloqueantes de tokio, de modo que un
// lock disputado no detenga los bucles async del master.
use crate::errors::{MasterError, Result};

/// Ejecuta `operation` con `spawn_blocking` y devuelve su resultado.
pub async fn run_blocking<T, F>(operation: F) -> Result<T>
  where F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static
{
  tokio::task::spawn_blocking(operation).await
                                        .map_err(|e| MasterError::Interrupted(format!("spawn_blocking: {}", e)))?
}
