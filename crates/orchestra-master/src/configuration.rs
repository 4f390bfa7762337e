// Archivo: configuration.rs
// Propósito: cargar las definiciones de jobs y sincronizarlas con la tabla
// `job`.
use crate::errors::{MasterError, Result};
use orchestra_model::{JobDefinition, JobProvider};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Contenido del fichero de configuración del master.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MasterConfiguration {
  #[serde(default)]
  pub jobs: Vec<JobDefinition>,
}

/// Fuente de la configuración; se relee en cada recarga.
pub trait ConfigurationLoader: Send + Sync {
  fn load(&self) -> Result<MasterConfiguration>;
}

/// Lee la configuración de un fichero JSON.
#[derive(Debug, Clone)]
pub struct JsonConfigurationLoader {
  path: PathBuf,
}

impl JsonConfigurationLoader {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl ConfigurationLoader for JsonConfigurationLoader {
  fn load(&self) -> Result<MasterConfiguration> {
    let raw = std::fs::read_to_string(&self.path).map_err(|e| {
                                                  MasterError::Configuration(format!("{}: {}", self.path.display(), e))
                                                })?;
    serde_json::from_str(&raw).map_err(|e| MasterError::Configuration(format!("{}: {}", self.path.display(), e)))
  }
}

impl<F> ConfigurationLoader for F where F: Fn() -> Result<MasterConfiguration> + Send + Sync
{
  fn load(&self) -> Result<MasterConfiguration> {
    self()
  }
}

/// Borra los jobs que ya no están en la configuración y crea o actualiza el
/// resto.
pub fn reload_configuration(job_provider: &JobProvider, loader: &dyn ConfigurationLoader) -> Result<()> {
  log::info!("Recargando configuración");
  let configuration = loader.load()?;

  for existing in job_provider.get_list(None, 0, None)? {
    if !configuration.jobs.iter().any(|job| job.identifier == existing.identifier) {
      log::info!("Eliminando job {}", existing.identifier);
      job_provider.delete(&existing.identifier)?;
    }
  }

  for definition in configuration.jobs {
    log::info!("Añadiendo/actualizando job {}", definition.identifier);
    job_provider.create_or_update(definition)?;
  }
  Ok(())
}
