// job.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Plantilla de un paso: nombre y argumentos del comando. Los argumentos
/// pueden contener `{parametro}`, que se resuelve al ejecutar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStep {
  pub name: String,
  pub command: Vec<String>,
}

/// Parámetro declarado por un job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
  pub key: String,
  #[serde(default)]
  pub description: Option<String>,
}

/// Definición de un job tal como llega desde la configuración.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
  pub identifier: String,
  pub project: String,
  #[serde(default)]
  pub description: Option<String>,
  pub workspace: String,
  pub steps: Vec<JobStep>,
  #[serde(default)]
  pub parameters: Vec<JobParameter>,
  #[serde(default)]
  pub properties: Map<String, JsonValue>,
}

/// Registro persistido de un job. Deshabilitarlo lo oculta a la
/// planificación sin borrar su historial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
  pub identifier: String,
  pub project: String,
  pub description: Option<String>,
  pub workspace: String,
  pub steps: Vec<JobStep>,
  pub parameters: Vec<JobParameter>,
  pub properties: Map<String, JsonValue>,
  pub is_enabled: bool,
  pub creation_date: DateTime<Utc>,
  pub update_date: DateTime<Utc>,
}
