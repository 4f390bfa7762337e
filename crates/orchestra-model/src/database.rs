// database.rs
// Conversión entre registros tipados y documentos del almacén, y
// declaración de los índices que usa el modelo.
use crate::errors::{ModelError, Result};
use document_store::{DatabaseAdministration, Document};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub(crate) const RUN_TABLE: &str = "run";
pub(crate) const JOB_TABLE: &str = "job";
pub(crate) const TASK_TABLE: &str = "task";

/// Declara los índices únicos de las tablas del modelo.
pub fn initialize_database(administration: &dyn DatabaseAdministration) -> Result<()> {
  administration.create_index(RUN_TABLE, "identifier_unique", &["identifier"], true)?;
  administration.create_index(RUN_TABLE, "project_job", &["project", "job"], false)?;
  administration.create_index(JOB_TABLE, "identifier_unique", &["identifier"], true)?;
  administration.create_index(TASK_TABLE, "identifier_unique", &["identifier"], true)?;
  Ok(())
}

pub(crate) fn to_document<T: Serialize>(record: &T) -> Result<Document> {
  match serde_json::to_value(record)? {
    serde_json::Value::Object(map) => Ok(map),
    other => Err(ModelError::InvalidRecord(format!("se esperaba un objeto: {}", other))),
  }
}

pub(crate) fn from_document<T: DeserializeOwned>(document: Document) -> Result<T> {
  Ok(serde_json::from_value(serde_json::Value::Object(document))?)
}
