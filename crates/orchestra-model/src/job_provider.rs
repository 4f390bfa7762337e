// job_provider.rs
use crate::database::{from_document, to_document, JOB_TABLE};
use crate::date_time::DateTimeProvider;
use crate::errors::{ModelError, Result};
use crate::job::{Job, JobDefinition};
use document_store::{DatabaseClient, Filter, OrderBy};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

/// Accesos tipados a la tabla `job`.
pub struct JobProvider {
  database: Arc<dyn DatabaseClient>,
  date_time: Arc<dyn DateTimeProvider>,
}

impl JobProvider {
  pub fn new(database: Arc<dyn DatabaseClient>, date_time: Arc<dyn DateTimeProvider>) -> Self {
    Self { database, date_time }
  }

  fn filter(project: Option<&str>) -> Filter {
    match project {
      Some(project) => Filter::new().eq("project", project),
      None => Filter::new(),
    }
  }

  pub fn count(&self, project: Option<&str>) -> Result<usize> {
    Ok(self.database.count(JOB_TABLE, &Self::filter(project))?)
  }

  pub fn get_list(&self, project: Option<&str>, skip: usize, limit: Option<usize>) -> Result<Vec<Job>> {
    self.database
        .find_many(JOB_TABLE, &Self::filter(project), skip, limit, &[OrderBy::ascending("identifier")])?
        .into_iter()
        .map(from_document)
        .collect()
  }

  pub fn get(&self, identifier: &str) -> Result<Option<Job>> {
    self.database.find_one(JOB_TABLE, &Filter::new().eq("identifier", identifier))?.map(from_document).transpose()
  }

  /// Inserta el job o actualiza su definición conservando `is_enabled` y
  /// `creation_date`.
  pub fn create_or_update(&self, definition: JobDefinition) -> Result<Job> {
    let now = self.date_time.now();
    match self.get(&definition.identifier)? {
      None => {
        let job = Job { identifier: definition.identifier,
                        project: definition.project,
                        description: definition.description,
                        workspace: definition.workspace,
                        steps: definition.steps,
                        parameters: definition.parameters,
                        properties: definition.properties,
                        is_enabled: true,
                        creation_date: now,
                        update_date: now };
        self.database.insert_one(JOB_TABLE, to_document(&job)?)?;
        log::info!("Job {} creado", job.identifier);
        Ok(job)
      }
      Some(existing) => {
        let job = Job { identifier: definition.identifier,
                        project: definition.project,
                        description: definition.description,
                        workspace: definition.workspace,
                        steps: definition.steps,
                        parameters: definition.parameters,
                        properties: definition.properties,
                        is_enabled: existing.is_enabled,
                        creation_date: existing.creation_date,
                        update_date: now };
        self.database
            .update_one(JOB_TABLE, &Filter::new().eq("identifier", job.identifier.as_str()), to_document(&job)?)?;
        log::debug!("Job {} actualizado", job.identifier);
        Ok(job)
      }
    }
  }

  /// Habilita o deshabilita un job.
  pub fn update_status(&self, identifier: &str, is_enabled: bool) -> Result<Job> {
    let job = self.get(identifier)?.ok_or_else(|| ModelError::NotFound(format!("job {}", identifier)))?;
    let now = self.date_time.now();
    let mut update = Map::new();
    update.insert("is_enabled".to_string(), JsonValue::Bool(is_enabled));
    update.insert("update_date".to_string(), serde_json::to_value(now)?);
    self.database.update_one(JOB_TABLE, &Filter::new().eq("identifier", identifier), update)?;
    Ok(Job { is_enabled, update_date: now, ..job })
  }

  pub fn delete(&self, identifier: &str) -> Result<bool> {
    Ok(self.database.delete_one(JOB_TABLE, &Filter::new().eq("identifier", identifier))?)
  }
}
