// run_provider.rs
use crate::data_storage::DataStorage;
use crate::database::{from_document, to_document, RUN_TABLE};
use crate::date_time::DateTimeProvider;
use crate::errors::{ModelError, Result};
use crate::run::{Run, RunSource, RunStatus, RunStep, RunUpdate};
use document_store::{DatabaseClient, Filter, OrderBy};
use serde_json::{Map, Value as JsonValue};
use std::io::{Cursor, Write};
use std::sync::Arc;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Intentos de lectura-validación-escritura antes de rendirse ante
/// escritores concurrentes.
const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Criterios opcionales para listar runs.
#[derive(Debug, Clone, Default)]
pub struct RunQuery {
  pub project: Option<String>,
  pub job: Option<String>,
  pub worker: Option<String>,
  pub status: Option<RunStatus>,
}

impl RunQuery {
  fn to_filter(&self) -> Filter {
    let mut filter = Filter::new();
    if let Some(project) = &self.project {
      filter = filter.eq("project", project.as_str());
    }
    if let Some(job) = &self.job {
      filter = filter.eq("job", job.as_str());
    }
    if let Some(worker) = &self.worker {
      filter = filter.eq("worker", worker.as_str());
    }
    if let Some(status) = &self.status {
      filter = filter.eq("status", status.as_str());
    }
    filter
  }
}

/// Archivo comprimido de un run listo para descargar.
#[derive(Debug, Clone)]
pub struct RunArchive {
  pub file_name: String,
  pub data: Vec<u8>,
  pub kind: String,
}

/// Accesos tipados a la tabla `run` y a los logs de sus pasos.
///
/// Las operaciones de escritura devuelven una instantánea nueva del run; el
/// llamador no debe asumir que una copia previa sigue sincronizada.
pub struct RunProvider {
  database: Arc<dyn DatabaseClient>,
  data_storage: Arc<dyn DataStorage>,
  date_time: Arc<dyn DateTimeProvider>,
}

impl RunProvider {
  pub fn new(database: Arc<dyn DatabaseClient>,
             data_storage: Arc<dyn DataStorage>,
             date_time: Arc<dyn DateTimeProvider>)
             -> Self {
    Self { database, data_storage, date_time }
  }

  fn key_filter(project: &str, identifier: &str) -> Filter {
    Filter::new().eq("project", project).eq("identifier", identifier)
  }

  pub fn count(&self, query: &RunQuery) -> Result<usize> {
    Ok(self.database.count(RUN_TABLE, &query.to_filter())?)
  }

  pub fn get_list(&self, query: &RunQuery, skip: usize, limit: Option<usize>, order_by: &[OrderBy]) -> Result<Vec<Run>> {
    self.database
        .find_many(RUN_TABLE, &query.to_filter(), skip, limit, order_by)?
        .into_iter()
        .map(from_document)
        .collect()
  }

  /// Runs pendientes sin worker asignado, por orden de creación.
  pub fn get_pending_unassigned(&self) -> Result<Vec<Run>> {
    let filter = Filter::new().eq("status", RunStatus::Pending.as_str()).eq("worker", JsonValue::Null);
    self.database
        .find_many(RUN_TABLE, &filter, 0, None, &[OrderBy::ascending("creation_date")])?
        .into_iter()
        .map(from_document)
        .collect()
  }

  pub fn get(&self, project: &str, identifier: &str) -> Result<Option<Run>> {
    self.database.find_one(RUN_TABLE, &Self::key_filter(project, identifier))?.map(from_document).transpose()
  }

  /// Busca un run sólo por identificador (los identificadores son únicos).
  pub fn find(&self, identifier: &str) -> Result<Option<Run>> {
    self.database.find_one(RUN_TABLE, &Filter::new().eq("identifier", identifier))?.map(from_document).transpose()
  }

  fn require(&self, project: &str, identifier: &str) -> Result<Run> {
    self.get(project, identifier)?.ok_or_else(|| ModelError::NotFound(format!("run {}/{}", project, identifier)))
  }

  /// Crea un run `pending` sin worker.
  pub fn create(&self, project: &str, job: &str, parameters: Map<String, JsonValue>, source: RunSource) -> Result<Run> {
    let now = self.date_time.now();
    let run = Run { identifier: Uuid::new_v4().to_string(),
                    project: project.to_string(),
                    job: job.to_string(),
                    parameters,
                    source,
                    worker: None,
                    status: RunStatus::Pending,
                    steps: None,
                    start_date: None,
                    completion_date: None,
                    results: None,
                    should_cancel: false,
                    should_abort: false,
                    creation_date: now,
                    update_date: now };
    self.database.insert_one(RUN_TABLE, to_document(&run)?)?;
    log::debug!("Run {} creado para {}/{}", run.identifier, project, job);
    Ok(run)
  }

  /// Aplica un parche de estado. La transición se valida contra la copia
  /// persistida y la escritura sólo se hace si el estado leído sigue siendo
  /// el almacenado; si otro escritor lo cambió entre medias, se vuelve a
  /// leer y a validar. Devuelve la nueva instantánea.
  pub fn update_status(&self, run: &Run, update: RunUpdate) -> Result<Run> {
    for _ in 0..MAX_UPDATE_ATTEMPTS {
      let current = self.require(&run.project, &run.identifier)?;
      if let Some(next_status) = update.status.value() {
        if !current.status.can_transition_to(*next_status) {
          return Err(ModelError::InvalidTransition(format!("run {}: {} -> {}",
                                                           current.identifier, current.status, next_status)));
        }
      }
      let now = self.date_time.now();
      let next = update.apply(&current, now);
      if next.status == RunStatus::Pending && next.worker.is_some() {
        return Err(ModelError::InvalidTransition(format!("run {}: un run pending no puede tener worker",
                                                         current.identifier)));
      }
      let filter = Self::key_filter(&run.project, &run.identifier).eq("status", current.status.as_str());
      if self.database.update_one(RUN_TABLE, &filter, update.to_document(now)?)? {
        return Ok(next);
      }
      log::debug!("El run {} cambió de estado ({}) durante la actualización", current.identifier, current.status);
    }
    Err(ModelError::InvalidTransition(format!("run {}: el estado cambia de forma concurrente", run.identifier)))
  }

  /// Reemplaza la secuencia completa de pasos.
  pub fn update_steps(&self, run: &Run, steps: Vec<RunStep>) -> Result<Run> {
    let now = self.date_time.now();
    let mut update = Map::new();
    update.insert("steps".to_string(), serde_json::to_value(&steps)?);
    update.insert("update_date".to_string(), serde_json::to_value(now)?);
    if !self.database.update_one(RUN_TABLE, &Self::key_filter(&run.project, &run.identifier), update)? {
      return Err(ModelError::NotFound(format!("run {}/{}", run.project, run.identifier)));
    }
    let mut next = run.clone();
    next.steps = Some(steps);
    next.update_date = now;
    Ok(next)
  }

  pub fn get_all_steps(&self, project: &str, identifier: &str) -> Result<Vec<RunStep>> {
    Ok(self.require(project, identifier)?.steps.unwrap_or_default())
  }

  pub fn get_step(&self, project: &str, identifier: &str, step_index: usize) -> Result<RunStep> {
    self.get_all_steps(project, identifier)?
        .into_iter()
        .find(|s| s.index == step_index)
        .ok_or_else(|| ModelError::NotFound(format!("paso {} del run {}/{}", step_index, project, identifier)))
  }

  pub fn get_results(&self, project: &str, identifier: &str) -> Result<Option<JsonValue>> {
    Ok(self.require(project, identifier)?.results)
  }

  pub fn set_results(&self, run: &Run, results: JsonValue) -> Result<Run> {
    let now = self.date_time.now();
    let mut update = Map::new();
    update.insert("results".to_string(), results.clone());
    update.insert("update_date".to_string(), serde_json::to_value(now)?);
    if !self.database.update_one(RUN_TABLE, &Self::key_filter(&run.project, &run.identifier), update)? {
      return Err(ModelError::NotFound(format!("run {}/{}", run.project, run.identifier)));
    }
    let mut next = run.clone();
    next.results = Some(results);
    next.update_date = now;
    Ok(next)
  }

  /// Clave del blob de log de un paso.
  pub fn step_log_key(project: &str, run_identifier: &str, step: &RunStep) -> String {
    format!("projects/{}/runs/{}/{}", project, run_identifier, Self::step_log_file_name(step))
  }

  fn step_log_file_name(step: &RunStep) -> String {
    format!("step_{}_{}.log", step.index, step.name)
  }

  fn step_key(&self, project: &str, run_identifier: &str, step_index: usize) -> Result<String> {
    let step = self.get_step(project, run_identifier, step_index)?;
    Ok(Self::step_log_key(project, run_identifier, &step))
  }

  pub fn has_step_log(&self, project: &str, run_identifier: &str, step_index: usize) -> Result<bool> {
    self.data_storage.exists(&self.step_key(project, run_identifier, step_index)?)
  }

  /// Log completo y su tamaño en bytes.
  pub fn get_step_log(&self, project: &str, run_identifier: &str, step_index: usize) -> Result<(String, u64)> {
    let raw = self.data_storage.get(&self.step_key(project, run_identifier, step_index)?)?;
    Ok(match raw {
      Some(data) => (String::from_utf8_lossy(&data).into_owned(), data.len() as u64),
      None => (String::new(), 0),
    })
  }

  /// Trozo del log a partir de `skip`; devuelve el texto y el desplazamiento
  /// siguiente.
  pub fn get_step_log_chunk(&self,
                            project: &str,
                            run_identifier: &str,
                            step_index: usize,
                            skip: u64,
                            limit: Option<u64>)
                            -> Result<(String, u64)> {
    let raw = self.data_storage.get_chunk(&self.step_key(project, run_identifier, step_index)?, skip, limit)?;
    Ok(match raw {
      Some(data) => (String::from_utf8_lossy(&data).into_owned(), skip + data.len() as u64),
      None => (String::new(), skip),
    })
  }

  pub fn get_step_log_size(&self, project: &str, run_identifier: &str, step_index: usize) -> Result<u64> {
    self.data_storage.get_size(&self.step_key(project, run_identifier, step_index)?)
  }

  pub fn append_step_log(&self, project: &str, run_identifier: &str, step_index: usize, text: &str) -> Result<()> {
    self.data_storage.append(&self.step_key(project, run_identifier, step_index)?, text.as_bytes())
  }

  /// Empaqueta el documento del run y los logs de sus pasos en
  /// `<run>.zip`. Devuelve `None` si el run no existe.
  pub fn get_archive(&self, project: &str, run_identifier: &str) -> Result<Option<RunArchive>> {
    let run = match self.get(project, run_identifier)? {
      Some(run) => run,
      None => return Ok(None),
    };

    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated)
                                              .unix_permissions(0o644);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file("run.json", options)?;
    writer.write_all(&serde_json::to_vec_pretty(&run)?)?;

    for step in run.steps.iter().flatten() {
      if let Some(log_data) = self.data_storage.get(&Self::step_log_key(project, run_identifier, step))? {
        writer.start_file(Self::step_log_file_name(step), options)?;
        writer.write_all(&log_data)?;
      }
    }

    let data = writer.finish()?.into_inner();
    Ok(Some(RunArchive { file_name: format!("{}.zip", run_identifier), data, kind: "zip".to_string() }))
  }
}
