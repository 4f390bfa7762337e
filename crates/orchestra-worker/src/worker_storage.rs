// Archivo: worker_storage.rs
// Propósito: estado local de los runs de un worker. Cada run vive en
// `runs/<job>_<run>/` con `request.json`, `status.json`, `results.json` y
// un log por paso. Worker y executor son procesos distintos, así que cada
// fichero JSON se escribe con temp+rename bajo un `.lock` hermano.
use crate::errors::Result;
use chrono::{DateTime, Utc};
use document_store::FileLock;
use orchestra_model::protocol::RunRequest;
use orchestra_model::{RunStatus, RunStep};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Contenido de `status.json`. `status == None` significa que el executor
/// todavía no escribió nada (estado "unknown").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRunStatus {
  pub job_identifier: String,
  pub run_identifier: String,
  pub status: Option<RunStatus>,
  #[serde(default)]
  pub steps: Vec<RunStep>,
  #[serde(default)]
  pub start_date: Option<DateTime<Utc>>,
  #[serde(default)]
  pub completion_date: Option<DateTime<Utc>>,
}

impl LocalRunStatus {
  pub fn unknown(job_identifier: &str, run_identifier: &str) -> Self {
    Self { job_identifier: job_identifier.to_string(),
           run_identifier: run_identifier.to_string(),
           status: None,
           steps: Vec::new(),
           start_date: None,
           completion_date: None }
  }
}

/// Acceso al directorio de trabajo de un worker.
#[derive(Debug, Clone)]
pub struct WorkerStorage {
  root: PathBuf,
}

impl WorkerStorage {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn run_directory(&self, job_identifier: &str, run_identifier: &str) -> PathBuf {
    self.root.join("runs").join(format!("{}_{}", job_identifier, run_identifier))
  }

  /// Directorio donde se ejecutan los pasos de los jobs de un workspace.
  pub fn workspace_directory(&self, workspace: &str) -> PathBuf {
    self.root.join("workspaces").join(workspace)
  }

  /// Runs presentes en disco como pares `(job, run)`, leídos de su
  /// `request.json`. Los directorios sin petición se ignoran.
  pub fn list_runs(&self) -> Result<Vec<(String, String)>> {
    let runs_directory = self.root.join("runs");
    if !runs_directory.is_dir() {
      return Ok(Vec::new());
    }
    let mut all_runs = Vec::new();
    for entry in fs::read_dir(&runs_directory)? {
      let path = entry?.path();
      if !path.is_dir() {
        continue;
      }
      let request_path = path.join("request.json");
      if !request_path.is_file() {
        log::warn!("Directorio de run sin request.json: {}", path.display());
        continue;
      }
      let request: RunRequest = load_data(&request_path)?;
      all_runs.push((request.job_identifier, request.run_identifier));
    }
    all_runs.sort();
    Ok(all_runs)
  }

  /// Crea el directorio del run. Falla si ya existe.
  pub fn create_run(&self, job_identifier: &str, run_identifier: &str) -> Result<()> {
    fs::create_dir_all(self.root.join("runs"))?;
    fs::create_dir(self.run_directory(job_identifier, run_identifier))?;
    Ok(())
  }

  pub fn delete_run(&self, job_identifier: &str, run_identifier: &str) -> Result<()> {
    fs::remove_dir_all(self.run_directory(job_identifier, run_identifier))?;
    Ok(())
  }

  pub fn load_request(&self, job_identifier: &str, run_identifier: &str) -> Result<RunRequest> {
    let path = self.file_path(job_identifier, run_identifier, "request.json");
    let _lock = FileLock::acquire(&lock_path(&path), LOCK_TIMEOUT)?;
    load_data(&path)
  }

  pub fn save_request(&self, request: &RunRequest) -> Result<()> {
    let path = self.file_path(&request.job_identifier, &request.run_identifier, "request.json");
    let _lock = FileLock::acquire(&lock_path(&path), LOCK_TIMEOUT)?;
    save_data(&path, request)
  }

  pub fn load_status(&self, job_identifier: &str, run_identifier: &str) -> Result<LocalRunStatus> {
    let path = self.file_path(job_identifier, run_identifier, "status.json");
    let _lock = FileLock::acquire(&lock_path(&path), LOCK_TIMEOUT)?;
    if !path.is_file() {
      return Ok(LocalRunStatus::unknown(job_identifier, run_identifier));
    }
    load_data(&path)
  }

  pub fn save_status(&self, status: &LocalRunStatus) -> Result<()> {
    let path = self.file_path(&status.job_identifier, &status.run_identifier, "status.json");
    let _lock = FileLock::acquire(&lock_path(&path), LOCK_TIMEOUT)?;
    save_data(&path, status)
  }

  /// Resultados publicados por los pasos; objeto vacío si no hay fichero.
  pub fn load_results(&self, job_identifier: &str, run_identifier: &str) -> Result<JsonValue> {
    let path = self.results_path(job_identifier, run_identifier);
    let _lock = FileLock::acquire(&lock_path(&path), LOCK_TIMEOUT)?;
    if !path.is_file() {
      return Ok(JsonValue::Object(Map::new()));
    }
    load_data(&path)
  }

  pub fn save_results(&self, job_identifier: &str, run_identifier: &str, results: &JsonValue) -> Result<()> {
    let path = self.results_path(job_identifier, run_identifier);
    let _lock = FileLock::acquire(&lock_path(&path), LOCK_TIMEOUT)?;
    save_data(&path, results)
  }

  pub fn results_path(&self, job_identifier: &str, run_identifier: &str) -> PathBuf {
    self.file_path(job_identifier, run_identifier, "results.json")
  }

  pub fn log_path(&self, job_identifier: &str, run_identifier: &str, step_index: usize, step_name: &str) -> PathBuf {
    self.file_path(job_identifier, run_identifier, &format!("step_{}_{}.log", step_index, step_name))
  }

  /// Log completo de un paso; cadena vacía si el paso no ha escrito nada.
  pub fn load_log(&self, job_identifier: &str, run_identifier: &str, step_index: usize, step_name: &str)
                  -> Result<String> {
    let path = self.log_path(job_identifier, run_identifier, step_index, step_name);
    if !path.is_file() {
      return Ok(String::new());
    }
    Ok(String::from_utf8_lossy(&fs::read(path)?).into_owned())
  }

  /// Bytes del log a partir de `offset`. Devuelve el texto y el offset
  /// siguiente; un carácter multibyte cortado al final se deja para la
  /// próxima lectura.
  pub fn load_log_chunk(&self,
                        job_identifier: &str,
                        run_identifier: &str,
                        step_index: usize,
                        step_name: &str,
                        offset: u64)
                        -> Result<(String, u64)> {
    let path = self.log_path(job_identifier, run_identifier, step_index, step_name);
    if !path.is_file() {
      return Ok((String::new(), offset));
    }
    let mut file = fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let usable = match std::str::from_utf8(&bytes) {
      Ok(_) => bytes.len(),
      Err(e) if e.error_len().is_none() => e.valid_up_to(),
      Err(_) => bytes.len(),
    };
    let text = String::from_utf8_lossy(&bytes[..usable]).into_owned();
    Ok((text, offset + usable as u64))
  }

  fn file_path(&self, job_identifier: &str, run_identifier: &str, file_name: &str) -> PathBuf {
    self.run_directory(job_identifier, run_identifier).join(file_name)
  }
}

fn lock_path(path: &Path) -> PathBuf {
  let mut name = path.as_os_str().to_os_string();
  name.push(".lock");
  PathBuf::from(name)
}

fn load_data<T: DeserializeOwned>(path: &Path) -> Result<T> {
  let raw = fs::read_to_string(path)?;
  Ok(serde_json::from_str(&raw)?)
}

fn save_data<T: Serialize>(path: &Path, data: &T) -> Result<()> {
  let mut temporary = path.as_os_str().to_os_string();
  temporary.push(".tmp");
  let temporary = PathBuf::from(temporary);
  fs::write(&temporary, serde_json::to_vec_pretty(data)?)?;
  fs::rename(&temporary, path)?;
  Ok(())
}
