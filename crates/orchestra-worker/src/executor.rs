// Archivo: executor.rs
// Propósito: ejecutar los pasos de un run dentro del proceso executor.
// Los pasos corren en secuencia en `workspaces/<workspace>`; cada
// transición se refleja en `status.json` para que el worker la sincronice.
use crate::errors::{Result, WorkerError};
use crate::worker_storage::{LocalRunStatus, WorkerStorage};
use orchestra_model::protocol::RunRequest;
use orchestra_model::{JobStep, RunStatus, RunStep, StepStatus};
use serde_json::{Map, Value as JsonValue};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Variable de entorno con la ruta donde un paso puede dejar resultados.
pub const RESULTS_FILE_VARIABLE: &str = "ORCHESTRA_RESULTS_FILE";

pub struct Executor {
  storage: WorkerStorage,
  job_identifier: String,
  run_identifier: String,
}

impl Executor {
  pub fn new(storage: WorkerStorage, job_identifier: &str, run_identifier: &str) -> Self {
    Self { storage,
           job_identifier: job_identifier.to_string(),
           run_identifier: run_identifier.to_string() }
  }

  /// Ejecuta el run completo y devuelve su estado final. Cancelar `token`
  /// equivale a abortar: el paso en curso queda `aborted`, el resto
  /// `skipped` y el run `aborted`.
  pub async fn run(&self, token: CancellationToken) -> Result<RunStatus> {
    log::info!("Ejecutando run {} del job {}", self.run_identifier, self.job_identifier);
    let request = self.storage.load_request(&self.job_identifier, &self.run_identifier)?;

    let mut status = LocalRunStatus::unknown(&self.job_identifier, &self.run_identifier);
    status.status = Some(RunStatus::Running);
    status.start_date = Some(chrono::Utc::now());
    status.steps = request.steps
                          .iter()
                          .enumerate()
                          .map(|(index, step)| RunStep { index,
                                                         name: step.name.clone(),
                                                         command: step.command.clone(),
                                                         status: StepStatus::Pending })
                          .collect();
    self.storage.save_status(&status)?;

    let final_status = match self.execute_steps(&request, &mut status, &token).await {
      Ok(final_status) => final_status,
      Err(e) => {
        log::error!("Fallo ejecutando el run {}: {}", self.run_identifier, e);
        RunStatus::Exception
      }
    };
    status.status = Some(final_status);
    status.completion_date = Some(chrono::Utc::now());
    self.storage.save_status(&status)?;
    log::info!("Run {} completado con estado {}", self.run_identifier, final_status);
    Ok(final_status)
  }

  async fn execute_steps(&self, request: &RunRequest, status: &mut LocalRunStatus, token: &CancellationToken)
                         -> Result<RunStatus> {
    let workspace = self.storage.workspace_directory(&request.workspace);
    std::fs::create_dir_all(&workspace)?;

    let mut final_status = RunStatus::Succeeded;
    let mut is_skipping = false;
    for (index, step) in request.steps.iter().enumerate() {
      if !is_skipping && token.is_cancelled() {
        final_status = RunStatus::Aborted;
        is_skipping = true;
      }
      if is_skipping {
        self.update_step(status, index, StepStatus::Skipped)?;
        continue;
      }

      log::info!("Paso {} en ejecución", step.name);
      self.update_step(status, index, StepStatus::Running)?;
      let step_status = match self.execute_step(&workspace, request, index, step, token).await {
        Ok(step_status) => step_status,
        Err(e) => {
          log::error!("Fallo ejecutando el paso {}: {}", step.name, e);
          StepStatus::Exception
        }
      };
      self.update_step(status, index, step_status)?;
      log::info!("Paso {} completado con estado {:?}", step.name, step_status);

      match step_status {
        StepStatus::Failed => final_status = RunStatus::Failed,
        StepStatus::Exception => final_status = RunStatus::Exception,
        StepStatus::Aborted => final_status = RunStatus::Aborted,
        _ => continue,
      }
      is_skipping = true;
    }
    Ok(final_status)
  }

  async fn execute_step(&self,
                        workspace: &Path,
                        request: &RunRequest,
                        index: usize,
                        step: &JobStep,
                        token: &CancellationToken)
                        -> Result<StepStatus> {
    let command = step.command
                      .iter()
                      .map(|argument| resolve_argument(argument, &request.parameters))
                      .collect::<Result<Vec<String>>>()?;
    let (program, arguments) =
      command.split_first().ok_or_else(|| WorkerError::Template(format!("el paso {} no tiene comando", step.name)))?;
    log::info!("Comando del paso: {}", command.join(" "));

    let log_path = self.storage.log_path(&self.job_identifier, &self.run_identifier, index, &step.name);
    let log_file = std::fs::File::create(log_path)?;
    let mut child = Command::new(program).args(arguments)
                                         .current_dir(workspace)
                                         .stdin(Stdio::null())
                                         .stdout(Stdio::from(log_file.try_clone()?))
                                         .stderr(Stdio::from(log_file))
                                         .env(RESULTS_FILE_VARIABLE,
                                              self.storage.results_path(&self.job_identifier, &self.run_identifier))
                                         .kill_on_drop(true)
                                         .spawn()?;

    tokio::select! {
      exit = child.wait() => Ok(if exit?.success() { StepStatus::Succeeded } else { StepStatus::Failed }),
      _ = token.cancelled() => {
        log::warn!("Abortando el paso {}", step.name);
        child.start_kill()?;
        child.wait().await?;
        Ok(StepStatus::Aborted)
      }
    }
  }

  fn update_step(&self, status: &mut LocalRunStatus, index: usize, step_status: StepStatus) -> Result<()> {
    if let Some(step) = status.steps.get_mut(index) {
      step.status = step_status;
    }
    self.storage.save_status(status)
  }
}

/// Sustituye los `{nombre}` de un argumento por el parámetro del run o,
/// si no existe, por la variable de entorno. `{{` y `}}` escapan llaves.
pub fn resolve_argument(argument: &str, parameters: &Map<String, JsonValue>) -> Result<String> {
  let mut resolved = String::with_capacity(argument.len());
  let mut chars = argument.chars().peekable();
  while let Some(c) = chars.next() {
    match c {
      '{' if chars.peek() == Some(&'{') => {
        chars.next();
        resolved.push('{');
      }
      '}' if chars.peek() == Some(&'}') => {
        chars.next();
        resolved.push('}');
      }
      '{' => {
        let mut name = String::new();
        loop {
          match chars.next() {
            Some('}') => break,
            Some(c) => name.push(c),
            None => return Err(WorkerError::Template(format!("llave sin cerrar en '{}'", argument))),
          }
        }
        resolved.push_str(&lookup(&name, parameters)?);
      }
      c => resolved.push(c),
    }
  }
  Ok(resolved)
}

fn lookup(name: &str, parameters: &Map<String, JsonValue>) -> Result<String> {
  match parameters.get(name) {
    Some(JsonValue::String(value)) => Ok(value.clone()),
    Some(value) => Ok(value.to_string()),
    None => std::env::var(name).map_err(|_| WorkerError::Template(format!("parámetro desconocido '{}'", name))),
  }
}
