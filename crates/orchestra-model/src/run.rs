// run.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Estado de un run.
///
/// `pending → running → {succeeded, failed, exception, aborted}`,
/// `pending → cancelled` mientras no tenga worker, y
/// `running → aborting → aborted` cuando se pide abortar en vuelo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
  Pending,
  Running,
  Aborting,
  Succeeded,
  Failed,
  Exception,
  Aborted,
  Cancelled,
}

impl RunStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self,
             RunStatus::Succeeded | RunStatus::Failed | RunStatus::Exception | RunStatus::Aborted | RunStatus::Cancelled)
  }

  /// Indica si la transición `self → next` está permitida. Repetir el
  /// estado actual se acepta como no-op.
  pub fn can_transition_to(&self, next: RunStatus) -> bool {
    use RunStatus::*;
    if *self == next {
      return true;
    }
    match self {
      Pending => matches!(next, Running | Cancelled | Exception),
      Running => matches!(next, Aborting | Succeeded | Failed | Exception | Aborted),
      Aborting => matches!(next, Aborted | Succeeded | Failed | Exception),
      Succeeded | Failed | Exception | Aborted | Cancelled => false,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      RunStatus::Pending => "pending",
      RunStatus::Running => "running",
      RunStatus::Aborting => "aborting",
      RunStatus::Succeeded => "succeeded",
      RunStatus::Failed => "failed",
      RunStatus::Exception => "exception",
      RunStatus::Aborted => "aborted",
      RunStatus::Cancelled => "cancelled",
    }
  }
}

impl fmt::Display for RunStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// Estado de un paso dentro de un run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
  Pending,
  Running,
  Succeeded,
  Failed,
  Exception,
  Skipped,
  Aborted,
}

impl StepStatus {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, StepStatus::Pending | StepStatus::Running)
  }
}

/// Un paso del run: comando (plantilla) y estado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
  pub index: usize,
  pub name: String,
  pub command: Vec<String>,
  pub status: StepStatus,
}

/// Origen de un run: usuario, planificación o run padre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunSource {
  User { identifier: String },
  Schedule { identifier: String },
  Run { project: String, identifier: String },
}

/// Registro persistido de un run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
  pub identifier: String,
  pub project: String,
  pub job: String,
  pub parameters: Map<String, JsonValue>,
  pub source: RunSource,
  pub worker: Option<String>,
  pub status: RunStatus,
  pub steps: Option<Vec<RunStep>>,
  pub start_date: Option<DateTime<Utc>>,
  pub completion_date: Option<DateTime<Utc>>,
  pub results: Option<JsonValue>,
  pub should_cancel: bool,
  pub should_abort: bool,
  pub creation_date: DateTime<Utc>,
  pub update_date: DateTime<Utc>,
}

/// Campo de un parche: sin tocar o con un valor nuevo.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate<T> {
  Unset,
  Set(T),
}

impl<T> Default for FieldUpdate<T> {
  fn default() -> Self {
    FieldUpdate::Unset
  }
}

impl<T: Clone> FieldUpdate<T> {
  pub fn is_set(&self) -> bool {
    matches!(self, FieldUpdate::Set(_))
  }

  pub fn value(&self) -> Option<&T> {
    match self {
      FieldUpdate::Set(v) => Some(v),
      FieldUpdate::Unset => None,
    }
  }

  /// Devuelve el valor nuevo o `current` si el campo no se toca.
  pub fn or(&self, current: T) -> T {
    match self {
      FieldUpdate::Set(v) => v.clone(),
      FieldUpdate::Unset => current,
    }
  }
}

impl<T: Serialize> FieldUpdate<T> {
  /// Escribe el campo en `document` sólo si está fijado.
  pub fn write_into(&self, key: &str, document: &mut Map<String, JsonValue>) -> serde_json::Result<()> {
    if let FieldUpdate::Set(v) = self {
      document.insert(key.to_string(), serde_json::to_value(v)?);
    }
    Ok(())
  }
}

/// Parche explícito sobre el estado de un run. Sólo los campos `Set` se
/// mezclan; `update_date` lo fija siempre el proveedor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunUpdate {
  pub worker: FieldUpdate<String>,
  pub status: FieldUpdate<RunStatus>,
  pub start_date: FieldUpdate<DateTime<Utc>>,
  pub completion_date: FieldUpdate<DateTime<Utc>>,
  pub should_cancel: FieldUpdate<bool>,
  pub should_abort: FieldUpdate<bool>,
}

impl RunUpdate {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn worker(mut self, worker: impl Into<String>) -> Self {
    self.worker = FieldUpdate::Set(worker.into());
    self
  }

  pub fn status(mut self, status: RunStatus) -> Self {
    self.status = FieldUpdate::Set(status);
    self
  }

  pub fn start_date(mut self, date: DateTime<Utc>) -> Self {
    self.start_date = FieldUpdate::Set(date);
    self
  }

  pub fn completion_date(mut self, date: DateTime<Utc>) -> Self {
    self.completion_date = FieldUpdate::Set(date);
    self
  }

  pub fn should_cancel(mut self, value: bool) -> Self {
    self.should_cancel = FieldUpdate::Set(value);
    self
  }

  pub fn should_abort(mut self, value: bool) -> Self {
    self.should_abort = FieldUpdate::Set(value);
    self
  }

  /// Aplica el parche a una copia de `run`.
  pub fn apply(&self, run: &Run, update_date: DateTime<Utc>) -> Run {
    let mut next = run.clone();
    next.worker = self.worker.value().cloned().or(next.worker);
    next.status = self.status.or(next.status);
    next.start_date = self.start_date.value().copied().or(next.start_date);
    next.completion_date = self.completion_date.value().copied().or(next.completion_date);
    next.should_cancel = self.should_cancel.or(next.should_cancel);
    next.should_abort = self.should_abort.or(next.should_abort);
    next.update_date = update_date;
    next
  }

  /// Documento parcial para `DatabaseClient::update_one`.
  pub fn to_document(&self, update_date: DateTime<Utc>) -> serde_json::Result<Map<String, JsonValue>> {
    let mut document = Map::new();
    self.worker.write_into("worker", &mut document)?;
    self.status.write_into("status", &mut document)?;
    self.start_date.write_into("start_date", &mut document)?;
    self.completion_date.write_into("completion_date", &mut document)?;
    self.should_cancel.write_into("should_cancel", &mut document)?;
    self.should_abort.write_into("should_abort", &mut document)?;
    document.insert("update_date".to_string(), serde_json::to_value(update_date)?);
    Ok(document)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn terminal_states_never_reopen() {
    let all = [RunStatus::Pending,
               RunStatus::Running,
               RunStatus::Aborting,
               RunStatus::Succeeded,
               RunStatus::Failed,
               RunStatus::Exception,
               RunStatus::Aborted,
               RunStatus::Cancelled];
    for from in all.iter().filter(|s| s.is_terminal()) {
      for to in all.iter().filter(|s| **s != *from) {
        assert!(!from.can_transition_to(*to), "{} -> {}", from, to);
      }
    }
    assert!(!RunStatus::Running.can_transition_to(RunStatus::Pending));
    assert!(!RunStatus::Running.can_transition_to(RunStatus::Cancelled));
  }

  #[test]
  fn patch_only_writes_set_fields() {
    let now = Utc::now();
    let doc = RunUpdate::new().status(RunStatus::Running).worker("w1").to_document(now).unwrap();
    let mut keys: Vec<&str> = doc.keys().map(|k| k.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["status", "update_date", "worker"]);
    assert_eq!(doc["status"], serde_json::json!("running"));
  }
}
