// protocol.rs
// Mensajes entre master y workers. Cada mensaje viaja como una línea JSON
// sobre TCP.
use crate::job::JobStep;
use crate::run::{RunStatus, RunStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Todo lo que un worker necesita para ejecutar un run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
  pub project: String,
  pub run_identifier: String,
  pub job_identifier: String,
  pub workspace: String,
  pub steps: Vec<JobStep>,
  pub parameters: Map<String, JsonValue>,
}

/// Mensajes que el master envía a un worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MasterMessage {
  AssignRun { run_request: RunRequest },
  AbortRun { run_identifier: String },
  Stop,
}

/// Mensajes que un worker envía al master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
  Hello {
    worker_identifier: String,
  },
  RunStatus {
    run_identifier: String,
    status: RunStatus,
    start_date: Option<DateTime<Utc>>,
    completion_date: Option<DateTime<Utc>>,
  },
  StepUpdate {
    run_identifier: String,
    steps: Vec<RunStep>,
  },
  LogChunk {
    run_identifier: String,
    step_index: usize,
    step_name: String,
    text: String,
  },
  Results {
    run_identifier: String,
    results: JsonValue,
  },
}

impl WorkerMessage {
  /// Run al que se refiere el mensaje, si aplica.
  pub fn run_identifier(&self) -> Option<&str> {
    match self {
      WorkerMessage::Hello { .. } => None,
      WorkerMessage::RunStatus { run_identifier, .. }
      | WorkerMessage::StepUpdate { run_identifier, .. }
      | WorkerMessage::LogChunk { run_identifier, .. }
      | WorkerMessage::Results { run_identifier, .. } => Some(run_identifier),
    }
  }
}

/// Serializa un mensaje como una línea terminada en `\n`.
pub fn encode_line<T: Serialize>(message: &T) -> serde_json::Result<String> {
  let mut line = serde_json::to_string(message)?;
  line.push('\n');
  Ok(line)
}

pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> serde_json::Result<T> {
  serde_json::from_str(line.trim_end())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn messages_use_snake_case_tags() {
    let line = encode_line(&MasterMessage::AbortRun { run_identifier: "r1".into() }).unwrap();
    assert!(line.ends_with('\n'));
    let value: JsonValue = serde_json::from_str(&line).unwrap();
    assert_eq!(value, json!({"type": "abort_run", "run_identifier": "r1"}));

    let hello: WorkerMessage = decode_line("{\"type\":\"hello\",\"worker_identifier\":\"w1\"}\n").unwrap();
    assert_eq!(hello, WorkerMessage::Hello { worker_identifier: "w1".into() });
    assert_eq!(hello.run_identifier(), None);
  }
}
