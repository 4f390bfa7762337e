//! orchestra-model: modelo de datos del orquestador
//!
//! Define los registros `Run`, `Job` y `Task`, sus máquinas de estados y
//! los proveedores tipados (`RunProvider`, `JobProvider`, `TaskProvider`)
//! construidos sobre `document_store::DatabaseClient`. También expone el
//! almacenamiento de logs por paso (`DataStorage`) y los mensajes del
//! protocolo master/worker.

mod data_storage;
mod database;
mod date_time;
mod errors;
mod job;
mod job_provider;
pub mod protocol;
mod run;
mod run_provider;
mod task;
mod task_provider;

pub use data_storage::{DataStorage, FileDataStorage, MemoryDataStorage};
pub use database::initialize_database;
pub use date_time::{DateTimeProvider, FakeDateTimeProvider, SystemDateTimeProvider};
pub use errors::{ModelError, Result};
pub use job::{Job, JobDefinition, JobParameter, JobStep};
pub use job_provider::JobProvider;
pub use run::{FieldUpdate, Run, RunSource, RunStatus, RunStep, RunUpdate, StepStatus};
pub use run_provider::{RunArchive, RunProvider, RunQuery};
pub use task::{Task, TaskKind, TaskStatus, TaskType, TaskUpdate};
pub use task_provider::TaskProvider;
