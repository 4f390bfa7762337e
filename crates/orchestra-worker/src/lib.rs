//! orchestra-worker: lado worker del orquestador
//!
//! `Worker` mantiene la sesión con el master y lanza un proceso executor
//! por run; `ExecutorWatcher` vigila ese proceso y `Executor` es lo que
//! corre dentro de él. Ambos procesos se comunican sólo a través de
//! `WorkerStorage` (ficheros JSON con lock).

pub mod config;
pub mod errors;
pub mod executor;
pub mod executor_watcher;
pub mod worker;
pub mod worker_storage;

pub use config::WorkerConfig;
pub use errors::{Result, WorkerError};
pub use executor::{resolve_argument, Executor, RESULTS_FILE_VARIABLE};
pub use executor_watcher::{ExecutorWatcher, TerminationOutcome};
pub use worker::{SessionEnd, Worker};
pub use worker_storage::{LocalRunStatus, WorkerStorage};
