//! orchestra-master: proceso maestro del orquestador
//!
//! Acepta conexiones de workers (`Supervisor`), asigna runs pendientes a
//! workers libres (`JobScheduler` + `WorkerSelector`) y procesa la cola de
//! tareas de control (`TaskProcessor`). `Master` compone todas las piezas y
//! `ControlService` expone las operaciones que usa la capa de servicio.
//!
//! Los tres bucles comparten un `CancellationToken`; cada uno termina su
//! unidad de trabajo en curso antes de salir.

mod blocking;
pub mod config;
pub mod configuration;
pub mod control_service;
pub mod errors;
pub mod job_scheduler;
pub mod master;
pub mod shutdown;
pub mod supervisor;
pub mod task_processor;
pub mod tasks;
pub mod worker_selector;

pub use config::MasterConfig;
pub use configuration::{ConfigurationLoader, JsonConfigurationLoader, MasterConfiguration};
pub use control_service::{ControlService, OperationStatus};
pub use errors::{MasterError, Result};
pub use job_scheduler::JobScheduler;
pub use master::{Master, MasterDependencies};
pub use shutdown::install_shutdown_handler;
pub use supervisor::{Supervisor, WorkerConnection, WorkerState};
pub use task_processor::{TaskHandler, TaskProcessor};
pub use worker_selector::{FirstAvailableWorkerSelector, WorkerSelector};
