// Archivo: master.rs
// Propósito: raíz de composición del master. Construye los proveedores,
// el supervisor, el planificador y el procesador de tareas, y los ejecuta
// concurrentemente hasta que se cancela el token.
use crate::config::MasterConfig;
use crate::configuration::{reload_configuration, ConfigurationLoader, JsonConfigurationLoader};
use crate::control_service::ControlService;
use crate::blocking::run_blocking;
use crate::errors::{MasterError, Result};
use crate::job_scheduler::JobScheduler;
use crate::supervisor::Supervisor;
use crate::task_processor::{TaskHandler, TaskProcessor};
use crate::tasks::{AbortRunHandler, CancelRunHandler, ReloadConfigurationHandler, StopWorkerHandler,
                   TriggerRunHandler};
use crate::worker_selector::{FirstAvailableWorkerSelector, WorkerSelector};
use document_store::{DatabaseClient, JsonDatabaseClient};
use orchestra_model::{initialize_database, DataStorage, DateTimeProvider, FileDataStorage, JobProvider, RunProvider,
                      SystemDateTimeProvider, TaskProvider, TaskType};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Prioridades de las tareas por defecto (menor se ejecuta antes).
pub const RELOAD_CONFIGURATION_PRIORITY: u32 = 20;
pub const STOP_WORKER_PRIORITY: u32 = 50;
pub const ABORT_RUN_PRIORITY: u32 = 90;
pub const CANCEL_RUN_PRIORITY: u32 = 95;
pub const TRIGGER_RUN_PRIORITY: u32 = 100;

/// Dependencias externas del master.
pub struct MasterDependencies {
  pub database: Arc<dyn DatabaseClient>,
  pub data_storage: Arc<dyn DataStorage>,
  pub date_time: Arc<dyn DateTimeProvider>,
  pub worker_selector: Arc<dyn WorkerSelector>,
  pub configuration_loader: Arc<dyn ConfigurationLoader>,
}

pub struct Master {
  config: MasterConfig,
  supervisor: Arc<Supervisor>,
  job_scheduler: Arc<JobScheduler>,
  task_processor: Arc<TaskProcessor>,
  job_provider: Arc<JobProvider>,
  run_provider: Arc<RunProvider>,
  task_provider: Arc<TaskProvider>,
  configuration_loader: Arc<dyn ConfigurationLoader>,
}

impl Master {
  pub fn new(config: MasterConfig, dependencies: MasterDependencies) -> Self {
    let MasterDependencies { database, data_storage, date_time, worker_selector, configuration_loader } =
      dependencies;
    let job_provider = Arc::new(JobProvider::new(database.clone(), date_time.clone()));
    let run_provider = Arc::new(RunProvider::new(database.clone(), data_storage, date_time.clone()));
    let task_provider = Arc::new(TaskProvider::new(database, date_time.clone()));
    let supervisor = Arc::new(Supervisor::new(run_provider.clone()));
    let job_scheduler = Arc::new(JobScheduler::new(supervisor.clone(),
                                                   job_provider.clone(),
                                                   run_provider.clone(),
                                                   worker_selector,
                                                   date_time).with_update_interval(config.scheduler_interval));

    let mut task_processor = TaskProcessor::new(task_provider.clone()).with_update_interval(config.task_interval);
    Self::register_default_tasks(&mut task_processor,
                                 &supervisor,
                                 &job_scheduler,
                                 &job_provider,
                                 &run_provider,
                                 &configuration_loader);

    Self { config,
           supervisor,
           job_scheduler,
           task_processor: Arc::new(task_processor),
           job_provider,
           run_provider,
           task_provider,
           configuration_loader }
  }

  /// Master con almacén en disco, logs en disco y configuración JSON, según
  /// `config`.
  pub fn from_config(config: MasterConfig) -> Result<Self> {
    let database = Arc::new(JsonDatabaseClient::new(&config.database_directory));
    initialize_database(database.as_ref())?;
    let dependencies = MasterDependencies { database,
                                            data_storage: Arc::new(FileDataStorage::new(&config.data_directory)),
                                            date_time: Arc::new(SystemDateTimeProvider),
                                            worker_selector: Arc::new(FirstAvailableWorkerSelector),
                                            configuration_loader:
                                              Arc::new(JsonConfigurationLoader::new(&config.configuration_path)) };
    Ok(Self::new(config, dependencies))
  }

  fn register_default_tasks(task_processor: &mut TaskProcessor,
                            supervisor: &Arc<Supervisor>,
                            job_scheduler: &Arc<JobScheduler>,
                            job_provider: &Arc<JobProvider>,
                            run_provider: &Arc<RunProvider>,
                            configuration_loader: &Arc<dyn ConfigurationLoader>) {
    let cancel_run: Arc<dyn TaskHandler> = Arc::new(CancelRunHandler { job_scheduler: job_scheduler.clone() });
    task_processor.register_handler(TaskType::ReloadConfiguration,
                                    RELOAD_CONFIGURATION_PRIORITY,
                                    Arc::new(ReloadConfigurationHandler { job_provider: job_provider.clone(),
                                                                          loader: configuration_loader.clone() }),
                                    None);
    task_processor.register_handler(TaskType::StopWorker,
                                    STOP_WORKER_PRIORITY,
                                    Arc::new(StopWorkerHandler { supervisor: supervisor.clone() }),
                                    None);
    task_processor.register_handler(TaskType::AbortRun,
                                    ABORT_RUN_PRIORITY,
                                    Arc::new(AbortRunHandler { job_scheduler: job_scheduler.clone() }),
                                    None);
    task_processor.register_handler(TaskType::CancelRun, CANCEL_RUN_PRIORITY, cancel_run.clone(), None);
    task_processor.register_handler(TaskType::TriggerRun,
                                    TRIGGER_RUN_PRIORITY,
                                    Arc::new(TriggerRunHandler { job_scheduler: job_scheduler.clone(),
                                                                 run_provider: run_provider.clone() }),
                                    Some(cancel_run));
  }

  pub fn reload_configuration(&self) -> Result<()> {
    reload_configuration(&self.job_provider, self.configuration_loader.as_ref())
  }

  pub async fn bind(&self) -> Result<TcpListener> {
    Ok(TcpListener::bind(&self.config.listen_address).await?)
  }

  /// Recarga la configuración y ejecuta el supervisor, el planificador y el
  /// procesador de tareas, cada uno en su propia tarea de tokio, hasta que
  /// se cancela `token`.
  pub async fn run(&self, listener: TcpListener, token: CancellationToken) -> Result<()> {
    log::info!("Iniciando master");
    let job_provider = self.job_provider.clone();
    let loader = self.configuration_loader.clone();
    run_blocking(move || reload_configuration(&job_provider, loader.as_ref())).await?;

    let server = tokio::spawn(self.supervisor.clone().run_server(listener, token.clone()));
    let scheduler = tokio::spawn(self.job_scheduler.clone().run(token.clone()));
    let task_processor = self.task_processor.clone();
    let processor_token = token.clone();
    let processor = tokio::spawn(async move { task_processor.run(processor_token).await });

    let (server, scheduler, processor) = tokio::join!(server, scheduler, processor);
    for (name, joined) in [("planificador", scheduler), ("procesador de tareas", processor)] {
      if let Err(e) = joined {
        log::error!("El {} terminó de forma anómala: {}", name, e);
      }
    }
    log::info!("Master detenido");
    server.map_err(|e| MasterError::Interrupted(format!("supervisor: {}", e)))?
  }

  pub fn control_service(&self) -> ControlService {
    ControlService::new(self.job_provider.clone(),
                        self.run_provider.clone(),
                        self.task_provider.clone(),
                        self.job_scheduler.clone())
  }

  pub fn supervisor(&self) -> &Arc<Supervisor> {
    &self.supervisor
  }

  pub fn job_scheduler(&self) -> &Arc<JobScheduler> {
    &self.job_scheduler
  }

  pub fn task_processor(&self) -> &Arc<TaskProcessor> {
    &self.task_processor
  }

  pub fn job_provider(&self) -> &Arc<JobProvider> {
    &self.job_provider
  }

  pub fn run_provider(&self) -> &Arc<RunProvider> {
    &self.run_provider
  }

  pub fn task_provider(&self) -> &Arc<TaskProvider> {
    &self.task_provider
  }
}
