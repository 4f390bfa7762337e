use anyhow::Context;
use orchestra_master::install_shutdown_handler;
use orchestra_worker::{Worker, WorkerConfig};

/// Proceso worker: se conecta al master y ejecuta los runs que le asigna,
/// un proceso `orchestra-executor` por run.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = WorkerConfig::from_env().context("configuración del worker inválida")?;
    log::info!("Arrancando worker {} contra {}", config.worker_identifier, config.master_address);
    let token = install_shutdown_handler().context("no se pudieron instalar los manejadores de señal")?;

    let mut worker = Worker::new(config);
    worker.run(token).await?;
    Ok(())
}
