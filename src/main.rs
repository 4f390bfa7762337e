use anyhow::Context;
use orchestra_master::{install_shutdown_handler, Master, MasterConfig};

/// Proceso maestro del orquestador.
///
/// Lee la configuración de `ORCHESTRA_*` (y `.env`), abre el almacén
/// documental en disco, escucha a los workers y corre el planificador y el
/// procesador de tareas hasta recibir SIGINT/SIGTERM.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = MasterConfig::from_env().context("configuración del master inválida")?;
    log::info!("Arrancando master (almacén en {})", config.database_directory.display());
    let master = Master::from_config(config).context("no se pudo inicializar el master")?;
    let token = install_shutdown_handler().context("no se pudieron instalar los manejadores de señal")?;
    let listener = master.bind().await.context("no se pudo abrir el puerto de workers")?;

    master.run(listener, token).await?;
    log::info!("Master detenido");
    Ok(())
}
