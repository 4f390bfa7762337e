use anyhow::{bail, Context};
use orchestra_model::RunStatus;
use orchestra_worker::{Executor, WorkerStorage};
use tokio_util::sync::CancellationToken;

/// Executor de un run: `orchestra-executor <directorio-worker> <job> <run>`.
///
/// Lo lanza el worker. SIGINT aborta el paso en curso y deja el run en
/// `aborted`; el código de salida es 0 sólo si el run terminó bien.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

  let arguments: Vec<String> = std::env::args().skip(1).collect();
  let [root, job_identifier, run_identifier] = arguments.as_slice() else {
    bail!("uso: orchestra-executor <directorio-worker> <job> <run>");
  };

  let token = CancellationToken::new();
  let signal_token = token.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      log::warn!("SIGINT recibido, abortando el run");
      signal_token.cancel();
    }
  });

  let executor = Executor::new(WorkerStorage::new(root), job_identifier, run_identifier);
  let status = executor.run(token).await.context("el executor no pudo registrar el estado del run")?;
  if status != RunStatus::Succeeded {
    std::process::exit(1);
  }
  Ok(())
}
