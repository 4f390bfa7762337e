// Archivo: shutdown.rs
// Propósito: traducir SIGTERM/SIGINT en la cancelación de un token que
// observan todos los bucles del master.
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Instala los manejadores de señal y devuelve el token que se cancela al
/// recibir cualquiera de ellas. Debe llamarse dentro del runtime.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
  let token = CancellationToken::new();
  let mut sigterm = signal(SignalKind::terminate())?;
  let mut sigint = signal(SignalKind::interrupt())?;
  let token_clone = token.clone();

  tokio::spawn(async move {
    tokio::select! {
      _ = sigterm.recv() => log::info!("SIGTERM recibido, iniciando parada ordenada"),
      _ = sigint.recv() => log::info!("SIGINT recibido, iniciando parada ordenada"),
    }
    token_clone.cancel();
  });

  Ok(token)
}
