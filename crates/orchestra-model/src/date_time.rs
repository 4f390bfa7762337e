// date_time.rs
use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use std::sync::Mutex;

/// Reloj inyectable usado por los proveedores para fechar registros.
pub trait DateTimeProvider: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// Reloj del sistema, truncado a segundos para que las fechas serializadas
/// ordenen lexicográficamente.
#[derive(Debug, Default, Clone)]
pub struct SystemDateTimeProvider;

impl DateTimeProvider for SystemDateTimeProvider {
  fn now(&self) -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
  }
}

/// Reloj fijo para pruebas; se puede avanzar manualmente.
pub struct FakeDateTimeProvider {
  now: Mutex<DateTime<Utc>>,
}

impl FakeDateTimeProvider {
  pub fn new() -> Self {
    Self { now: Mutex::new(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single().unwrap_or_default()) }
  }

  pub fn advance(&self, seconds: i64) {
    let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
    *now += chrono::Duration::seconds(seconds);
  }
}

impl Default for FakeDateTimeProvider {
  fn default() -> Self {
    Self::new()
  }
}

impl DateTimeProvider for FakeDateTimeProvider {
  fn now(&self) -> DateTime<Utc> {
    *self.now.lock().unwrap_or_else(|e| e.into_inner())
  }
}
