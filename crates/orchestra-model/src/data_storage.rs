// data_storage.rs
// Almacenamiento de blobs de log direccionados por clave. Separado de los
// documentos de run para que los logs puedan crecer y leerse por trozos.
use crate::errors::{ModelError, Result};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Contrato de almacenamiento de blobs de sólo-añadir.
pub trait DataStorage: Send + Sync {
  fn exists(&self, key: &str) -> Result<bool>;
  /// Contenido completo, o `None` si la clave no existe.
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
  /// Rango de bytes `[skip, skip + limit)`.
  fn get_chunk(&self, key: &str, skip: u64, limit: Option<u64>) -> Result<Option<Vec<u8>>>;
  /// Tamaño en bytes (0 si la clave no existe).
  fn get_size(&self, key: &str) -> Result<u64>;
  fn append(&self, key: &str, data: &[u8]) -> Result<()>;
  fn delete(&self, key: &str) -> Result<()>;
}

/// Blobs como ficheros bajo un directorio raíz.
pub struct FileDataStorage {
  root: PathBuf,
}

impl FileDataStorage {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  fn path(&self, key: &str) -> Result<PathBuf> {
    let relative = Path::new(key);
    if key.is_empty() || relative.components().any(|c| !matches!(c, Component::Normal(_))) {
      return Err(ModelError::InvalidKey(key.to_string()));
    }
    Ok(self.root.join(relative))
  }
}

impl DataStorage for FileDataStorage {
  fn exists(&self, key: &str) -> Result<bool> {
    Ok(self.path(key)?.is_file())
  }

  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    let path = self.path(key)?;
    if !path.is_file() {
      return Ok(None);
    }
    Ok(Some(std::fs::read(path)?))
  }

  fn get_chunk(&self, key: &str, skip: u64, limit: Option<u64>) -> Result<Option<Vec<u8>>> {
    let path = self.path(key)?;
    if !path.is_file() {
      return Ok(None);
    }
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(skip))?;
    let mut buffer = Vec::new();
    match limit {
      Some(limit) => file.take(limit).read_to_end(&mut buffer)?,
      None => file.read_to_end(&mut buffer)?,
    };
    Ok(Some(buffer))
  }

  fn get_size(&self, key: &str) -> Result<u64> {
    let path = self.path(key)?;
    if !path.is_file() {
      return Ok(0);
    }
    Ok(std::fs::metadata(path)?.len())
  }

  fn append(&self, key: &str, data: &[u8]) -> Result<()> {
    let path = self.path(key)?;
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(data)?;
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    let path = self.path(key)?;
    if path.is_file() {
      std::fs::remove_file(path)?;
    }
    Ok(())
  }
}

/// Implementación en memoria para tests y desarrollo.
pub struct MemoryDataStorage {
  blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryDataStorage {
  pub fn new() -> Self {
    Self { blobs: Mutex::new(HashMap::new()) }
  }

  fn blobs(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
    self.blobs.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl Default for MemoryDataStorage {
  fn default() -> Self {
    Self::new()
  }
}

impl DataStorage for MemoryDataStorage {
  fn exists(&self, key: &str) -> Result<bool> {
    Ok(self.blobs().contains_key(key))
  }

  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    Ok(self.blobs().get(key).cloned())
  }

  fn get_chunk(&self, key: &str, skip: u64, limit: Option<u64>) -> Result<Option<Vec<u8>>> {
    Ok(self.blobs().get(key).map(|data| {
                             let start = (skip as usize).min(data.len());
                             let end = match limit {
                               Some(limit) => start.saturating_add(limit as usize).min(data.len()),
                               None => data.len(),
                             };
                             data[start..end].to_vec()
                           }))
  }

  fn get_size(&self, key: &str) -> Result<u64> {
    Ok(self.blobs().get(key).map(|d| d.len() as u64).unwrap_or(0))
  }

  fn append(&self, key: &str, data: &[u8]) -> Result<()> {
    self.blobs().entry(key.to_string()).or_default().extend_from_slice(data);
    Ok(())
  }

  fn delete(&self, key: &str) -> Result<()> {
    self.blobs().remove(key);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_storage_appends_and_reads_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileDataStorage::new(dir.path());
    let key = "projects/p/runs/r/step_0_build.log";
    assert!(!storage.exists(key).unwrap());
    storage.append(key, b"hello ").unwrap();
    storage.append(key, b"world\n").unwrap();
    assert_eq!(storage.get_size(key).unwrap(), 12);
    assert_eq!(storage.get_chunk(key, 6, Some(5)).unwrap().unwrap(), b"world");
    assert_eq!(storage.get_chunk(key, 20, None).unwrap().unwrap(), b"");
    storage.delete(key).unwrap();
    assert_eq!(storage.get(key).unwrap(), None);
  }

  #[test]
  fn file_storage_rejects_escaping_keys() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileDataStorage::new(dir.path());
    assert!(matches!(storage.append("../outside.log", b"x"), Err(ModelError::InvalidKey(_))));
  }

  #[test]
  fn memory_storage_chunk_is_clamped() {
    let storage = MemoryDataStorage::new();
    storage.append("k", b"abcdef").unwrap();
    assert_eq!(storage.get_chunk("k", 4, Some(10)).unwrap().unwrap(), b"ef");
    assert_eq!(storage.get_chunk("k", 10, None).unwrap().unwrap(), b"");
  }
}
