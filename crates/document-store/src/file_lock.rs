// Archivo: file_lock.rs
// Propósito: lock exclusivo entre procesos sobre un fichero `.lock`, con
// timeout acotado. Se usa para las tablas del almacén y para los ficheros
// locales del worker.
use crate::errors::{Result, StoreError};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const RETRY_DELAY: Duration = Duration::from_millis(10);

/// Lock exclusivo sobre un fichero. Se libera al soltarse (`Drop`).
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Adquiere el lock sobre `path`, creando el fichero si no existe.
    /// Devuelve `StoreError::LockTimeout` si no se consigue antes de
    /// `timeout`.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).read(true).write(true).truncate(false).open(path)?;
        let started = Instant::now();
        loop {
            if try_lock_exclusive(&file)? {
                return Ok(Self { file, path: path.to_path_buf() });
            }
            if started.elapsed() >= timeout {
                return Err(StoreError::LockTimeout(path.display().to_string()));
            }
            std::thread::sleep(RETRY_DELAY);
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unlock(&self.file);
    }
}

#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(StoreError::Io(err))
    }
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;

    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

// Fuera de unix sólo queda la exclusión dentro del proceso.
#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> Result<bool> {
    Ok(true)
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}
