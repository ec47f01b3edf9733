//! Lock file for single-instance enforcement.

use crate::server::{ServerError, ServerResult};

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::panic::Location;
use std::path::{Path, PathBuf};

use error_location::ErrorLocation;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

const LOCK_FILENAME: &str = "supervisor.lock";
#[cfg(unix)]
const LOCK_FILE_MODE: u32 = 0o600; // Owner read/write only

/// Prevents two supervisors from racing over the same backend.
///
/// The lock file records the supervising process, the backend port it
/// allocated, and when it was acquired, so a stale lock left by a
/// crashed instance can be detected and reclaimed.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    file: Option<File>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct LockInfo {
    supervisor_pid: u32,
    server_port: u16,
    acquired_at: String,
}

impl LockFile {
    /// Try to acquire the lock file.
    ///
    /// Returns Ok if acquired, Err if another live instance holds it.
    /// A lock whose recorded process is no longer running is treated
    /// as stale and reclaimed.
    pub fn acquire(data_dir: &Path, server_port: u16) -> ServerResult<Self> {
        let path = data_dir.join(LOCK_FILENAME);

        if path.exists()
            && let Ok(existing) = Self::read_info(&path)
        {
            if Self::is_process_running(existing.supervisor_pid) {
                return Err(ServerError::AlreadyRunning {
                    path: path.clone(),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            tracing::info!(
                "Removing stale lock file (PID {} not running)",
                existing.supervisor_pid
            );
            std::fs::remove_file(&path).ok();
        }

        #[cfg(unix)]
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(LOCK_FILE_MODE)
            .open(&path)
            .map_err(|e| ServerError::LockAcquisition {
                path: path.clone(),
                source: e,
                location: ErrorLocation::from(Location::caller()),
            })?;

        #[cfg(windows)]
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ServerError::LockAcquisition {
                path: path.clone(),
                source: e,
                location: ErrorLocation::from(Location::caller()),
            })?;

        let mut lock = Self {
            path,
            file: Some(file),
        };

        lock.write_info(server_port)?;

        Ok(lock)
    }

    fn write_info(&mut self, server_port: u16) -> ServerResult<()> {
        let info = LockInfo {
            supervisor_pid: std::process::id(),
            server_port,
            acquired_at: chrono::Utc::now().to_rfc3339(),
        };

        if let Some(ref mut file) = self.file {
            let content = serde_json::to_string_pretty(&info).map_err(|e| {
                ServerError::LockAcquisition {
                    path: self.path.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                    location: ErrorLocation::from(Location::caller()),
                }
            })?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        Ok(())
    }

    fn read_info(path: &Path) -> Result<LockInfo, std::io::Error> {
        let mut file = File::open(path)?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Check if a process with given PID is running.
    #[cfg(unix)]
    fn is_process_running(pid: u32) -> bool {
        // kill(pid, 0) returns 0 if process exists, -1 otherwise
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    /// Check if a process with given PID is running (Windows).
    #[cfg(windows)]
    fn is_process_running(pid: u32) -> bool {
        use windows_sys::Win32::Foundation::{CloseHandle, STILL_ACTIVE};
        use windows_sys::Win32::System::Threading::{
            GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        };

        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle == 0 {
                return false;
            }

            let mut exit_code: u32 = 0;
            let result = GetExitCodeProcess(handle, &mut exit_code);
            CloseHandle(handle);

            result != 0 && exit_code == STILL_ACTIVE
        }
    }

    /// Release the lock file.
    ///
    /// Called automatically on drop, but can be called
    /// explicitly for graceful shutdown.
    pub fn release(&mut self) {
        self.file.take();
        std::fs::remove_file(&self.path).ok();
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.release();
    }
}
