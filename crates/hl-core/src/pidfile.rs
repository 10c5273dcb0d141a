//! PID file utilities for single-instance management
//!
//! The first instance holds the PID file; later launches detect it and
//! forward their intent (a protocol link or a plain open) over IPC instead
//! of starting a second session manager.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Default PID file name
const PID_FILE_NAME: &str = "hostlink.pid";

/// PID file kept beside the config file, so each config runs its own instance
pub fn pid_path_for(config_path: &Path) -> PathBuf {
    config_path.with_file_name(PID_FILE_NAME)
}

/// Read the PID from the PID file
///
/// Returns `Ok(Some(pid))` if the file exists and contains a valid PID,
/// `Ok(None)` if the file doesn't exist, or an error if the file is malformed.
pub fn read_pid_file(path: &Path) -> io::Result<Option<u32>> {
    match fs::File::open(path) {
        Ok(mut file) => {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            let pid = contents
                .trim()
                .parse::<u32>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Some(pid))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write the PID to the PID file, creating parent directories
pub fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(path)?;
    writeln!(file, "{}", pid)?;
    Ok(())
}

/// Remove the PID file
///
/// Returns `Ok(())` even if the file doesn't exist.
pub fn remove_pid_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Check if a process with the given PID is still alive
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    // kill(pid, 0): 0 means alive, EPERM means alive but not ours
    unsafe {
        let result = libc::kill(pid as libc::pid_t, 0);
        if result == 0 {
            return true;
        }
        let err = std::io::Error::last_os_error();
        err.raw_os_error() == Some(libc::EPERM)
    }
}

#[cfg(windows)]
pub fn is_process_alive(pid: u32) -> bool {
    use std::ptr;
    use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};

    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == INVALID_HANDLE_VALUE || handle == ptr::null_mut() {
            return false;
        }
        CloseHandle(handle);
        true
    }
}

/// Result of trying to become the single running instance
pub enum InstanceLock {
    /// This process is the instance; drop the guard on exit
    Acquired(PidFileGuard),
    /// Another live instance holds the lock
    Running(u32),
}

/// Claim the PID file at `path` for the current process.
///
/// The file is created exclusively, so of two launches racing for it only
/// one wins. A PID file left behind by a dead process, or one that cannot
/// be parsed, is removed and claimed once more.
pub fn acquire_instance_lock(path: &Path) -> io::Result<InstanceLock> {
    let own = std::process::id();
    for _ in 0..2 {
        if claim_pid_file(path, own)? {
            return Ok(InstanceLock::Acquired(PidFileGuard {
                path: path.to_path_buf(),
            }));
        }

        match read_pid_file(path) {
            Ok(Some(pid)) if pid != own && is_process_alive(pid) => {
                return Ok(InstanceLock::Running(pid));
            }
            Ok(Some(pid)) => {
                tracing::info!("Taking over stale PID file {:?} (pid {})", path, pid);
            }
            // Released between the claim and the read
            Ok(None) => continue,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                tracing::warn!("Ignoring malformed PID file {:?}: {}", path, e);
            }
            Err(e) => return Err(e),
        }
        remove_pid_file(path)?;
    }

    // Another launch took the file over in between
    match read_pid_file(path)? {
        Some(pid) => Ok(InstanceLock::Running(pid)),
        None => Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            format!("PID file {:?} changed while claiming it", path),
        )),
    }
}

/// Create the PID file at `path` holding `pid`, unless it already exists.
///
/// The PID is written to a staging file that is then hard-linked into
/// place, so the file never appears without its contents.
fn claim_pid_file(path: &Path, pid: u32) -> io::Result<bool> {
    let staging = path.with_extension(format!("pid.{}", pid));
    write_pid_file(&staging, pid)?;
    let linked = fs::hard_link(&staging, path);
    if let Err(e) = fs::remove_file(&staging) {
        tracing::debug!("Failed to remove {:?}: {}", staging, e);
    }

    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e),
    }
}

/// Guard that removes the PID file when dropped
pub struct PidFileGuard {
    path: PathBuf,
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if let Err(e) = remove_pid_file(&self.path) {
            tracing::warn!("Failed to remove PID file {:?}: {}", self.path, e);
        }
    }
}
