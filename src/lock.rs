//! Per-provider, per-directory file locking to serialize request-response
//! cycles across processes.
//!
//! Lock files live in `~/.ccb/run/<provider>-<cwd_hash>.lock` and hold the
//! owning PID. A dead owner is treated as stale: the lock file is removed and
//! acquisition retried. Files are not unlinked on release because other
//! waiters may be racing on the same path.

use fs2::FileExt;
use md5::{Digest, Md5};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;

use crate::runtime::home_dir;

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Advisory exclusive lock scoped to one provider in one directory.
#[derive(Debug)]
pub struct ProviderLock {
    pub provider: String,
    pub timeout: Duration,
    pub lock_dir: PathBuf,
    pub lock_file: PathBuf,
    fd: Option<File>,
    acquired: bool,
}

impl ProviderLock {
    /// Create a lock handle for a provider and working directory.
    pub fn new(provider: &str, timeout: Duration, cwd: &str) -> Self {
        let cwd = if cwd.is_empty() {
            std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            cwd.to_string()
        };

        let lock_dir = home_dir().join(".ccb").join("run");
        let digest = Md5::digest(cwd.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        let lock_file = lock_dir.join(format!("{provider}-{}.lock", &hex[..8]));

        Self {
            provider: provider.to_string(),
            timeout,
            lock_dir,
            lock_file,
            fd: None,
            acquired: false,
        }
    }

    /// Attempt to acquire the lock without blocking.
    pub fn try_acquire(&mut self) -> bool {
        let _ = fs::create_dir_all(&self.lock_dir);

        if !self.open_fd() {
            return false;
        }
        if self.try_lock_once() {
            return true;
        }

        // Stale-owner recovery: a dead PID's lock file is removed and the
        // attempt repeated once on a fresh descriptor.
        if self.check_stale_lock() {
            self.fd = None;
            if self.open_fd() && self.try_lock_once() {
                return true;
            }
        }

        self.fd = None;
        false
    }

    /// Acquire the lock, retrying every 100 ms up to the timeout.
    pub async fn acquire(&mut self) -> bool {
        let _ = fs::create_dir_all(&self.lock_dir);

        if !self.open_fd() {
            return false;
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut stale_checked = false;

        while tokio::time::Instant::now() < deadline {
            if self.try_lock_once() {
                return true;
            }

            if !stale_checked {
                stale_checked = true;
                if self.check_stale_lock() {
                    self.fd = None;
                    if self.open_fd() && self.try_lock_once() {
                        return true;
                    }
                }
            }

            sleep(RETRY_INTERVAL).await;
        }

        self.fd = None;
        false
    }

    /// Release the lock. The file stays on disk.
    pub fn release(&mut self) {
        if let Some(fd) = self.fd.take() {
            if self.acquired {
                let _ = fd.unlock();
            }
            self.acquired = false;
        }
    }

    fn open_fd(&mut self) -> bool {
        match OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_file)
        {
            Ok(f) => {
                self.fd = Some(f);
                true
            }
            Err(_) => false,
        }
    }

    fn try_lock_once(&mut self) -> bool {
        let Some(fd) = self.fd.as_mut() else {
            return false;
        };
        if fd.try_lock_exclusive().is_err() {
            return false;
        }

        // Record ownership so waiters can probe our liveness.
        let pid = format!("{}\n", std::process::id());
        let _ = fd.seek(SeekFrom::Start(0));
        let _ = fd.write_all(pid.as_bytes());
        let _ = fd.set_len(pid.len() as u64);
        self.acquired = true;
        true
    }

    fn check_stale_lock(&self) -> bool {
        let Ok(content) = fs::read_to_string(&self.lock_file) else {
            return false;
        };
        let content = content.trim();
        if content.is_empty() {
            return false;
        }
        let Ok(pid) = content.parse::<u32>() else {
            return false;
        };
        if !pid_alive(pid) {
            let _ = fs::remove_file(&self.lock_file);
            return true;
        }
        false
    }
}

impl Drop for ProviderLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Check whether a process with the given PID is still running.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    // Signal 0 probes existence without delivering anything.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Check whether a process with the given PID is still running.
#[cfg(windows)]
pub fn pid_alive(pid: u32) -> bool {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, SYNCHRONIZE};

    if pid == 0 {
        return false;
    }
    unsafe {
        let handle = OpenProcess(SYNCHRONIZE, 0, pid);
        if handle.is_null() {
            return false;
        }
        CloseHandle(handle);
        true
    }
}
