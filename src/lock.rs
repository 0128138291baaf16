use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

/// Default lock timeout (5 minutes) - prevents indefinite hangs
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Exclusive advisory lock serializing gitkit sessions on one working copy.
///
/// The library itself never locks; the command-line front end takes this
/// around every session so two invocations cannot interleave git commands
/// against the same directory. Released on drop.
#[derive(Debug)]
pub struct WorkingCopyLock {
    file: File,
}

impl WorkingCopyLock {
    /// Block until the lock is held, or fail with `ErrorKind::TimedOut`.
    /// Creates the lock file and its parent directories if needed.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> io::Result<Self> {
        let file = open_lock_file(lock_path)?;

        let start = Instant::now();
        let mut backoff = Duration::from_millis(10);
        let max_backoff = Duration::from_millis(500);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!(
                                "{} is busy (waited {:?})",
                                lock_path.display(),
                                timeout
                            ),
                        ));
                    }
                    log::debug!("waiting for {}", lock_path.display());
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(max_backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for WorkingCopyLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn open_lock_file(lock_path: &Path) -> io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
}
