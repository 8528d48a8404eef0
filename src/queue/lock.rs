use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::StoreError;

const RETRY_EVERY: Duration = Duration::from_millis(20);

/// Cross-process exclusive advisory lock on `<store>.lock`.
///
/// The OS drops the lock when the holder exits, so a crashed process never
/// leaves the store wedged. The lock file itself is never removed.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub(crate) fn acquire(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;
        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if started.elapsed() >= timeout {
                        return Err(StoreError::LockTimeout(path.to_path_buf()));
                    }
                    thread::sleep(RETRY_EVERY);
                }
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release store lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json.lock");
        let held = FileLock::acquire(&path, Duration::from_millis(50)).unwrap();
        let err = FileLock::acquire(&path, Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout(_)));
        drop(held);
        FileLock::acquire(&path, Duration::from_millis(50)).unwrap();
    }

    #[test]
    fn leftover_lock_file_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json.lock");
        std::fs::write(&path, "4242").unwrap();
        let started = Instant::now();
        FileLock::acquire(&path, Duration::from_secs(5)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(path.exists());
    }

    #[test]
    fn release_keeps_file_for_next_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json.lock");
        drop(FileLock::acquire(&path, Duration::from_millis(50)).unwrap());
        assert!(path.exists());
        let waiter = {
            let path = path.clone();
            thread::spawn(move || FileLock::acquire(&path, Duration::from_secs(5)).map(drop))
        };
        waiter.join().unwrap().unwrap();
    }
}
