use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exclusive advisory lock held for the lifetime of a collector run.
#[derive(Debug)]
pub struct JobLock {
    file: File,
    path: PathBuf,
}

impl JobLock {
    /// Non-blocking. `Ok(None)` means another process holds the lock.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Ok(None),
            Err(TryLockError::Error(e)) => return Err(e),
        }
        // Holder's pid, for operators.
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "job lock acquired");
        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "failed to release job lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_refused_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collector.lock");

        let first = JobLock::try_acquire(&path).unwrap().expect("first lock");
        assert!(JobLock::try_acquire(&path).unwrap().is_none());
        assert_eq!(first.path(), path.as_path());

        drop(first);
        let again = JobLock::try_acquire(&path).unwrap();
        assert!(again.is_some());
    }

    #[test]
    fn lock_file_records_holder_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collector.lock");
        let _held = JobLock::try_acquire(&path).unwrap().expect("lock");
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/collector.lock");
        assert!(JobLock::try_acquire(&path).is_err());
    }
}
