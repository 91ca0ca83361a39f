//! Cross-process lock on a directory, implemented with an advisory lock on
//! a `.lock` file inside it.
//!
//! Every acquisition opens its own file handle, so two threads of the same
//! process contend exactly like two processes do.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use tracing::trace;

use crate::error::{TxnError, TxnResult};

/// Name of the lock file inside a locked directory.
pub const LOCK_FILE: &str = ".lock";

/// Which side of the lock to take.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A held directory lock. Released when dropped.
#[derive(Debug)]
pub struct DirectoryLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl DirectoryLock {
    /// Block until the lock on `dir` is held in `mode`.
    pub fn acquire(dir: &Path, mode: LockMode) -> TxnResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        let lock_err = |source| TxnError::Lock {
            path: path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(lock_err)?;
        match mode {
            LockMode::Shared => file.lock_shared(),
            LockMode::Exclusive => file.lock_exclusive(),
        }
        .map_err(lock_err)?;
        trace!(path = %path.display(), ?mode, "acquired directory lock");
        Ok(Self { file, path, mode })
    }

    /// Take the exclusive side.
    pub fn exclusive(dir: &Path) -> TxnResult<Self> {
        Self::acquire(dir, LockMode::Exclusive)
    }

    /// Take the shared side.
    pub fn shared(dir: &Path) -> TxnResult<Self> {
        Self::acquire(dir, LockMode::Shared)
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        trace!(path = %self.path.display(), "released directory lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn exclusive_excludes_other_handles() {
        let dir = tempfile::tempdir().unwrap();
        let held = DirectoryLock::exclusive(dir.path()).unwrap();
        let entered = Arc::new(AtomicBool::new(false));

        let path = dir.path().to_path_buf();
        let flag = Arc::clone(&entered);
        let waiter = thread::spawn(move || {
            let _lock = DirectoryLock::exclusive(&path).unwrap();
            flag.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!entered.load(Ordering::SeqCst));
        drop(held);
        waiter.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
    }

    #[test]
    fn shared_holders_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let first = DirectoryLock::shared(dir.path()).unwrap();
        let path = dir.path().to_path_buf();
        thread::spawn(move || {
            let second = DirectoryLock::shared(&path).unwrap();
            assert_eq!(second.mode(), LockMode::Shared);
        })
        .join()
        .unwrap();
        drop(first);
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let _lock = DirectoryLock::exclusive(&nested).unwrap();
        assert!(nested.join(LOCK_FILE).is_file());
    }
}
