use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Default host directory for per-container lock files.
pub const DEFAULT_RUN_DIR: &str = "/run/lxsmb";

/// Host-side advisory lock held for every mutating operation on one
/// container. Both binaries take the same lock file.
pub struct OperatorLock {
    lock_file: File,
    path: PathBuf,
}

impl OperatorLock {
    pub fn path_for(run_dir: &Path, ctid: &str) -> PathBuf {
        run_dir.join(format!("{ctid}.lock"))
    }

    fn open(lock_path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    /// Take the lock or fail immediately with `Busy`.
    pub fn acquire(run_dir: &Path, ctid: &str) -> Result<Self, CoreError> {
        let path = Self::path_for(run_dir, ctid);
        let file = Self::open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("holding operator lock {}", path.display());
                Ok(Self {
                    lock_file: file,
                    path,
                })
            }
            Err(_) => Err(CoreError::Busy(path)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for OperatorLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C asks the running operation to stop at the next step
/// boundary; a second one exits at once.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(130);
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\ninterrupt received, rolling back after the current step...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_file_is_named_after_container() {
        let dir = tempfile::tempdir().unwrap();
        let lock = OperatorLock::acquire(dir.path(), "105").unwrap();
        assert_eq!(lock.path(), dir.path().join("105.lock"));
        assert!(lock.path().exists());
    }

    #[test]
    fn second_operator_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let _held = OperatorLock::acquire(dir.path(), "105").unwrap();
        let err = OperatorLock::acquire(dir.path(), "105").err().unwrap();
        assert!(matches!(err, CoreError::Busy(_)));
        assert!(err.to_string().starts_with("precondition failed:"));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _lock = OperatorLock::acquire(dir.path(), "105").unwrap();
        }
        assert!(OperatorLock::acquire(dir.path(), "105").is_ok());
    }

    #[test]
    fn containers_lock_independently() {
        let dir = tempfile::tempdir().unwrap();
        let _a = OperatorLock::acquire(dir.path(), "105").unwrap();
        assert!(OperatorLock::acquire(dir.path(), "106").is_ok());
    }

    #[test]
    fn missing_run_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let run = dir.path().join("nested/run");
        assert!(OperatorLock::acquire(&run, "1").is_ok());
    }
}
