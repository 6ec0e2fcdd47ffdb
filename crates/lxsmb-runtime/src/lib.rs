//! External collaborators of lxsmb.
//!
//! Three seams, each a trait with a real implementation and a mock:
//! `StorageBackend` (ZFS datasets, quotas, snapshots), `Guest` (the Proxmox
//! container: status, bind mounts, command execution, files) and
//! `IdentityDirectory` (users, groups and Samba passwords inside the guest).
//! The mocks in [`mock`] keep real files under a scratch root and accept
//! injected faults so engine tests can fail any single call.

pub mod command;
pub mod guest;
pub mod identity;
pub mod mock;
pub mod prereq;
pub mod storage;

pub use command::ExecOutput;
pub use guest::{BindMount, Guest, GuestStatus, PctGuest};
pub use identity::{GuestIdentity, IdentityDirectory, Secret};
pub use prereq::{check_host_prereqs, format_missing, is_root, MissingPrereq};
pub use storage::{StorageBackend, ZfsBackend};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{program}' exited with status {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },
    #[error("container {0} does not exist")]
    GuestMissing(String),
    #[error("container {0} is not running")]
    GuestNotRunning(String),
    #[error("container {0} has no free mount point slot")]
    NoFreeMountSlot(String),
    #[error("mount target {target} is already bound to {existing}")]
    MountConflict { target: String, existing: String },
    #[error("dataset {0} does not exist")]
    DatasetMissing(String),
    #[error("unexpected output from {program}: {detail}")]
    Parse { program: String, detail: String },
    #[error("injected failure: {0}")]
    Injected(String),
    #[error("mock state poisoned: {0}")]
    Poisoned(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failure_display_is_single_line() {
        let e = RuntimeError::CommandFailed {
            program: "zfs".to_owned(),
            code: 1,
            stderr: "dataset already exists".to_owned(),
        };
        let msg = e.to_string();
        assert!(!msg.contains('\n'));
        assert!(msg.contains("zfs"));
        assert!(msg.contains("dataset already exists"));
    }

    #[test]
    fn mount_conflict_names_both_paths() {
        let e = RuntimeError::MountConflict {
            target: "/srv/samba".to_owned(),
            existing: "/tank/other".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("/srv/samba"));
        assert!(msg.contains("/tank/other"));
    }
}
