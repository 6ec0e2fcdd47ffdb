//! Transactional provisioning for lxsmb deployments.
//!
//! The `Provisioner` realizes a target `PersistedState` on the storage pool
//! and inside the container, step by step, appending one `ResourceRecord`
//! per mutation to a `Ledger`. Any step failure unwinds the ledger newest
//! first (`compensate`) and reports the original failure. The `StateStore`
//! decides between install and management (`DeploymentState`), and the `ops`
//! modules implement the operational tool on top of the same resolver.

pub mod compensate;
pub mod concurrency;
pub mod engine;
pub mod ledger;
pub mod lifecycle;
pub mod ops;
pub mod provision;
pub mod state_store;

pub use compensate::{compensate, CompensationReport};
pub use concurrency::{install_signal_handler, shutdown_requested, OperatorLock};
pub use engine::{Backends, Plan, ProvisionReport, Provisioner, Step};
pub use ledger::{Ledger, ResourceRecord};
pub use lifecycle::{validate_change, DeploymentState};
pub use state_store::{StateStore, STATE_DIR, STATE_PATH};

use lxsmb_runtime::RuntimeError;
use lxsmb_schema::{StateError, ValidationError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("step '{step}' failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: RuntimeError,
    },
    #[error("interrupted before step '{0}'")]
    Interrupted(Step),
    #[error("precondition failed: no deployment found in container {0}, run lxsmb-setup first")]
    NotInstalled(String),
    #[error("validation error: {field} cannot change after install ({from} -> {to})")]
    Immutable {
        field: &'static str,
        from: String,
        to: String,
    },
    #[error("validation error: user '{0}' cannot be removed, enrollment is append-only")]
    PrincipalRemoved(String),
    #[error("snapshot '{tag}' is missing on: {units}")]
    SnapshotMissing { tag: String, units: String },
    #[error("backup '{0}' not found")]
    BackupNotFound(String),
    #[error("precondition failed: another lxsmb operation holds {0}")]
    Busy(PathBuf),
}

impl CoreError {
    /// Whether the error is rooted in a compensated provisioning step.
    pub fn is_step_failure(&self) -> bool {
        matches!(self, CoreError::Step { .. } | CoreError::Interrupted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_identify_the_category() {
        let v = CoreError::from(ValidationError::Quota("x".to_owned()));
        assert!(v.to_string().starts_with("validation error:"));
        let s = CoreError::from(StateError::MissingField("DATASET"));
        assert!(s.to_string().starts_with("stale state:"));
        let p = CoreError::Precondition("must run as root".to_owned());
        assert!(p.to_string().starts_with("precondition failed:"));
        assert!(CoreError::NotInstalled("105".to_owned())
            .to_string()
            .starts_with("precondition failed:"));
    }

    #[test]
    fn step_failure_names_step_and_cause() {
        let e = CoreError::Step {
            step: Step::Volumes,
            source: RuntimeError::Injected("CreateDataset".to_owned()),
        };
        let msg = e.to_string();
        assert!(msg.contains("volumes"));
        assert!(msg.contains("CreateDataset"));
        assert!(e.is_step_failure());
        assert!(!CoreError::BackupNotFound("x".to_owned()).is_step_failure());
    }
}
