//! Operational commands run after install.
//!
//! Every command recomputes the unit list from the persisted record through
//! the same resolver the provisioner uses, and none of them changes topology.

pub mod backup;
pub mod info;
pub mod recycle;
pub mod snapshot;

use crate::lifecycle::DeploymentState;
use crate::state_store::StateStore;
use crate::CoreError;
use lxsmb_runtime::Guest;
use lxsmb_schema::PersistedState;

/// The persisted record of `guest`, or `NotInstalled`.
pub fn installed_state(guest: &dyn Guest) -> Result<PersistedState, CoreError> {
    DeploymentState::detect(&StateStore::new(guest))?.require_installed(guest.id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxsmb_runtime::mock::MockGuest;

    #[test]
    fn uninstalled_guest_is_a_precondition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let guest = MockGuest::new("105", dir.path()).unwrap();
        let err = installed_state(&guest).unwrap_err();
        assert!(matches!(err, CoreError::NotInstalled(ref id) if id == "105"));
        assert!(err.to_string().starts_with("precondition failed:"));
    }
}
