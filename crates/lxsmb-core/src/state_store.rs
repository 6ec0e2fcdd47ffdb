use crate::CoreError;
use lxsmb_runtime::{Guest, RuntimeError};
use lxsmb_schema::PersistedState;
use tracing::debug;

/// Directory holding the persisted state record inside the guest.
pub const STATE_DIR: &str = "/etc/lxsmb";
/// Fixed guest path of the persisted state record.
pub const STATE_PATH: &str = "/etc/lxsmb/state.conf";

/// Load and save the single persisted record of one container.
pub struct StateStore<'a> {
    guest: &'a dyn Guest,
}

impl<'a> StateStore<'a> {
    pub fn new(guest: &'a dyn Guest) -> Self {
        Self { guest }
    }

    /// `None` means not installed. A record that exists but cannot be read
    /// back is a stale-state error, never `None`.
    pub fn load(&self) -> Result<Option<PersistedState>, CoreError> {
        let Some(content) = self.guest.read_file(STATE_PATH)? else {
            debug!("no state record at {STATE_PATH}");
            return Ok(None);
        };
        let state = PersistedState::parse(&content)?;
        Ok(Some(state))
    }

    /// Replace the record atomically (write to a sibling, then rename).
    pub fn save(&self, state: &PersistedState) -> Result<(), RuntimeError> {
        self.guest.write_file(STATE_PATH, &state.to_kv(), 0o600)?;
        debug!("saved state record to {STATE_PATH}");
        Ok(())
    }

    /// Whether `state` is exactly what is stored.
    pub fn matches(&self, state: &PersistedState) -> Result<bool, RuntimeError> {
        Ok(self.guest.read_file(STATE_PATH)?.as_deref() == Some(state.to_kv().as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxsmb_runtime::mock::MockGuest;
    use lxsmb_schema::{DatasetName, LayoutMode, Policy, Topology, Username};

    fn guest() -> (tempfile::TempDir, MockGuest) {
        let dir = tempfile::tempdir().unwrap();
        let g = MockGuest::new("105", dir.path()).unwrap();
        std::fs::create_dir_all(g.host_path(STATE_DIR)).unwrap();
        (dir, g)
    }

    fn sample() -> PersistedState {
        let mut t = Topology::new(DatasetName::parse("tank/samba").unwrap(), LayoutMode::PerUser);
        t.enroll(Username::parse("alice").unwrap());
        PersistedState::new(t, Policy::default())
    }

    #[test]
    fn absent_record_means_not_installed() {
        let (_d, g) = guest();
        assert!(StateStore::new(&g).load().unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let (_d, g) = guest();
        let store = StateStore::new(&g);
        let state = sample();
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), Some(state.clone()));
        assert!(store.matches(&state).unwrap());
    }

    #[test]
    fn record_without_dataset_is_stale_not_absent() {
        let (_d, g) = guest();
        std::fs::write(g.host_path(STATE_PATH), "LAYOUT=unified\n").unwrap();
        let err = StateStore::new(&g).load().unwrap_err();
        assert!(matches!(err, CoreError::State(_)));
        assert!(err.to_string().starts_with("stale state:"));
    }

    #[test]
    fn save_leaves_no_staging_file() {
        let (_d, g) = guest();
        StateStore::new(&g).save(&sample()).unwrap();
        let entries = g.list_dir(STATE_DIR).unwrap();
        assert_eq!(entries, vec!["state.conf"]);
    }
}
