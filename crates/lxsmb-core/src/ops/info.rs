use crate::engine::Backends;
use crate::state_store::StateStore;
use crate::CoreError;
use lxsmb_runtime::GuestStatus;
use lxsmb_schema::{resolve, PersistedState, Quota, UnitKind};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct UnitInfo {
    pub kind: UnitKind,
    pub dataset: String,
    pub mount_target: String,
    pub exists: bool,
    pub mounted: bool,
    pub quota: Option<Quota>,
}

/// Everything `lxsmb info` reports about one container.
#[derive(Debug, Clone, Serialize)]
pub struct Info {
    pub ctid: String,
    pub status: GuestStatus,
    pub installed: bool,
    pub state: Option<PersistedState>,
    pub units: Vec<UnitInfo>,
    /// Snapshot tags on the base unit, oldest first.
    pub snapshots: Vec<String>,
}

pub fn gather(backends: &Backends<'_>) -> Result<Info, CoreError> {
    let guest = backends.guest;
    let status = guest.status()?;
    let state = if status == GuestStatus::Missing {
        None
    } else {
        StateStore::new(guest).load()?
    };
    let mut info = Info {
        ctid: guest.id().to_owned(),
        status,
        installed: state.is_some(),
        state: None,
        units: Vec::new(),
        snapshots: Vec::new(),
    };
    let Some(state) = state else {
        return Ok(info);
    };

    let mounts = guest.bind_mounts()?;
    let storage = backends.storage;
    for unit in resolve(&state.topology)? {
        let exists = storage.exists(&unit.dataset)?;
        info.units.push(UnitInfo {
            mounted: mounts.iter().any(|m| m.target == unit.mount_target),
            quota: if exists {
                Some(storage.quota(&unit.dataset)?)
            } else {
                None
            },
            kind: unit.kind,
            dataset: unit.dataset.to_string(),
            mount_target: unit.mount_target,
            exists,
        });
    }
    if storage.exists(&state.topology.base)? {
        info.snapshots = storage.snapshots(&state.topology.base)?;
    }
    info.state = Some(state);
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Plan, Provisioner};
    use lxsmb_runtime::mock::{MockGuest, MockIdentity, MockStorage};
    use lxsmb_schema::{DatasetName, LayoutMode, Policy, Topology, Username};

    #[test]
    fn uninstalled_guest_reports_no_units() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MockStorage::new(dir.path().join("h")).unwrap();
        let guest = MockGuest::new("7", dir.path().join("g")).unwrap();
        let identity = MockIdentity::new();
        let info = gather(&Backends {
            storage: &storage,
            guest: &guest,
            identity: &identity,
        })
        .unwrap();
        assert!(!info.installed);
        assert!(info.units.is_empty());
        assert_eq!(info.status, GuestStatus::Running);
    }

    #[test]
    fn installed_guest_reports_units_and_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let storage = MockStorage::new(dir.path().join("h")).unwrap();
        storage.add_pool("tank").unwrap();
        let guest = MockGuest::new("7", dir.path().join("g")).unwrap();
        let identity = MockIdentity::new();
        let b = Backends {
            storage: &storage,
            guest: &guest,
            identity: &identity,
        };
        let mut t = Topology::new(DatasetName::parse("tank/smb").unwrap(), LayoutMode::PerUser);
        t.enroll(Username::parse("alice").unwrap());
        Provisioner::new(b)
            .cancel_when(|| false)
            .run(&Plan::new(PersistedState::new(t, Policy::default())))
            .unwrap();

        let info = gather(&b).unwrap();
        assert!(info.installed);
        assert_eq!(info.units.len(), 3);
        assert!(info.units.iter().all(|u| u.exists && u.mounted));
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["units"][2]["dataset"], "tank/smb/homes/alice");
    }
}
