use crate::CoreError;
use chrono::Local;
use lxsmb_runtime::StorageBackend;
use lxsmb_schema::{resolve, DatasetName, PersistedState, SnapshotTag, ValidationError};
use serde::Serialize;
use tracing::{info, warn};

/// One tag and the units that do or do not carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotCoverage {
    pub tag: String,
    pub present: Vec<DatasetName>,
    pub missing: Vec<DatasetName>,
}

impl SnapshotCoverage {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoveReport {
    pub removed: Vec<DatasetName>,
    pub skipped: Vec<DatasetName>,
}

/// `lxsmb-YYYYmmdd-HHMMSS` in local time.
pub fn default_tag() -> Result<SnapshotTag, ValidationError> {
    SnapshotTag::parse(Local::now().format("lxsmb-%Y%m%d-%H%M%S").to_string())
}

fn datasets(state: &PersistedState) -> Result<Vec<DatasetName>, CoreError> {
    Ok(resolve(&state.topology)?
        .into_iter()
        .map(|u| u.dataset)
        .collect())
}

/// Snapshot every unit under one tag in a single storage call.
pub fn create(
    storage: &dyn StorageBackend,
    state: &PersistedState,
    tag: Option<SnapshotTag>,
) -> Result<SnapshotTag, CoreError> {
    let tag = match tag {
        Some(t) => t,
        None => default_tag()?,
    };
    let units = datasets(state)?;
    storage.snapshot(&units, &tag)?;
    info!("snapshot {tag} taken of {} unit(s)", units.len());
    Ok(tag)
}

/// Every tag found on any unit, ordered by first appearance walking the
/// units in resolver order (oldest first within a unit).
pub fn list(
    storage: &dyn StorageBackend,
    state: &PersistedState,
) -> Result<Vec<SnapshotCoverage>, CoreError> {
    let units = datasets(state)?;
    let mut per_unit = Vec::with_capacity(units.len());
    let mut tags: Vec<String> = Vec::new();
    for ds in &units {
        let unit_tags = if storage.exists(ds)? {
            storage.snapshots(ds)?
        } else {
            Vec::new()
        };
        for t in &unit_tags {
            if !tags.contains(t) {
                tags.push(t.clone());
            }
        }
        per_unit.push(unit_tags);
    }

    Ok(tags
        .into_iter()
        .map(|tag| {
            let (present, missing): (Vec<_>, Vec<_>) = units
                .iter()
                .zip(&per_unit)
                .partition(|(_, t)| t.contains(&tag));
            SnapshotCoverage {
                tag,
                present: present.into_iter().map(|(d, _)| d.clone()).collect(),
                missing: missing.into_iter().map(|(d, _)| d.clone()).collect(),
            }
        })
        .collect())
}

fn carries(
    storage: &dyn StorageBackend,
    ds: &DatasetName,
    tag: &SnapshotTag,
) -> Result<bool, CoreError> {
    Ok(storage.exists(ds)? && storage.snapshots(ds)?.iter().any(|t| t == tag.as_str()))
}

/// Revert every unit to `tag`. Every unit is checked first; if any lacks the
/// tag nothing is reverted. Later snapshots of each unit are discarded.
pub fn rollback(
    storage: &dyn StorageBackend,
    state: &PersistedState,
    tag: &SnapshotTag,
) -> Result<Vec<DatasetName>, CoreError> {
    let units = datasets(state)?;
    let mut missing = Vec::new();
    for ds in &units {
        if !carries(storage, ds, tag)? {
            missing.push(ds.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(CoreError::SnapshotMissing {
            tag: tag.to_string(),
            units: missing.join(", "),
        });
    }
    for ds in &units {
        storage.rollback(ds, tag)?;
        info!("rolled back {}", ds.at(tag));
    }
    Ok(units)
}

/// Destroy `tag` on every unit that carries it. Units without it are
/// skipped; a tag found nowhere is an error.
pub fn remove(
    storage: &dyn StorageBackend,
    state: &PersistedState,
    tag: &SnapshotTag,
) -> Result<RemoveReport, CoreError> {
    let units = datasets(state)?;
    let mut report = RemoveReport::default();
    for ds in units {
        if carries(storage, &ds, tag)? {
            storage.destroy_snapshot(&ds, tag)?;
            info!("removed {}", ds.at(tag));
            report.removed.push(ds);
        } else {
            warn!("{ds} has no snapshot {tag}, skipped");
            report.skipped.push(ds);
        }
    }
    if report.removed.is_empty() {
        return Err(CoreError::SnapshotMissing {
            tag: tag.to_string(),
            units: "all units".to_owned(),
        });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxsmb_runtime::mock::{Fault, MockStorage};
    use lxsmb_schema::{LayoutMode, Policy, Topology, Username};
    use std::fs;

    fn setup(users: &[&str]) -> (tempfile::TempDir, MockStorage, PersistedState) {
        let dir = tempfile::tempdir().unwrap();
        let storage = MockStorage::new(dir.path()).unwrap();
        storage.add_pool("tank").unwrap();
        let mut t = Topology::new(DatasetName::parse("tank/smb").unwrap(), LayoutMode::PerUser);
        for u in users {
            t.enroll(Username::parse(*u).unwrap());
        }
        let state = PersistedState::new(t, Policy::default());
        for unit in resolve(&state.topology).unwrap() {
            storage.create(&unit.dataset).unwrap();
        }
        (dir, storage, state)
    }

    fn tag(s: &str) -> SnapshotTag {
        SnapshotTag::parse(s).unwrap()
    }

    #[test]
    fn default_tag_has_prefix() {
        assert!(default_tag().unwrap().starts_with("lxsmb-"));
    }

    #[test]
    fn create_then_rollback_restores_content() {
        let (dir, storage, state) = setup(&["alice"]);
        let home = dir.path().join("tank/smb/homes/alice");
        fs::write(home.join("notes.txt"), "v1").unwrap();
        create(&storage, &state, Some(tag("before"))).unwrap();

        fs::write(home.join("notes.txt"), "v2").unwrap();
        fs::write(home.join("extra.txt"), "x").unwrap();
        let reverted = rollback(&storage, &state, &tag("before")).unwrap();
        assert_eq!(reverted.len(), 3);
        assert_eq!(fs::read_to_string(home.join("notes.txt")).unwrap(), "v1");
        assert!(!home.join("extra.txt").exists());
    }

    #[test]
    fn rollback_is_refused_when_a_unit_lacks_the_tag() {
        let (dir, storage, mut state) = setup(&["alice"]);
        create(&storage, &state, Some(tag("t1"))).unwrap();
        let bob = Username::parse("bob").unwrap();
        state.topology.enroll(bob);
        storage
            .create(&DatasetName::parse("tank/smb/homes/bob").unwrap())
            .unwrap();
        fs::write(dir.path().join("tank/smb/homes/alice/f"), "new").unwrap();

        let err = rollback(&storage, &state, &tag("t1")).unwrap_err();
        assert!(matches!(err, CoreError::SnapshotMissing { ref units, .. } if units == "tank/smb/homes/bob"));
        assert!(dir.path().join("tank/smb/homes/alice/f").exists());
    }

    #[test]
    fn list_reports_partial_coverage() {
        let (_dir, storage, mut state) = setup(&["alice"]);
        create(&storage, &state, Some(tag("t1"))).unwrap();
        state.topology.enroll(Username::parse("bob").unwrap());
        storage
            .create(&DatasetName::parse("tank/smb/homes/bob").unwrap())
            .unwrap();
        create(&storage, &state, Some(tag("t2"))).unwrap();

        let listing = list(&storage, &state).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].tag, "t1");
        assert!(!listing[0].is_complete());
        assert_eq!(listing[0].missing[0].as_str(), "tank/smb/homes/bob");
        assert!(listing[1].is_complete());
    }

    #[test]
    fn remove_skips_units_without_the_tag() {
        let (_dir, storage, mut state) = setup(&["alice"]);
        create(&storage, &state, Some(tag("t1"))).unwrap();
        state.topology.enroll(Username::parse("bob").unwrap());
        storage
            .create(&DatasetName::parse("tank/smb/homes/bob").unwrap())
            .unwrap();

        let report = remove(&storage, &state, &tag("t1")).unwrap();
        assert_eq!(report.removed.len(), 3);
        assert_eq!(report.skipped.len(), 1);
        assert!(list(&storage, &state).unwrap().is_empty());
    }

    #[test]
    fn remove_of_unknown_tag_fails() {
        let (_dir, storage, state) = setup(&[]);
        let err = remove(&storage, &state, &tag("nope")).unwrap_err();
        assert!(matches!(err, CoreError::SnapshotMissing { .. }));
    }

    #[test]
    fn create_failure_is_reported() {
        let (_dir, storage, state) = setup(&[]);
        storage.fail_on(Fault::Snapshot);
        assert!(matches!(
            create(&storage, &state, None),
            Err(CoreError::Runtime(_))
        ));
    }
}
