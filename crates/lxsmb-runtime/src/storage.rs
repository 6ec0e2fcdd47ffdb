use crate::command::{capture, run};
use crate::RuntimeError;
use lxsmb_schema::{DatasetName, Quota, SnapshotTag};
use std::path::PathBuf;
use std::process::Command;

/// Copy-on-write storage pool holding one dataset per logical unit.
pub trait StorageBackend {
    fn name(&self) -> &str;

    fn exists(&self, dataset: &DatasetName) -> Result<bool, RuntimeError>;

    /// Create a dataset. The parent must already exist.
    fn create(&self, dataset: &DatasetName) -> Result<(), RuntimeError>;

    /// Destroy a dataset together with its children and snapshots.
    fn destroy(&self, dataset: &DatasetName) -> Result<(), RuntimeError>;

    /// Host path the dataset is mounted at.
    fn mountpoint(&self, dataset: &DatasetName) -> Result<PathBuf, RuntimeError>;

    fn quota(&self, dataset: &DatasetName) -> Result<Quota, RuntimeError>;

    fn set_quota(&self, dataset: &DatasetName, quota: Quota) -> Result<(), RuntimeError>;

    /// Snapshot every dataset under one tag in a single atomic call.
    fn snapshot(&self, datasets: &[DatasetName], tag: &SnapshotTag) -> Result<(), RuntimeError>;

    /// Snapshot tags of one dataset, oldest first.
    fn snapshots(&self, dataset: &DatasetName) -> Result<Vec<String>, RuntimeError>;

    /// Revert to a tag, discarding any later snapshots of that dataset.
    fn rollback(&self, dataset: &DatasetName, tag: &SnapshotTag) -> Result<(), RuntimeError>;

    fn destroy_snapshot(&self, dataset: &DatasetName, tag: &SnapshotTag)
        -> Result<(), RuntimeError>;
}

/// The `zfs` command-line tool on the host.
#[derive(Debug, Clone)]
pub struct ZfsBackend {
    program: String,
}

impl Default for ZfsBackend {
    fn default() -> Self {
        Self {
            program: "zfs".to_owned(),
        }
    }
}

impl ZfsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn zfs(&self) -> Command {
        Command::new(&self.program)
    }

    fn get(&self, property: &str, dataset: &DatasetName, parsable: bool) -> Result<String, RuntimeError> {
        let mut cmd = self.zfs();
        cmd.arg("get").arg("-H");
        if parsable {
            cmd.arg("-p");
        }
        cmd.args(["-o", "value", property, dataset.as_str()]);
        Ok(run(&mut cmd)?.trim().to_owned())
    }
}

impl StorageBackend for ZfsBackend {
    fn name(&self) -> &'static str {
        "zfs"
    }

    fn exists(&self, dataset: &DatasetName) -> Result<bool, RuntimeError> {
        let out = capture(
            self.zfs()
                .args(["list", "-H", "-o", "name", "-t", "filesystem", dataset.as_str()]),
            None,
        )?;
        if out.success() {
            return Ok(true);
        }
        if out.stderr.contains("does not exist") {
            return Ok(false);
        }
        out.check(&self.program).map(|_| true)
    }

    fn create(&self, dataset: &DatasetName) -> Result<(), RuntimeError> {
        run(self.zfs().args(["create", dataset.as_str()]))?;
        Ok(())
    }

    fn destroy(&self, dataset: &DatasetName) -> Result<(), RuntimeError> {
        run(self.zfs().args(["destroy", "-r", dataset.as_str()]))?;
        Ok(())
    }

    fn mountpoint(&self, dataset: &DatasetName) -> Result<PathBuf, RuntimeError> {
        parse_mountpoint(&self.get("mountpoint", dataset, false)?)
    }

    fn quota(&self, dataset: &DatasetName) -> Result<Quota, RuntimeError> {
        parse_quota(&self.get("quota", dataset, true)?)
    }

    fn set_quota(&self, dataset: &DatasetName, quota: Quota) -> Result<(), RuntimeError> {
        let assignment = format!("quota={}", quota.zfs_value());
        run(self.zfs().args(["set", &assignment, dataset.as_str()]))?;
        Ok(())
    }

    fn snapshot(&self, datasets: &[DatasetName], tag: &SnapshotTag) -> Result<(), RuntimeError> {
        if datasets.is_empty() {
            return Ok(());
        }
        let mut cmd = self.zfs();
        cmd.arg("snapshot");
        cmd.args(datasets.iter().map(|d| d.at(tag)));
        run(&mut cmd)?;
        Ok(())
    }

    fn snapshots(&self, dataset: &DatasetName) -> Result<Vec<String>, RuntimeError> {
        let out = run(self.zfs().args([
            "list",
            "-H",
            "-t",
            "snapshot",
            "-o",
            "name",
            "-s",
            "creation",
            "-d",
            "1",
            dataset.as_str(),
        ]))?;
        Ok(parse_snapshot_tags(dataset, &out))
    }

    fn rollback(&self, dataset: &DatasetName, tag: &SnapshotTag) -> Result<(), RuntimeError> {
        run(self.zfs().args(["rollback", "-r", &dataset.at(tag)]))?;
        Ok(())
    }

    fn destroy_snapshot(
        &self,
        dataset: &DatasetName,
        tag: &SnapshotTag,
    ) -> Result<(), RuntimeError> {
        run(self.zfs().args(["destroy", &dataset.at(tag)]))?;
        Ok(())
    }
}

fn parse_mountpoint(value: &str) -> Result<PathBuf, RuntimeError> {
    if value.starts_with('/') {
        Ok(PathBuf::from(value))
    } else {
        // "none" and "legacy" cannot be bind-mounted into a container.
        Err(RuntimeError::Parse {
            program: "zfs".to_owned(),
            detail: format!("dataset is not mounted (mountpoint={value})"),
        })
    }
}

fn parse_quota(value: &str) -> Result<Quota, RuntimeError> {
    match value {
        "0" | "none" | "-" => Ok(Quota::None),
        v => v.parse::<u64>().map(Quota::Bytes).map_err(|_| RuntimeError::Parse {
            program: "zfs".to_owned(),
            detail: format!("quota '{v}'"),
        }),
    }
}

fn parse_snapshot_tags(dataset: &DatasetName, listing: &str) -> Vec<String> {
    let prefix = format!("{dataset}@");
    listing
        .lines()
        .filter_map(|line| line.trim().strip_prefix(&prefix))
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mountpoint_requires_absolute_path() {
        assert_eq!(
            parse_mountpoint("/tank/samba").unwrap(),
            PathBuf::from("/tank/samba")
        );
        assert!(parse_mountpoint("legacy").is_err());
        assert!(parse_mountpoint("none").is_err());
    }

    #[test]
    fn quota_parses_parsable_output() {
        assert_eq!(parse_quota("0").unwrap(), Quota::None);
        assert_eq!(parse_quota("none").unwrap(), Quota::None);
        assert_eq!(parse_quota("53687091200").unwrap(), Quota::Bytes(50 << 30));
        assert!(parse_quota("50G").is_err());
    }

    #[test]
    fn snapshot_listing_keeps_only_direct_tags() {
        let ds = DatasetName::parse("tank/samba").unwrap();
        let listing = "tank/samba@first\ntank/samba@lxsmb-20260101-000000\ntank/samba/homes@first\n";
        assert_eq!(
            parse_snapshot_tags(&ds, listing),
            vec!["first", "lxsmb-20260101-000000"]
        );
    }

    #[test]
    fn snapshot_of_nothing_is_a_noop() {
        let zfs = ZfsBackend {
            program: "lxsmb-no-such-zfs".to_owned(),
        };
        let tag = SnapshotTag::parse("t").unwrap();
        assert!(zfs.snapshot(&[], &tag).is_ok());
    }

    #[test]
    fn missing_binary_is_reported() {
        let zfs = ZfsBackend {
            program: "lxsmb-no-such-zfs".to_owned(),
        };
        let ds = DatasetName::parse("tank/samba").unwrap();
        let err = zfs.create(&ds).unwrap_err();
        assert!(matches!(err, RuntimeError::Spawn { .. }));
    }
}
