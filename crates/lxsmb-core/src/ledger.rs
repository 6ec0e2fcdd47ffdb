use lxsmb_schema::{DatasetName, Quota, Username};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// One mutation made by a provisioning run, carrying what its inverse needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResourceRecord {
    /// Created dataset. Inverse: recursive destroy.
    Volume { dataset: DatasetName },
    /// Created guest directory. Inverse: remove if empty.
    Directory { path: String },
    /// Added bind mount. Inverse: detach.
    BindMount { target: String, source: PathBuf },
    /// Created group. Inverse: delete.
    Group { name: String },
    /// Created account. Inverse: delete account and Samba password.
    Principal { name: Username },
    /// Supplementary membership added to an existing account.
    Membership { user: Username, group: String },
    /// Changed quota. Inverse: restore `previous` (possibly "none").
    QuotaChange { dataset: DatasetName, previous: Quota },
    /// Overwritten guest file. Inverse: restore `backup` (or remove the
    /// file when there was none), drop the backup, then restart `service`
    /// (stop it when the file was removed).
    ConfigFile {
        path: String,
        backup: Option<String>,
        service: Option<String>,
    },
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRecord::Volume { dataset } => write!(f, "volume {dataset}"),
            ResourceRecord::Directory { path } => write!(f, "directory {path}"),
            ResourceRecord::BindMount { target, source } => {
                write!(f, "bind mount {} -> {target}", source.display())
            }
            ResourceRecord::Group { name } => write!(f, "group {name}"),
            ResourceRecord::Principal { name } => write!(f, "user {name}"),
            ResourceRecord::Membership { user, group } => write!(f, "membership {user} in {group}"),
            ResourceRecord::QuotaChange { dataset, previous } => {
                write!(f, "quota on {dataset} (was {previous})")
            }
            ResourceRecord::ConfigFile { path, backup, .. } => match backup {
                Some(b) => write!(f, "file {path} (backup {b})"),
                None => write!(f, "file {path} (new)"),
            },
        }
    }
}

/// Append-only, dependency-ordered record of one run. Reverse order is the
/// undo order.
#[derive(Debug, Default)]
pub struct Ledger {
    records: Vec<ResourceRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ResourceRecord) {
        debug!("ledger #{}: {record}", self.records.len());
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ResourceRecord] {
        &self.records
    }

    /// Consume the ledger, newest record first.
    pub fn drain_newest_first(self) -> impl Iterator<Item = ResourceRecord> {
        self.records.into_iter().rev()
    }
}
