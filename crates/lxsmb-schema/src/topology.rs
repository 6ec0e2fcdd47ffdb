//! Topology model and the resolver that turns it into an ordered unit list.
//!
//! The resolver is the one place where the set of logical storage units is
//! computed. Provisioning, snapshots, quota changes and recycle maintenance
//! all consume its output, so its ordering is part of the contract: base,
//! homes parent, homes in enrollment order, then shares in the fixed order
//! Shared, Public, Guest.

use crate::types::{DatasetName, Username};
use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Guest directory every unit is mounted under.
pub const MOUNT_ROOT: &str = "/srv/samba";
/// Name of the homes parent, both as dataset component and directory.
pub const HOMES_DIR: &str = "homes";

pub const USERS_GROUP: &str = "smbusers";
pub const WRITERS_GROUP: &str = "smbwriters";
pub const ADMIN_GROUP: &str = "smbadmin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutMode {
    /// One dataset; homes and shares are plain directories inside it.
    #[default]
    Unified,
    /// One dataset per home and per share, nested under the base.
    #[serde(alias = "per-principal")]
    PerUser,
}

impl fmt::Display for LayoutMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutMode::Unified => write!(f, "unified"),
            LayoutMode::PerUser => write!(f, "per-user"),
        }
    }
}

impl FromStr for LayoutMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, ValidationError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unified" | "single" => Ok(LayoutMode::Unified),
            "per-user" | "peruser" | "per-principal" | "multi" => Ok(LayoutMode::PerUser),
            other => Err(ValidationError::Layout(other.to_owned())),
        }
    }
}

/// Optional shares. Declaration order is the fixed resolver order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum OptionalShare {
    Shared,
    Public,
    Guest,
}

/// The three fixed access policies an optional share can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessPolicy {
    /// Every user writes; files stay owner-writable and readable by all users.
    OwnerWriteAllRead,
    /// Only the writers group writes; all users read.
    GroupWriteAllRead,
    /// Unauthenticated guests read; only the admin group writes.
    GuestReadAdminWrite,
}

impl OptionalShare {
    pub const ALL: [OptionalShare; 3] = [
        OptionalShare::Shared,
        OptionalShare::Public,
        OptionalShare::Guest,
    ];

    /// Dataset component, directory name and section name.
    pub fn dir_name(self) -> &'static str {
        match self {
            OptionalShare::Shared => "Shared",
            OptionalShare::Public => "Public",
            OptionalShare::Guest => "Guest",
        }
    }

    pub fn policy(self) -> AccessPolicy {
        match self {
            OptionalShare::Shared => AccessPolicy::OwnerWriteAllRead,
            OptionalShare::Public => AccessPolicy::GroupWriteAllRead,
            OptionalShare::Guest => AccessPolicy::GuestReadAdminWrite,
        }
    }

    /// Group owning the share root.
    pub fn group(self) -> &'static str {
        match self {
            OptionalShare::Shared => USERS_GROUP,
            OptionalShare::Public => WRITERS_GROUP,
            OptionalShare::Guest => ADMIN_GROUP,
        }
    }
}

impl fmt::Display for OptionalShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for OptionalShare {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, ValidationError> {
        let wanted = s.trim();
        OptionalShare::ALL
            .into_iter()
            .find(|share| share.dir_name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ValidationError::Share(wanted.to_owned()))
    }
}

/// Resolved shape of the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub base: DatasetName,
    pub layout: LayoutMode,
    pub shares: BTreeSet<OptionalShare>,
    /// Enrollment order, no duplicates.
    pub principals: Vec<Username>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "kebab-case")]
pub enum UnitKind {
    Base,
    Homes,
    Home(Username),
    Share(OptionalShare),
}

/// One addressable storage volume of the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalUnit {
    pub kind: UnitKind,
    pub dataset: DatasetName,
    /// Absolute guest path the dataset is bind-mounted at.
    pub mount_target: String,
    pub owner: String,
    pub group: String,
    pub mode: u32,
}

/// A plain directory created inside a unit (unified layout only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectorySpec {
    pub path: String,
    pub owner: String,
    pub group: String,
    pub mode: u32,
}

impl Topology {
    pub fn new(base: DatasetName, layout: LayoutMode) -> Self {
        Self {
            base,
            layout,
            shares: BTreeSet::new(),
            principals: Vec::new(),
        }
    }

    /// Append a principal. Returns `false` if already enrolled.
    pub fn enroll(&mut self, user: Username) -> bool {
        if self.principals.contains(&user) {
            return false;
        }
        self.principals.push(user);
        true
    }

    /// Guest path of the homes parent.
    pub fn homes_path() -> String {
        format!("{MOUNT_ROOT}/{HOMES_DIR}")
    }

    /// Guest path of a principal's home.
    pub fn home_path(user: &Username) -> String {
        format!("{MOUNT_ROOT}/{HOMES_DIR}/{user}")
    }

    pub fn share_path(share: OptionalShare) -> String {
        format!("{MOUNT_ROOT}/{}", share.dir_name())
    }

    /// Groups the topology needs, in creation order.
    pub fn required_groups(&self) -> Vec<&'static str> {
        let mut groups = vec![USERS_GROUP];
        if self.shares.contains(&OptionalShare::Public) {
            groups.push(WRITERS_GROUP);
        }
        if self.shares.contains(&OptionalShare::Guest) {
            groups.push(ADMIN_GROUP);
        }
        groups
    }

    /// Directories to create inside the base unit. Empty for per-user layout,
    /// where every one of these paths is its own unit.
    pub fn directories(&self) -> Vec<DirectorySpec> {
        if self.layout == LayoutMode::PerUser {
            return Vec::new();
        }
        let mut dirs = vec![homes_dir_spec(Self::homes_path())];
        dirs.extend(
            self.principals
                .iter()
                .map(|u| home_dir_spec(u, Self::home_path(u))),
        );
        dirs.extend(
            self.shares
                .iter()
                .map(|s| share_dir_spec(*s, Self::share_path(*s))),
        );
        dirs
    }
}

fn homes_dir_spec(path: String) -> DirectorySpec {
    DirectorySpec {
        path,
        owner: "root".to_owned(),
        group: USERS_GROUP.to_owned(),
        mode: 0o751,
    }
}

fn home_dir_spec(user: &Username, path: String) -> DirectorySpec {
    DirectorySpec {
        path,
        owner: user.to_string(),
        group: USERS_GROUP.to_owned(),
        mode: 0o700,
    }
}

fn share_dir_spec(share: OptionalShare, path: String) -> DirectorySpec {
    DirectorySpec {
        path,
        owner: "root".to_owned(),
        group: share.group().to_owned(),
        mode: 0o2775,
    }
}

fn unit_from(kind: UnitKind, dataset: DatasetName, dir: DirectorySpec) -> LogicalUnit {
    LogicalUnit {
        kind,
        dataset,
        mount_target: dir.path,
        owner: dir.owner,
        group: dir.group,
        mode: dir.mode,
    }
}

/// Compute the ordered logical-unit list. Pure and deterministic.
pub fn resolve(topology: &Topology) -> Result<Vec<LogicalUnit>, ValidationError> {
    let base = LogicalUnit {
        kind: UnitKind::Base,
        dataset: topology.base.clone(),
        mount_target: MOUNT_ROOT.to_owned(),
        owner: "root".to_owned(),
        group: "root".to_owned(),
        mode: 0o755,
    };
    if topology.layout == LayoutMode::Unified {
        return Ok(vec![base]);
    }

    let mut units = Vec::with_capacity(2 + topology.principals.len() + topology.shares.len());
    units.push(base);

    let homes = topology.base.child(HOMES_DIR)?;
    units.push(unit_from(
        UnitKind::Homes,
        homes.clone(),
        homes_dir_spec(Topology::homes_path()),
    ));
    for user in &topology.principals {
        units.push(unit_from(
            UnitKind::Home(user.clone()),
            homes.child(user)?,
            home_dir_spec(user, Topology::home_path(user)),
        ));
    }

    for share in &topology.shares {
        units.push(unit_from(
            UnitKind::Share(*share),
            topology.base.child(share.dir_name())?,
            share_dir_spec(*share, Topology::share_path(*share)),
        ));
    }
    Ok(units)
}
