//! Deployment model for lxsmb.
//!
//! This crate is pure: validated identifiers (`DatasetName`, `Username`, ...),
//! the `Topology` and its resolver (`resolve`), the persisted state record
//! (`PersistedState`), the Samba configuration renderer (`render_smb_conf`),
//! and the TOML install answers file (`InstallAnswers`). Nothing here touches
//! the host, the container, or the storage pool.

pub mod answers;
pub mod render;
pub mod state;
pub mod topology;
pub mod types;

pub use answers::{parse_answers_file, parse_answers_str, AnswersError, InstallAnswers, UserAnswer};
pub use render::{render_smb_conf, RECYCLE_DIR, SMB_CONF_PATH};
pub use state::{PersistedState, Policy, StateError};
pub use topology::{
    resolve, AccessPolicy, DirectorySpec, LayoutMode, LogicalUnit, OptionalShare, Topology,
    UnitKind, ADMIN_GROUP, HOMES_DIR, MOUNT_ROOT, USERS_GROUP, WRITERS_GROUP,
};
pub use types::{DatasetName, Quota, SnapshotTag, Subnet, Username, Workgroup};

use thiserror::Error;

/// Malformed operator input, rejected before anything consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid dataset name '{value}': {reason}")]
    Dataset { value: String, reason: String },
    #[error("invalid username '{value}': {reason}")]
    Username { value: String, reason: String },
    #[error("invalid workgroup '{value}': {reason}")]
    Workgroup { value: String, reason: String },
    #[error("invalid network range '{value}': {reason}")]
    Subnet { value: String, reason: String },
    #[error("invalid snapshot tag '{value}': {reason}")]
    SnapshotTag { value: String, reason: String },
    #[error("invalid quota '{0}', expected 'none' or a size such as 50G")]
    Quota(String),
    #[error("unknown layout '{0}', expected 'unified' or 'per-user'")]
    Layout(String),
    #[error("unknown share '{0}', expected Shared, Public or Guest")]
    Share(String),
    #[error("invalid timer interval '{0}', expected hourly, daily, weekly, monthly, <n>h or <n>d")]
    Interval(String),
    #[error("home quota requires the per-user layout")]
    QuotaRequiresPerUser,
    #[error("user '{0}' is not enrolled")]
    NotEnrolled(String),
}
