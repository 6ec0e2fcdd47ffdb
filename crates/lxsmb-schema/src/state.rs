//! The persisted state record: a flat `KEY=value` document.
//!
//! Only `DATASET` is required. A record that exists but lacks it, or carries a
//! value that does not validate, is stale. Serialization is canonical so two
//! saves of equal states produce identical bytes.

use crate::topology::{LayoutMode, OptionalShare, Topology};
use crate::types::{DatasetName, Quota, Subnet, Username, Workgroup};
use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("stale state: required field {0} is missing")]
    MissingField(&'static str),
    #[error("stale state: line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("stale state: {0}")]
    Inconsistent(#[source] ValidationError),
    #[error("stale state: {key}: {source}")]
    InvalidValue {
        key: &'static str,
        #[source]
        source: ValidationError,
    },
}

/// Share policy settings that are not part of the topology.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Policy {
    pub workgroup: Workgroup,
    /// Empty means every network may connect.
    pub allowed_subnets: Vec<Subnet>,
    pub recycle: bool,
    /// Applied to every home unit in the per-user layout.
    pub home_quota: Option<Quota>,
    /// Explicit members of the writers group; empty selects the first principal.
    pub writers: Vec<Username>,
    /// Explicit members of the admin group; empty selects the first principal.
    pub admins: Vec<Username>,
}

impl Policy {
    pub fn effective_writers<'a>(&'a self, topology: &'a Topology) -> &'a [Username] {
        effective_members(&self.writers, topology)
    }

    pub fn effective_admins<'a>(&'a self, topology: &'a Topology) -> &'a [Username] {
        effective_members(&self.admins, topology)
    }
}

fn effective_members<'a>(explicit: &'a [Username], topology: &'a Topology) -> &'a [Username] {
    if explicit.is_empty() {
        &topology.principals[..topology.principals.len().min(1)]
    } else {
        explicit
    }
}

/// Durable projection of topology and policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub topology: Topology,
    pub policy: Policy,
}

const KEY_DATASET: &str = "DATASET";
const KEY_LAYOUT: &str = "LAYOUT";
const KEY_SHARES: &str = "SHARES";
const KEY_USERS: &str = "USERS";
const KEY_WORKGROUP: &str = "WORKGROUP";
const KEY_SUBNETS: &str = "ALLOWED_SUBNETS";
const KEY_RECYCLE: &str = "RECYCLE";
const KEY_QUOTA: &str = "HOME_QUOTA";
const KEY_WRITERS: &str = "WRITERS";
const KEY_ADMINS: &str = "ADMINS";

impl PersistedState {
    pub fn new(topology: Topology, policy: Policy) -> Self {
        Self { topology, policy }
    }

    /// Cross-field checks that individual newtypes cannot express.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.policy.home_quota.is_some_and(|q| q != Quota::None)
            && self.topology.layout != LayoutMode::PerUser
        {
            return Err(ValidationError::QuotaRequiresPerUser);
        }
        for member in self.policy.writers.iter().chain(&self.policy.admins) {
            if !self.topology.principals.contains(member) {
                return Err(ValidationError::NotEnrolled(member.to_string()));
            }
        }
        Ok(())
    }

    pub fn parse(content: &str) -> Result<Self, StateError> {
        let mut dataset = None;
        let mut layout = LayoutMode::default();
        let mut topology_shares = Vec::new();
        let mut users = Vec::new();
        let mut policy = Policy::default();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(StateError::Malformed {
                    line: line_no,
                    reason: format!("expected KEY=value, got '{line}'"),
                });
            };
            let key = key.trim();
            let value = unquote(value.trim()).map_err(|reason| StateError::Malformed {
                line: line_no,
                reason,
            })?;

            match key {
                KEY_DATASET => {
                    if !value.is_empty() {
                        dataset = Some(field(KEY_DATASET, DatasetName::parse(value))?);
                    }
                }
                KEY_LAYOUT => {
                    if !value.is_empty() {
                        layout = field(KEY_LAYOUT, value.parse())?;
                    }
                }
                KEY_SHARES => {
                    topology_shares =
                        field(KEY_SHARES, parse_list(value, str::parse::<OptionalShare>))?;
                }
                KEY_USERS => users = field(KEY_USERS, parse_list(value, |s| Username::parse(s)))?,
                KEY_WORKGROUP => {
                    if !value.is_empty() {
                        policy.workgroup = field(KEY_WORKGROUP, Workgroup::parse(value))?;
                    }
                }
                KEY_SUBNETS => {
                    policy.allowed_subnets = field(KEY_SUBNETS, parse_list(value, Subnet::parse))?;
                }
                KEY_RECYCLE => {
                    policy.recycle = parse_bool(value).ok_or_else(|| StateError::Malformed {
                        line: line_no,
                        reason: format!("RECYCLE must be yes or no, got '{value}'"),
                    })?;
                }
                KEY_QUOTA => {
                    if !value.is_empty() {
                        policy.home_quota = Some(field(KEY_QUOTA, Quota::parse(value))?);
                    }
                }
                KEY_WRITERS => {
                    policy.writers = field(KEY_WRITERS, parse_list(value, |s| Username::parse(s)))?;
                }
                KEY_ADMINS => {
                    policy.admins = field(KEY_ADMINS, parse_list(value, |s| Username::parse(s)))?;
                }
                other => warn!("ignoring unknown state key '{other}' on line {line_no}"),
            }
        }

        let dataset = dataset.ok_or(StateError::MissingField(KEY_DATASET))?;
        let mut topology = Topology::new(dataset, layout);
        topology.shares.extend(topology_shares);
        for user in users {
            if !topology.enroll(user.clone()) {
                warn!("duplicate user '{user}' in state record ignored");
            }
        }
        let state = Self { topology, policy };
        state.validate().map_err(StateError::Inconsistent)?;
        Ok(state)
    }

    /// Canonical text form.
    pub fn to_kv(&self) -> String {
        let t = &self.topology;
        let p = &self.policy;
        let mut out = String::from("# managed by lxsmb-setup; edits are overwritten\n");
        let _ = writeln!(out, "{KEY_DATASET}={}", t.base);
        let _ = writeln!(out, "{KEY_LAYOUT}={}", t.layout);
        let _ = writeln!(out, "{KEY_SHARES}={}", join(&t.shares));
        let _ = writeln!(out, "{KEY_USERS}={}", join(&t.principals));
        let _ = writeln!(out, "{KEY_WORKGROUP}={}", p.workgroup);
        let _ = writeln!(out, "{KEY_SUBNETS}=\"{}\"", join_with(&p.allowed_subnets, " "));
        let _ = writeln!(out, "{KEY_RECYCLE}={}", if p.recycle { "yes" } else { "no" });
        if let Some(q) = p.home_quota {
            let _ = writeln!(out, "{KEY_QUOTA}={q}");
        }
        if !p.writers.is_empty() {
            let _ = writeln!(out, "{KEY_WRITERS}={}", join(&p.writers));
        }
        if !p.admins.is_empty() {
            let _ = writeln!(out, "{KEY_ADMINS}={}", join(&p.admins));
        }
        out
    }
}

fn field<T>(key: &'static str, r: Result<T, ValidationError>) -> Result<T, StateError> {
    r.map_err(|source| StateError::InvalidValue { key, source })
}

fn unquote(value: &str) -> Result<&str, String> {
    match value.strip_prefix('"') {
        Some(rest) => rest
            .strip_suffix('"')
            .ok_or_else(|| "unterminated quoted value".to_owned()),
        None => Ok(value),
    }
}

fn parse_list<T>(
    value: &str,
    parse: impl Fn(&str) -> Result<T, ValidationError>,
) -> Result<Vec<T>, ValidationError> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(parse)
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Some(true),
        "no" | "false" | "0" | "off" | "" => Some(false),
        _ => None,
    }
}

fn join<T: std::fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    join_with(items, ",")
}

fn join_with<T: std::fmt::Display>(items: impl IntoIterator<Item = T>, sep: &str) -> String {
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
# comment
DATASET=tank/samba
LAYOUT=per-user
SHARES=Shared,Guest
USERS=alice,bob
WORKGROUP=HOMENET
ALLOWED_SUBNETS="192.168.1.0/24 10.0.0.0/8"
RECYCLE=yes
HOME_QUOTA=50G
ADMINS=bob
"#;

    #[test]
    fn parses_full_record() {
        let s = PersistedState::parse(FULL).unwrap();
        assert_eq!(s.topology.base, "tank/samba");
        assert_eq!(s.topology.layout, LayoutMode::PerUser);
        assert_eq!(
            s.topology.shares.iter().copied().collect::<Vec<_>>(),
            vec![OptionalShare::Shared, OptionalShare::Guest]
        );
        assert_eq!(s.topology.principals, vec!["alice", "bob"]);
        assert_eq!(s.policy.workgroup, "HOMENET");
        assert_eq!(s.policy.allowed_subnets.len(), 2);
        assert!(s.policy.recycle);
        assert_eq!(s.policy.home_quota, Some(Quota::Bytes(50 << 30)));
        assert_eq!(s.policy.effective_admins(&s.topology), ["bob"]);
        assert_eq!(s.policy.effective_writers(&s.topology), ["alice"]);
    }

    #[test]
    fn optional_fields_take_defaults() {
        let s = PersistedState::parse("DATASET=tank/share\n").unwrap();
        assert_eq!(s.topology.layout, LayoutMode::Unified);
        assert!(s.topology.shares.is_empty());
        assert!(s.topology.principals.is_empty());
        assert_eq!(s.policy.workgroup, "WORKGROUP");
        assert!(s.policy.allowed_subnets.is_empty());
        assert!(!s.policy.recycle);
        assert!(s.policy.effective_admins(&s.topology).is_empty());
    }

    #[test]
    fn missing_dataset_is_stale_not_absent() {
        let err = PersistedState::parse("LAYOUT=unified\n").unwrap_err();
        assert!(matches!(err, StateError::MissingField("DATASET")));
        let err = PersistedState::parse("DATASET=\n").unwrap_err();
        assert!(matches!(err, StateError::MissingField("DATASET")));
    }

    #[test]
    fn malformed_lines_are_stale() {
        assert!(matches!(
            PersistedState::parse("DATASET=tank\ngarbage\n").unwrap_err(),
            StateError::Malformed { line: 2, .. }
        ));
        assert!(matches!(
            PersistedState::parse("DATASET=tank\nRECYCLE=maybe\n").unwrap_err(),
            StateError::Malformed { .. }
        ));
        assert!(matches!(
            PersistedState::parse("DATASET=\"tank\n").unwrap_err(),
            StateError::Malformed { .. }
        ));
    }

    #[test]
    fn invalid_values_are_stale() {
        let err = PersistedState::parse("DATASET=tank\nUSERS=Alice\n").unwrap_err();
        assert!(matches!(err, StateError::InvalidValue { key: "USERS", .. }));
        let err = PersistedState::parse("DATASET=tank\nLAYOUT=striped\n").unwrap_err();
        assert!(matches!(err, StateError::InvalidValue { key: "LAYOUT", .. }));
        let err = PersistedState::parse("DATASET=tank\nADMINS=carol\n").unwrap_err();
        assert!(err.to_string().contains("carol"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let s = PersistedState::parse("DATASET=tank\nFUTURE_KEY=1\n").unwrap();
        assert_eq!(s.topology.base, "tank");
    }

    #[test]
    fn canonical_text_reparses_to_equal_state() {
        let s = PersistedState::parse(FULL).unwrap();
        let text = s.to_kv();
        assert_eq!(PersistedState::parse(&text).unwrap(), s);
        assert_eq!(text, PersistedState::parse(&text).unwrap().to_kv());
        assert!(text.contains("ALLOWED_SUBNETS=\"192.168.1.0/24 10.0.0.0/8\""));
    }

    #[test]
    fn quota_requires_per_user_layout() {
        let err = PersistedState::parse("DATASET=tank\nHOME_QUOTA=10G\n").unwrap_err();
        assert!(err.to_string().contains("per-user"));
    }
}
