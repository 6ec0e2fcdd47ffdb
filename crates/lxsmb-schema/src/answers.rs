use crate::state::{PersistedState, Policy};
use crate::topology::{LayoutMode, OptionalShare, Topology};
use crate::types::{DatasetName, Quota, Subnet, Username, Workgroup};
use crate::ValidationError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnswersError {
    #[error("failed to read answers file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse answers file: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Invalid(#[from] ValidationError),
    #[error("validation error: dataset is required")]
    MissingDataset,
    #[error("validation error: user '{0}' is listed twice")]
    DuplicateUser(String),
}

/// Install-time choices read from a TOML file.
///
/// ```toml
/// dataset = "tank/samba"
/// layout = "per-user"
/// shares = ["Shared", "Public"]
/// workgroup = "HOMENET"
/// allowed_subnets = ["192.168.1.0/24"]
/// recycle = true
///
/// [[users]]
/// name = "alice"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InstallAnswers {
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub shares: Vec<String>,
    #[serde(default)]
    pub users: Vec<UserAnswer>,
    #[serde(default)]
    pub workgroup: Option<String>,
    #[serde(default)]
    pub allowed_subnets: Vec<String>,
    #[serde(default)]
    pub recycle: Option<bool>,
    #[serde(default)]
    pub home_quota: Option<String>,
    #[serde(default)]
    pub writers: Vec<String>,
    #[serde(default)]
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UserAnswer {
    pub name: String,
    /// Discouraged; prompted for when absent.
    #[serde(default)]
    pub password: Option<String>,
}

pub fn parse_answers_str(input: &str) -> Result<InstallAnswers, AnswersError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_answers_file(path: impl AsRef<Path>) -> Result<InstallAnswers, AnswersError> {
    let content = fs::read_to_string(path)?;
    parse_answers_str(&content)
}

impl InstallAnswers {
    /// Validate every field and build the state the install run will realize.
    pub fn to_state(&self) -> Result<PersistedState, AnswersError> {
        let dataset = self
            .dataset
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or(AnswersError::MissingDataset)?;
        let layout = match &self.layout {
            Some(l) => l.parse()?,
            None => LayoutMode::default(),
        };

        let mut topology = Topology::new(DatasetName::parse(dataset)?, layout);
        for share in &self.shares {
            topology.shares.insert(share.parse::<OptionalShare>()?);
        }
        for user in &self.users {
            if !topology.enroll(Username::parse(user.name.trim())?) {
                return Err(AnswersError::DuplicateUser(user.name.clone()));
            }
        }

        let policy = Policy {
            workgroup: match &self.workgroup {
                Some(w) => Workgroup::parse(w.trim())?,
                None => Workgroup::default(),
            },
            allowed_subnets: self
                .allowed_subnets
                .iter()
                .map(|s| Subnet::parse(s.trim()))
                .collect::<Result<_, _>>()?,
            recycle: self.recycle.unwrap_or(false),
            home_quota: self.home_quota.as_deref().map(Quota::parse).transpose()?,
            writers: parse_users(&self.writers)?,
            admins: parse_users(&self.admins)?,
        };

        let state = PersistedState::new(topology, policy);
        state.validate()?;
        Ok(state)
    }

    /// Layer these answers over an installed state for a management run.
    ///
    /// New users are appended, a non-empty share list replaces the enabled
    /// set, and every other field given here overrides the current value.
    /// A dataset or layout given here is carried into the result as is, so
    /// the caller's change check can reject it.
    pub fn apply_to(&self, current: &PersistedState) -> Result<PersistedState, AnswersError> {
        let mut next = current.clone();
        if let Some(dataset) = self.dataset.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            next.topology.base = DatasetName::parse(dataset)?;
        }
        if let Some(layout) = &self.layout {
            next.topology.layout = layout.parse()?;
        }
        if !self.shares.is_empty() {
            next.topology.shares = self
                .shares
                .iter()
                .map(|s| s.parse::<OptionalShare>())
                .collect::<Result<_, _>>()?;
        }
        for user in &self.users {
            next.topology.enroll(Username::parse(user.name.trim())?);
        }

        let policy = &mut next.policy;
        if let Some(w) = &self.workgroup {
            policy.workgroup = Workgroup::parse(w.trim())?;
        }
        if !self.allowed_subnets.is_empty() {
            policy.allowed_subnets = self
                .allowed_subnets
                .iter()
                .map(|s| Subnet::parse(s.trim()))
                .collect::<Result<_, _>>()?;
        }
        if let Some(r) = self.recycle {
            policy.recycle = r;
        }
        if let Some(q) = &self.home_quota {
            policy.home_quota = Some(Quota::parse(q)?);
        }
        if !self.writers.is_empty() {
            policy.writers = parse_users(&self.writers)?;
        }
        if !self.admins.is_empty() {
            policy.admins = parse_users(&self.admins)?;
        }

        next.validate()?;
        Ok(next)
    }
}

fn parse_users(names: &[String]) -> Result<Vec<Username>, ValidationError> {
    names.iter().map(|n| Username::parse(n.trim())).collect()
}
