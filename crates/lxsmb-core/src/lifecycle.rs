use crate::state_store::StateStore;
use crate::CoreError;
use lxsmb_schema::PersistedState;

/// Install vs. management, decided only by the presence of the state record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentState {
    Uninstalled,
    Installed(PersistedState),
}

impl DeploymentState {
    pub fn detect(store: &StateStore<'_>) -> Result<Self, CoreError> {
        Ok(match store.load()? {
            Some(state) => DeploymentState::Installed(state),
            None => DeploymentState::Uninstalled,
        })
    }

    pub fn is_installed(&self) -> bool {
        matches!(self, DeploymentState::Installed(_))
    }

    /// The persisted state, or `NotInstalled` for `ctid`.
    pub fn require_installed(self, ctid: &str) -> Result<PersistedState, CoreError> {
        match self {
            DeploymentState::Installed(state) => Ok(state),
            DeploymentState::Uninstalled => Err(CoreError::NotInstalled(ctid.to_owned())),
        }
    }
}

/// Check that `target` is a legal management change of `current`: the base
/// dataset and layout are fixed, and enrolled users are never dropped or
/// reordered.
pub fn validate_change(current: &PersistedState, target: &PersistedState) -> Result<(), CoreError> {
    let (cur, next) = (&current.topology, &target.topology);
    if cur.base != next.base {
        return Err(CoreError::Immutable {
            field: "dataset",
            from: cur.base.to_string(),
            to: next.base.to_string(),
        });
    }
    if cur.layout != next.layout {
        return Err(CoreError::Immutable {
            field: "layout",
            from: cur.layout.to_string(),
            to: next.layout.to_string(),
        });
    }
    for (i, user) in cur.principals.iter().enumerate() {
        if next.principals.get(i) != Some(user) {
            return Err(CoreError::PrincipalRemoved(user.to_string()));
        }
    }
    target.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxsmb_schema::{DatasetName, LayoutMode, OptionalShare, Policy, Topology, Username};

    fn state(base: &str, layout: LayoutMode, users: &[&str]) -> PersistedState {
        let mut t = Topology::new(DatasetName::parse(base).unwrap(), layout);
        for u in users {
            t.enroll(Username::parse(*u).unwrap());
        }
        PersistedState::new(t, Policy::default())
    }

    #[test]
    fn appending_users_and_toggling_shares_is_allowed() {
        let cur = state("tank/samba", LayoutMode::PerUser, &["alice"]);
        let mut next = state("tank/samba", LayoutMode::PerUser, &["alice", "bob"]);
        next.topology.shares.insert(OptionalShare::Guest);
        assert!(validate_change(&cur, &next).is_ok());
        assert!(validate_change(&next, &cur).is_err());
    }

    #[test]
    fn base_and_layout_are_immutable() {
        let cur = state("tank/samba", LayoutMode::PerUser, &[]);
        let moved = state("tank/other", LayoutMode::PerUser, &[]);
        let relaid = state("tank/samba", LayoutMode::Unified, &[]);
        let e = validate_change(&cur, &moved).unwrap_err();
        assert!(matches!(e, CoreError::Immutable { field: "dataset", .. }));
        let e = validate_change(&cur, &relaid).unwrap_err();
        assert!(matches!(e, CoreError::Immutable { field: "layout", .. }));
    }

    #[test]
    fn reordering_users_is_rejected() {
        let cur = state("tank/samba", LayoutMode::Unified, &["alice", "bob"]);
        let next = state("tank/samba", LayoutMode::Unified, &["bob", "alice"]);
        assert!(matches!(
            validate_change(&cur, &next).unwrap_err(),
            CoreError::PrincipalRemoved(_)
        ));
    }

    #[test]
    fn uninstalled_requires_setup() {
        let err = DeploymentState::Uninstalled.require_installed("105").unwrap_err();
        assert!(err.to_string().contains("lxsmb-setup"));
        let s = state("tank/samba", LayoutMode::Unified, &[]);
        assert!(DeploymentState::Installed(s.clone()).is_installed());
        assert_eq!(DeploymentState::Installed(s.clone()).require_installed("105").unwrap(), s);
    }
}
