//! The individual provisioning steps.
//!
//! Each step reuses what already exists and records only what it changes,
//! so a repeated run with the same plan appends nothing to the ledger.

use crate::engine::{Backends, Plan};
use crate::ledger::{Ledger, ResourceRecord};
use crate::state_store::{StateStore, STATE_DIR, STATE_PATH};
use chrono::Local;
use lxsmb_runtime::{Guest, RuntimeError};
use lxsmb_schema::{
    render_smb_conf, LogicalUnit, OptionalShare, PersistedState, Topology, UnitKind, Username,
    ADMIN_GROUP, SMB_CONF_PATH, USERS_GROUP, WRITERS_GROUP,
};
use tracing::{debug, info};

/// Service restarted after its configuration changes.
pub const SMB_SERVICE: &str = "smbd";

pub(crate) fn ensure_groups(
    b: &Backends<'_>,
    topology: &Topology,
    ledger: &mut Ledger,
) -> Result<(), RuntimeError> {
    for group in topology.required_groups() {
        if b.identity.group_exists(group)? {
            debug!("group {group} exists");
            continue;
        }
        b.identity.create_group(group)?;
        ledger.push(ResourceRecord::Group {
            name: group.to_owned(),
        });
    }
    Ok(())
}

/// Groups `user` must belong to under the current shares and policy.
fn wanted_groups(state: &PersistedState, user: &Username) -> Vec<&'static str> {
    let (t, p) = (&state.topology, &state.policy);
    let mut groups = vec![USERS_GROUP];
    if t.shares.contains(&OptionalShare::Public) && p.effective_writers(t).contains(user) {
        groups.push(WRITERS_GROUP);
    }
    if t.shares.contains(&OptionalShare::Guest) && p.effective_admins(t).contains(user) {
        groups.push(ADMIN_GROUP);
    }
    groups
}

pub(crate) fn ensure_principals(
    b: &Backends<'_>,
    plan: &Plan,
    ledger: &mut Ledger,
) -> Result<(), RuntimeError> {
    for user in &plan.state.topology.principals {
        let created = if b.identity.user_exists(user)? {
            debug!("user {user} exists");
            false
        } else {
            b.identity.create_user(user, USERS_GROUP)?;
            ledger.push(ResourceRecord::Principal { name: user.clone() });
            true
        };

        let current = b.identity.groups_of(user)?;
        for group in wanted_groups(&plan.state, user) {
            if current.iter().any(|g| g == group) {
                continue;
            }
            b.identity.add_to_group(user, group)?;
            // A new account takes its memberships with it on delete.
            if !created {
                ledger.push(ResourceRecord::Membership {
                    user: user.clone(),
                    group: group.to_owned(),
                });
            }
        }

        if let Some(secret) = plan.passwords.get(user) {
            b.identity.set_password(user, secret)?;
            info!("samba password set for {user}");
        }
    }
    Ok(())
}

pub(crate) fn ensure_volumes(
    b: &Backends<'_>,
    state: &PersistedState,
    units: &[LogicalUnit],
    ledger: &mut Ledger,
) -> Result<(), RuntimeError> {
    for unit in units {
        let fresh = if b.storage.exists(&unit.dataset)? {
            debug!("dataset {} exists", unit.dataset);
            false
        } else {
            b.storage.create(&unit.dataset)?;
            ledger.push(ResourceRecord::Volume {
                dataset: unit.dataset.clone(),
            });
            true
        };

        let (UnitKind::Home(_), Some(quota)) = (&unit.kind, state.policy.home_quota) else {
            continue;
        };
        let previous = b.storage.quota(&unit.dataset)?;
        if previous == quota {
            continue;
        }
        b.storage.set_quota(&unit.dataset, quota)?;
        info!("quota on {} set to {quota}", unit.dataset);
        if !fresh {
            ledger.push(ResourceRecord::QuotaChange {
                dataset: unit.dataset.clone(),
                previous,
            });
        }
    }
    Ok(())
}

pub(crate) fn ensure_mounts(
    b: &Backends<'_>,
    units: &[LogicalUnit],
    ledger: &mut Ledger,
) -> Result<(), RuntimeError> {
    let existing = b.guest.bind_mounts()?;
    for unit in units {
        let source = b.storage.mountpoint(&unit.dataset)?;
        match existing.iter().find(|m| m.target == unit.mount_target) {
            Some(m) if m.source == source => {
                debug!("mount {} already in place", unit.mount_target);
            }
            Some(m) => {
                return Err(RuntimeError::MountConflict {
                    target: unit.mount_target.clone(),
                    existing: m.source.display().to_string(),
                })
            }
            None => {
                let mount = b.guest.add_bind_mount(&source, &unit.mount_target)?;
                info!(
                    "mounted {} at {} (mp{})",
                    source.display(),
                    mount.target,
                    mount.slot
                );
                ledger.push(ResourceRecord::BindMount {
                    target: mount.target,
                    source,
                });
            }
        }
    }
    Ok(())
}

pub(crate) fn ensure_directories(
    b: &Backends<'_>,
    topology: &Topology,
    ledger: &mut Ledger,
) -> Result<(), RuntimeError> {
    for dir in topology.directories() {
        if b.guest.is_dir(&dir.path)? {
            continue;
        }
        b.guest.make_dir(&dir.path)?;
        ledger.push(ResourceRecord::Directory { path: dir.path });
    }
    Ok(())
}

/// Ownership and modes are re-applied every run and never recorded.
pub(crate) fn apply_ownership(
    b: &Backends<'_>,
    topology: &Topology,
    units: &[LogicalUnit],
) -> Result<(), RuntimeError> {
    for unit in units {
        b.guest
            .set_owner_mode(&unit.mount_target, &unit.owner, &unit.group, unit.mode)?;
    }
    for dir in topology.directories() {
        b.guest
            .set_owner_mode(&dir.path, &dir.owner, &dir.group, dir.mode)?;
    }
    Ok(())
}

/// Render, back up, replace, validate and reload the service configuration.
/// Returns whether anything changed.
pub(crate) fn apply_config(
    b: &Backends<'_>,
    state: &PersistedState,
    ledger: &mut Ledger,
) -> Result<bool, RuntimeError> {
    let rendered = render_smb_conf(&state.topology, &state.policy);
    let current = b.guest.read_file(SMB_CONF_PATH)?;
    if current.as_deref() == Some(rendered.as_str()) {
        info!("service configuration unchanged");
        return Ok(false);
    }

    let backup = back_up(b.guest, SMB_CONF_PATH, current.is_some())?;
    ledger.push(ResourceRecord::ConfigFile {
        path: SMB_CONF_PATH.to_owned(),
        backup,
        service: Some(SMB_SERVICE.to_owned()),
    });
    b.guest.write_file(SMB_CONF_PATH, &rendered, 0o644)?;
    b.guest.run(&["testparm", "--suppress-prompt", SMB_CONF_PATH])?;
    b.guest.run(&["systemctl", "restart", SMB_SERVICE])?;
    info!("service configuration written and {SMB_SERVICE} restarted");
    Ok(true)
}

/// Write the persisted record last. Returns whether anything changed.
pub(crate) fn persist_state(
    b: &Backends<'_>,
    state: &PersistedState,
    ledger: &mut Ledger,
) -> Result<bool, RuntimeError> {
    let store = StateStore::new(b.guest);
    if store.matches(state)? {
        info!("state record unchanged");
        return Ok(false);
    }
    if !b.guest.is_dir(STATE_DIR)? {
        b.guest.make_dir(STATE_DIR)?;
        ledger.push(ResourceRecord::Directory {
            path: STATE_DIR.to_owned(),
        });
    }
    let existed = b.guest.read_file(STATE_PATH)?.is_some();
    let backup = back_up(b.guest, STATE_PATH, existed)?;
    ledger.push(ResourceRecord::ConfigFile {
        path: STATE_PATH.to_owned(),
        backup,
        service: None,
    });
    store.save(state)?;
    info!("state record saved");
    Ok(true)
}

pub(crate) fn back_up(
    guest: &dyn Guest,
    path: &str,
    exists: bool,
) -> Result<Option<String>, RuntimeError> {
    if !exists {
        return Ok(None);
    }
    let backup = backup_path(guest, path)?;
    guest.copy_file(path, &backup)?;
    debug!("backed up {path} to {backup}");
    Ok(Some(backup))
}

/// `<path>.bak.<YYYYmmdd-HHMMSS>`, suffixed with a counter if taken.
pub fn backup_path(guest: &dyn Guest, path: &str) -> Result<String, RuntimeError> {
    let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let mut candidate = format!("{path}.bak.{stamp}");
    let mut n = 1;
    while guest.read_file(&candidate)?.is_some() {
        candidate = format!("{path}.bak.{stamp}-{n}");
        n += 1;
    }
    Ok(candidate)
}
