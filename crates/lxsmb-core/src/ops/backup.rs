use crate::compensate::compensate;
use crate::engine::Backends;
use crate::ledger::{Ledger, ResourceRecord};
use crate::provision::{back_up, backup_path, SMB_SERVICE};
use crate::CoreError;
use lxsmb_runtime::Guest;
use lxsmb_schema::SMB_CONF_PATH;
use serde::Serialize;
use tracing::{info, warn};

const CONF_DIR: &str = "/etc/samba";
const BACKUP_PREFIX: &str = "smb.conf.bak.";
const STAMP_LEN: usize = "YYYYmmdd-HHMMSS".len();

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Restored {
    /// Backup that is now live.
    pub from: String,
    /// Where the replaced configuration was saved, if there was one.
    pub previous: Option<String>,
}

/// Copy the live configuration to a new timestamped backup.
pub fn backup(guest: &dyn Guest) -> Result<String, CoreError> {
    if guest.read_file(SMB_CONF_PATH)?.is_none() {
        return Err(CoreError::Precondition(format!(
            "{SMB_CONF_PATH} does not exist in container {}",
            guest.id()
        )));
    }
    let path = backup_path(guest, SMB_CONF_PATH)?;
    guest.copy_file(SMB_CONF_PATH, &path)?;
    info!("backed up {SMB_CONF_PATH} to {path}");
    Ok(path)
}

/// Full guest paths of every configuration backup, newest first.
pub fn list(guest: &dyn Guest) -> Result<Vec<String>, CoreError> {
    let mut names: Vec<String> = guest
        .list_dir(CONF_DIR)?
        .into_iter()
        .filter(|n| n.starts_with(BACKUP_PREFIX))
        .collect();
    names.sort_unstable_by(|a, b| backup_order(b).cmp(&backup_order(a)));
    Ok(names.into_iter().map(|n| format!("{CONF_DIR}/{n}")).collect())
}

/// `smb.conf.bak.YYYYmmdd-HHMMSS[-N]` as (timestamp, N), the base being 0.
fn backup_order(name: &str) -> (&str, u32) {
    let rest = name.strip_prefix(BACKUP_PREFIX).unwrap_or(name);
    let Some((stamp, suffix)) = rest.get(..STAMP_LEN).zip(rest.get(STAMP_LEN..)) else {
        return (rest, 0);
    };
    let n = suffix
        .strip_prefix('-')
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);
    (stamp, n)
}

/// Make a backup live again: `file` (a listed path or bare file name) or the
/// newest one. The current configuration is backed up first. A restored file
/// that fails validation is reverted.
pub fn restore(backends: &Backends<'_>, file: Option<&str>) -> Result<Restored, CoreError> {
    let guest = backends.guest;
    let available = list(guest)?;
    let chosen = match file {
        Some(f) => available
            .iter()
            .find(|p| p.as_str() == f || p.rsplit('/').next() == Some(f))
            .cloned()
            .ok_or_else(|| CoreError::BackupNotFound(f.to_owned()))?,
        None => available
            .first()
            .cloned()
            .ok_or_else(|| CoreError::BackupNotFound(format!("no backups in {CONF_DIR}")))?,
    };

    let mut ledger = Ledger::new();
    let exists = guest.read_file(SMB_CONF_PATH)?.is_some();
    let previous = back_up(guest, SMB_CONF_PATH, exists)?;
    ledger.push(ResourceRecord::ConfigFile {
        path: SMB_CONF_PATH.to_owned(),
        backup: previous.clone(),
        service: Some(SMB_SERVICE.to_owned()),
    });

    let applied = guest
        .copy_file(&chosen, SMB_CONF_PATH)
        .and_then(|()| guest.run(&["testparm", "--suppress-prompt", SMB_CONF_PATH]))
        .and_then(|_| guest.run(&["systemctl", "restart", SMB_SERVICE]));
    if let Err(e) = applied {
        warn!("restoring {chosen} failed: {e}; reverting");
        compensate(ledger, backends);
        return Err(e.into());
    }
    info!("restored {chosen} and restarted {SMB_SERVICE}");
    Ok(Restored {
        from: chosen,
        previous,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxsmb_runtime::mock::{Fault, MockGuest, MockIdentity, MockStorage};

    struct Fixture {
        _dir: tempfile::TempDir,
        storage: MockStorage,
        guest: MockGuest,
        identity: MockIdentity,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        Fixture {
            storage: MockStorage::new(dir.path().join("h")).unwrap(),
            guest: MockGuest::new("105", dir.path().join("g")).unwrap(),
            identity: MockIdentity::new(),
            _dir: dir,
        }
    }

    impl Fixture {
        fn backends(&self) -> Backends<'_> {
            Backends {
                storage: &self.storage,
                guest: &self.guest,
                identity: &self.identity,
            }
        }
    }

    #[test]
    fn backup_without_config_is_a_precondition_failure() {
        let fx = fixture();
        assert!(matches!(backup(&fx.guest), Err(CoreError::Precondition(_))));
    }

    #[test]
    fn list_is_newest_first_and_ignores_other_files() {
        let fx = fixture();
        for name in [
            "smb.conf",
            "smb.conf.bak.20260101-000000",
            "smb.conf.bak.20260301-000000",
            "smb.conf.bak.20260301-000000-1",
            "lmhosts",
        ] {
            fx.guest.write_file(&format!("/etc/samba/{name}"), "x", 0o644).unwrap();
        }
        assert_eq!(
            list(&fx.guest).unwrap(),
            vec![
                "/etc/samba/smb.conf.bak.20260301-000000-1",
                "/etc/samba/smb.conf.bak.20260301-000000",
                "/etc/samba/smb.conf.bak.20260101-000000",
            ]
        );
    }

    #[test]
    fn collision_suffixes_order_numerically() {
        let fx = fixture();
        for name in [
            "smb.conf.bak.20260101-115959",
            "smb.conf.bak.20260101-120000",
            "smb.conf.bak.20260101-120000-1",
            "smb.conf.bak.20260101-120000-2",
            "smb.conf.bak.20260101-120000-10",
        ] {
            fx.guest.write_file(&format!("/etc/samba/{name}"), "x", 0o644).unwrap();
        }
        assert_eq!(
            list(&fx.guest).unwrap(),
            vec![
                "/etc/samba/smb.conf.bak.20260101-120000-10",
                "/etc/samba/smb.conf.bak.20260101-120000-2",
                "/etc/samba/smb.conf.bak.20260101-120000-1",
                "/etc/samba/smb.conf.bak.20260101-120000",
                "/etc/samba/smb.conf.bak.20260101-115959",
            ]
        );

        fx.guest.write_file(SMB_CONF_PATH, "current", 0o644).unwrap();
        let restored = restore(&fx.backends(), None).unwrap();
        assert_eq!(restored.from, "/etc/samba/smb.conf.bak.20260101-120000-10");
    }

    #[test]
    fn restore_newest_keeps_current_as_backup() {
        let fx = fixture();
        fx.guest.write_file(SMB_CONF_PATH, "current", 0o644).unwrap();
        fx.guest
            .write_file("/etc/samba/smb.conf.bak.20260101-000000", "old", 0o644)
            .unwrap();

        let restored = restore(&fx.backends(), None).unwrap();
        assert_eq!(restored.from, "/etc/samba/smb.conf.bak.20260101-000000");
        let previous = restored.previous.unwrap();
        assert_eq!(fx.guest.read_file(SMB_CONF_PATH).unwrap().as_deref(), Some("old"));
        assert_eq!(fx.guest.read_file(&previous).unwrap().as_deref(), Some("current"));
        assert_eq!(
            fx.guest.execs_of("systemctl"),
            vec![vec!["systemctl", "restart", "smbd"]]
        );
    }

    #[test]
    fn restore_of_unlisted_file_is_rejected() {
        let fx = fixture();
        fx.guest.write_file(SMB_CONF_PATH, "current", 0o644).unwrap();
        let err = restore(&fx.backends(), Some("/etc/passwd")).unwrap_err();
        assert!(matches!(err, CoreError::BackupNotFound(_)));
        assert_eq!(fx.guest.list_dir("/etc/samba").unwrap(), vec!["smb.conf"]);
    }

    #[test]
    fn invalid_backup_is_reverted() {
        let fx = fixture();
        fx.guest.write_file(SMB_CONF_PATH, "current", 0o644).unwrap();
        fx.guest
            .write_file("/etc/samba/smb.conf.bak.20260101-000000", "broken", 0o644)
            .unwrap();
        fx.guest.fail_on(Fault::Exec("testparm".to_owned()));

        let err = restore(&fx.backends(), Some("smb.conf.bak.20260101-000000")).unwrap_err();
        assert!(matches!(err, CoreError::Runtime(_)));
        assert_eq!(
            fx.guest.read_file(SMB_CONF_PATH).unwrap().as_deref(),
            Some("current")
        );
        assert_eq!(list(&fx.guest).unwrap().len(), 1);
    }
}
