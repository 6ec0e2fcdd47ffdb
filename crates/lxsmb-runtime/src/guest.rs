use crate::command::{capture, run, ExecOutput};
use crate::RuntimeError;
use serde::Serialize;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Highest `mpN` index Proxmox accepts.
const MAX_MOUNT_SLOT: u32 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestStatus {
    Running,
    Stopped,
    Missing,
}

/// A host directory bind-mounted into the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindMount {
    pub slot: u32,
    pub source: PathBuf,
    pub target: String,
}

/// The managed container. Paths are guest paths.
pub trait Guest {
    fn id(&self) -> &str;

    fn status(&self) -> Result<GuestStatus, RuntimeError>;

    fn start(&self) -> Result<(), RuntimeError>;

    fn bind_mounts(&self) -> Result<Vec<BindMount>, RuntimeError>;

    /// Bind `source` at `target` in the first free slot.
    fn add_bind_mount(&self, source: &Path, target: &str) -> Result<BindMount, RuntimeError>;

    fn remove_bind_mount(&self, target: &str) -> Result<(), RuntimeError>;

    /// Run a command inside the guest. A non-zero exit is not an error here.
    fn exec(&self, argv: &[&str], input: Option<&str>) -> Result<ExecOutput, RuntimeError>;

    fn read_file(&self, path: &str) -> Result<Option<String>, RuntimeError>;

    /// Replace `path` atomically. The parent directory must exist.
    fn write_file(&self, path: &str, content: &str, mode: u32) -> Result<(), RuntimeError>;

    fn copy_file(&self, from: &str, to: &str) -> Result<(), RuntimeError>;

    fn remove_file(&self, path: &str) -> Result<(), RuntimeError>;

    /// Entry names of a directory, unsorted.
    fn list_dir(&self, path: &str) -> Result<Vec<String>, RuntimeError>;

    fn is_dir(&self, path: &str) -> Result<bool, RuntimeError>;

    /// Create one directory level. Fails if it already exists.
    fn make_dir(&self, path: &str) -> Result<(), RuntimeError>;

    /// Remove a directory only when it is empty. Returns whether it was removed.
    fn remove_dir_if_empty(&self, path: &str) -> Result<bool, RuntimeError>;

    fn set_owner_mode(
        &self,
        path: &str,
        owner: &str,
        group: &str,
        mode: u32,
    ) -> Result<(), RuntimeError>;

    /// `exec` that fails on a non-zero exit and returns stdout.
    fn run(&self, argv: &[&str]) -> Result<String, RuntimeError> {
        let program = argv.first().copied().unwrap_or_default();
        Ok(self.exec(argv, None)?.check(program)?.stdout)
    }
}

/// A Proxmox LXC container driven through `pct`.
#[derive(Debug, Clone)]
pub struct PctGuest {
    ctid: String,
}

impl PctGuest {
    pub fn new(ctid: impl Into<String>) -> Self {
        Self { ctid: ctid.into() }
    }

    fn pct(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new("pct");
        cmd.arg(subcommand).arg(&self.ctid);
        cmd
    }

    fn test(&self, flag: &str, path: &str) -> Result<bool, RuntimeError> {
        let out = self.exec(&["test", flag, path], None)?;
        match out.code {
            0 => Ok(true),
            1 => Ok(false),
            _ => out.check("test").map(|_| false),
        }
    }
}

impl Guest for PctGuest {
    fn id(&self) -> &str {
        &self.ctid
    }

    fn status(&self) -> Result<GuestStatus, RuntimeError> {
        let out = capture(&mut self.pct("status"), None)?;
        if !out.success() && out.stderr.contains("does not exist") {
            return Ok(GuestStatus::Missing);
        }
        parse_pct_status(&out.check("pct")?.stdout)
    }

    fn start(&self) -> Result<(), RuntimeError> {
        run(&mut self.pct("start"))?;
        Ok(())
    }

    fn bind_mounts(&self) -> Result<Vec<BindMount>, RuntimeError> {
        Ok(parse_pct_config_mounts(&run(&mut self.pct("config"))?))
    }

    fn add_bind_mount(&self, source: &Path, target: &str) -> Result<BindMount, RuntimeError> {
        let existing = self.bind_mounts()?;
        if let Some(m) = existing.iter().find(|m| m.target == target) {
            return Err(RuntimeError::MountConflict {
                target: target.to_owned(),
                existing: m.source.display().to_string(),
            });
        }
        let slot = next_free_slot(&existing)
            .ok_or_else(|| RuntimeError::NoFreeMountSlot(self.ctid.clone()))?;
        let value = format!("{},mp={target}", source.display());
        run(self
            .pct("set")
            .arg(format!("-mp{slot}"))
            .arg(&value))?;
        Ok(BindMount {
            slot,
            source: source.to_path_buf(),
            target: target.to_owned(),
        })
    }

    fn remove_bind_mount(&self, target: &str) -> Result<(), RuntimeError> {
        let Some(mount) = self.bind_mounts()?.into_iter().find(|m| m.target == target) else {
            debug!("no bind mount at {target}, nothing to detach");
            return Ok(());
        };
        run(self
            .pct("set")
            .args(["-delete", &format!("mp{}", mount.slot)]))?;
        Ok(())
    }

    fn exec(&self, argv: &[&str], input: Option<&str>) -> Result<ExecOutput, RuntimeError> {
        capture(self.pct("exec").arg("--").args(argv), input)
    }

    fn read_file(&self, path: &str) -> Result<Option<String>, RuntimeError> {
        if !self.test("-f", path)? {
            return Ok(None);
        }
        self.run(&["cat", path]).map(Some)
    }

    fn write_file(&self, path: &str, content: &str, mode: u32) -> Result<(), RuntimeError> {
        let mut staged = tempfile::NamedTempFile::new()?;
        staged.write_all(content.as_bytes())?;
        staged.flush()?;

        let incoming = format!("{path}.lxsmb-new");
        run(self
            .pct("push")
            .arg(staged.path())
            .arg(&incoming)
            .args(["--perms", &format!("{mode:o}")]))?;
        self.run(&["mv", "-f", &incoming, path])?;
        Ok(())
    }

    fn copy_file(&self, from: &str, to: &str) -> Result<(), RuntimeError> {
        self.run(&["cp", "-p", from, to])?;
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<(), RuntimeError> {
        self.run(&["rm", "-f", path])?;
        Ok(())
    }

    fn list_dir(&self, path: &str) -> Result<Vec<String>, RuntimeError> {
        Ok(self
            .run(&["ls", "-1A", path])?
            .lines()
            .filter(|l| !l.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }

    fn is_dir(&self, path: &str) -> Result<bool, RuntimeError> {
        self.test("-d", path)
    }

    fn make_dir(&self, path: &str) -> Result<(), RuntimeError> {
        self.run(&["mkdir", path])?;
        Ok(())
    }

    fn remove_dir_if_empty(&self, path: &str) -> Result<bool, RuntimeError> {
        let out = self.exec(&["rmdir", path], None)?;
        if out.success() {
            return Ok(true);
        }
        if self.is_dir(path)? {
            debug!("{path} is not empty, leaving it in place");
        }
        Ok(false)
    }

    fn set_owner_mode(
        &self,
        path: &str,
        owner: &str,
        group: &str,
        mode: u32,
    ) -> Result<(), RuntimeError> {
        self.run(&["chown", &format!("{owner}:{group}"), path])?;
        self.run(&["chmod", &format!("{mode:o}"), path])?;
        Ok(())
    }
}

fn parse_pct_status(stdout: &str) -> Result<GuestStatus, RuntimeError> {
    match stdout.trim().strip_prefix("status:").map(str::trim) {
        Some("running") => Ok(GuestStatus::Running),
        Some("stopped") => Ok(GuestStatus::Stopped),
        _ => Err(RuntimeError::Parse {
            program: "pct status".to_owned(),
            detail: stdout.trim().to_owned(),
        }),
    }
}

/// Extract `mpN: <source>,mp=<target>[,...]` entries from `pct config`.
/// Volume-backed mount points (`local-zfs:subvol-...`) are kept too, so
/// their slots and targets count as taken.
pub fn parse_pct_config_mounts(config: &str) -> Vec<BindMount> {
    let mut mounts: Vec<BindMount> = config
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let slot = key.trim().strip_prefix("mp")?.parse::<u32>().ok()?;
            let mut parts = value.trim().split(',');
            let source = parts.next()?.trim();
            let target = parts.find_map(|p| p.trim().strip_prefix("mp="))?;
            Some(BindMount {
                slot,
                source: PathBuf::from(source),
                target: target.to_owned(),
            })
        })
        .collect();
    mounts.sort_by_key(|m| m.slot);
    mounts
}

/// Lowest unused `mpN` index.
pub fn next_free_slot(mounts: &[BindMount]) -> Option<u32> {
    (0..=MAX_MOUNT_SLOT).find(|slot| mounts.iter().all(|m| m.slot != *slot))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "\
arch: amd64
hostname: files
memory: 512
mp1: /tank/samba/homes,mp=/srv/samba/homes
mp0: /tank/samba,mp=/srv/samba,backup=0
net0: name=eth0,bridge=vmbr0,ip=dhcp
rootfs: local-zfs:subvol-105-disk-0,size=8G
mp3: local-zfs:subvol-105-disk-1,mp=/data,size=32G
unprivileged: 1
";

    #[test]
    fn config_mounts_are_parsed_in_slot_order() {
        let mounts = parse_pct_config_mounts(CONFIG);
        assert_eq!(mounts.len(), 3);
        assert_eq!(mounts[0].slot, 0);
        assert_eq!(mounts[0].source, PathBuf::from("/tank/samba"));
        assert_eq!(mounts[0].target, "/srv/samba");
        assert_eq!(mounts[1].target, "/srv/samba/homes");
        assert_eq!(mounts[2].slot, 3);
        assert_eq!(mounts[2].target, "/data");
    }

    #[test]
    fn next_slot_fills_gaps() {
        let mounts = parse_pct_config_mounts(CONFIG);
        assert_eq!(next_free_slot(&mounts), Some(2));
        assert_eq!(next_free_slot(&[]), Some(0));
    }

    #[test]
    fn next_slot_exhausted() {
        let mounts: Vec<_> = (0..=MAX_MOUNT_SLOT)
            .map(|slot| BindMount {
                slot,
                source: PathBuf::from("/x"),
                target: format!("/m{slot}"),
            })
            .collect();
        assert_eq!(next_free_slot(&mounts), None);
    }

    #[test]
    fn rootfs_and_network_lines_are_ignored() {
        let mounts = parse_pct_config_mounts("rootfs: local:1/vm.raw,size=8G\nnet0: name=eth0\n");
        assert!(mounts.is_empty());
    }

    #[test]
    fn status_output_parses() {
        assert_eq!(parse_pct_status("status: running\n").unwrap(), GuestStatus::Running);
        assert_eq!(parse_pct_status("status: stopped").unwrap(), GuestStatus::Stopped);
        assert!(parse_pct_status("status: paused").is_err());
    }
}
