//! Discard bin maintenance.
//!
//! Bins live at `<home>/.recycle` and are purged from the host through the
//! dataset mountpoints; the container is only consulted for the persisted
//! record, and a flush does not take the operator lock. The periodic purge
//! is a host systemd timer that runs `lxsmb recycle flush` for one
//! container.

use crate::CoreError;
use lxsmb_runtime::command::run;
use lxsmb_runtime::StorageBackend;
use lxsmb_schema::{
    resolve, LayoutMode, PersistedState, UnitKind, ValidationError, HOMES_DIR, RECYCLE_DIR,
};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Default host directory for the timer units.
pub const DEFAULT_SYSTEMD_DIR: &str = "/etc/systemd/system";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Bins that were emptied.
    pub bins: Vec<PathBuf>,
    /// Entries removed directly below a bin root.
    pub removed: usize,
    /// Bin paths left alone because they are symlinks or not directories.
    pub skipped: Vec<PathBuf>,
}

/// Host paths of every principal's discard bin, in enrollment order.
pub fn bin_paths(
    storage: &dyn StorageBackend,
    state: &PersistedState,
) -> Result<Vec<PathBuf>, CoreError> {
    let topology = &state.topology;
    if topology.layout == LayoutMode::Unified {
        let base = storage.mountpoint(&topology.base)?;
        return Ok(topology
            .principals
            .iter()
            .map(|u| base.join(HOMES_DIR).join(u.as_str()).join(RECYCLE_DIR))
            .collect());
    }
    let mut bins = Vec::new();
    for unit in resolve(topology)? {
        if let UnitKind::Home(_) = unit.kind {
            bins.push(storage.mountpoint(&unit.dataset)?.join(RECYCLE_DIR));
        }
    }
    Ok(bins)
}

/// Empty every bin. The bin directory itself is kept, and a bin path that is
/// a symlink is never followed.
pub fn flush(
    storage: &dyn StorageBackend,
    state: &PersistedState,
) -> Result<FlushReport, CoreError> {
    if !state.policy.recycle {
        info!("recycle is disabled; flushing any bins left from earlier");
    }
    let mut report = FlushReport::default();
    for bin in bin_paths(storage, state)? {
        let meta = match fs::symlink_metadata(&bin) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no bin at {}", bin.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_dir() {
            warn!("{} is not a directory, skipped", bin.display());
            report.skipped.push(bin);
            continue;
        }
        report.removed += empty_dir(&bin)?;
        info!("flushed {}", bin.display());
        report.bins.push(bin);
    }
    Ok(report)
}

/// Remove every child of `dir`, keeping `dir`. Returns the child count.
fn empty_dir(dir: &Path) -> Result<usize, CoreError> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}

/// How often the purge timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerInterval {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Hours(u32),
    Days(u32),
}

impl TimerInterval {
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::Interval(s.to_owned());
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "hourly" => return Ok(Self::Hourly),
            "daily" => return Ok(Self::Daily),
            "weekly" => return Ok(Self::Weekly),
            "monthly" => return Ok(Self::Monthly),
            _ => {}
        }
        let (digits, ctor): (&str, fn(u32) -> Self) = if let Some(d) = lower.strip_suffix('h') {
            (d, Self::Hours)
        } else if let Some(d) = lower.strip_suffix('d') {
            (d, Self::Days)
        } else {
            return Err(invalid());
        };
        match digits.parse::<u32>() {
            Ok(n) if n > 0 => Ok(ctor(n)),
            _ => Err(invalid()),
        }
    }

    /// `[Timer]` directives for this interval.
    fn directives(self) -> String {
        let every = |span: String| format!("OnBootSec={span}\nOnUnitActiveSec={span}\n");
        match self {
            Self::Hourly => "OnCalendar=hourly\n".to_owned(),
            Self::Daily => "OnCalendar=daily\n".to_owned(),
            Self::Weekly => "OnCalendar=weekly\n".to_owned(),
            Self::Monthly => "OnCalendar=monthly\n".to_owned(),
            Self::Hours(n) => every(format!("{n}h")),
            Self::Days(n) => every(format!("{n}d")),
        }
    }
}

impl fmt::Display for TimerInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hourly => f.write_str("hourly"),
            Self::Daily => f.write_str("daily"),
            Self::Weekly => f.write_str("weekly"),
            Self::Monthly => f.write_str("monthly"),
            Self::Hours(n) => write!(f, "{n}h"),
            Self::Days(n) => write!(f, "{n}d"),
        }
    }
}

/// A rendered service/timer pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerUnits {
    /// Unit base name, without suffix.
    pub name: String,
    pub service: String,
    pub timer: String,
}

pub fn timer_name(ctid: &str) -> String {
    format!("lxsmb-recycle-{ctid}")
}

/// Render the units that run `<exe> --ctid <ctid> recycle flush`.
pub fn plan_timer(ctid: &str, interval: TimerInterval, exe: &Path) -> TimerUnits {
    let name = timer_name(ctid);
    let service = format!(
        "[Unit]\n\
         Description=lxsmb discard bin purge for container {ctid}\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         ExecStart={} --ctid {ctid} recycle flush\n",
        exe.display()
    );
    let timer = format!(
        "[Unit]\n\
         Description=lxsmb discard bin purge for container {ctid} ({interval})\n\
         \n\
         [Timer]\n\
         {}\
         Persistent=true\n\
         Unit={name}.service\n\
         \n\
         [Install]\n\
         WantedBy=timers.target\n",
        interval.directives()
    );
    TimerUnits {
        name,
        service,
        timer,
    }
}

fn write_atomic(dest: &Path, content: &str) -> Result<(), CoreError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| CoreError::Io(e.error))?;
    Ok(())
}

/// Write both unit files into `dir`. Returns their paths.
pub fn write_timer(dir: &Path, units: &TimerUnits) -> Result<Vec<PathBuf>, CoreError> {
    fs::create_dir_all(dir)?;
    let service = dir.join(format!("{}.service", units.name));
    let timer = dir.join(format!("{}.timer", units.name));
    write_atomic(&service, &units.service)?;
    write_atomic(&timer, &units.timer)?;
    debug!("wrote {} and {}", service.display(), timer.display());
    Ok(vec![service, timer])
}

/// Delete the unit files of `ctid`'s timer. Returns whether any existed.
pub fn remove_timer(dir: &Path, ctid: &str) -> Result<bool, CoreError> {
    let name = timer_name(ctid);
    let mut found = false;
    for suffix in ["timer", "service"] {
        let path = dir.join(format!("{name}.{suffix}"));
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("removed {}", path.display());
                found = true;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(found)
}

/// Reload systemd and start the timer now and at boot.
pub fn activate_timer(name: &str) -> Result<(), CoreError> {
    run(Command::new("systemctl").arg("daemon-reload"))?;
    run(Command::new("systemctl").args(["enable", "--now", &format!("{name}.timer")]))?;
    info!("{name}.timer enabled");
    Ok(())
}

/// Stop and disable the timer. A unit systemd does not know is not an error.
pub fn deactivate_timer(name: &str) {
    let unit = format!("{name}.timer");
    if let Err(e) = run(Command::new("systemctl").args(["disable", "--now", &unit])) {
        warn!("disabling {unit}: {e}");
    }
}

/// Reload systemd after unit files were removed.
pub fn reload_systemd() -> Result<(), CoreError> {
    run(Command::new("systemctl").arg("daemon-reload"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxsmb_runtime::mock::MockStorage;
    use lxsmb_schema::{DatasetName, Policy, Topology, Username};

    fn state(layout: LayoutMode, users: &[&str]) -> PersistedState {
        let mut t = Topology::new(DatasetName::parse("tank/smb").unwrap(), layout);
        for u in users {
            t.enroll(Username::parse(*u).unwrap());
        }
        let policy = Policy {
            recycle: true,
            ..Policy::default()
        };
        PersistedState::new(t, policy)
    }

    fn storage_for(dir: &Path, state: &PersistedState) -> MockStorage {
        let storage = MockStorage::new(dir).unwrap();
        storage.add_pool("tank").unwrap();
        for unit in resolve(&state.topology).unwrap() {
            storage.create(&unit.dataset).unwrap();
        }
        storage
    }

    #[test]
    fn flush_empties_bins_but_keeps_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(LayoutMode::PerUser, &["alice"]);
        let storage = storage_for(dir.path(), &s);
        let home = dir.path().join("tank/smb/homes/alice");
        let bin = home.join(RECYCLE_DIR);
        fs::create_dir_all(bin.join("docs/old")).unwrap();
        fs::write(bin.join("a.txt"), "a").unwrap();
        fs::write(bin.join("docs/old/b.txt"), "b").unwrap();
        fs::write(home.join("keep.txt"), "k").unwrap();

        let report = flush(&storage, &s).unwrap();
        assert_eq!(report.removed, 2);
        assert_eq!(report.bins, vec![bin.clone()]);
        assert!(bin.is_dir());
        assert_eq!(fs::read_dir(&bin).unwrap().count(), 0);
        assert!(home.join("keep.txt").exists());
    }

    #[test]
    fn unified_bins_live_under_the_base_mount() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(LayoutMode::Unified, &["alice", "bob"]);
        let storage = storage_for(dir.path(), &s);
        let bins = bin_paths(&storage, &s).unwrap();
        assert_eq!(
            bins,
            vec![
                dir.path().join("tank/smb/homes/alice/.recycle"),
                dir.path().join("tank/smb/homes/bob/.recycle"),
            ]
        );
    }

    #[test]
    fn symlinked_bin_is_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(LayoutMode::PerUser, &["alice"]);
        let storage = storage_for(dir.path(), &s);
        let outside = dir.path().join("precious");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("data"), "d").unwrap();
        std::os::unix::fs::symlink(&outside, dir.path().join("tank/smb/homes/alice/.recycle"))
            .unwrap();

        let report = flush(&storage, &s).unwrap();
        assert_eq!(report.skipped.len(), 1);
        assert!(outside.join("data").exists());
    }

    #[test]
    fn missing_bin_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let s = state(LayoutMode::PerUser, &["alice"]);
        let storage = storage_for(dir.path(), &s);
        assert_eq!(flush(&storage, &s).unwrap(), FlushReport::default());
    }

    #[test]
    fn interval_parsing() {
        assert_eq!(TimerInterval::parse("daily").unwrap(), TimerInterval::Daily);
        assert_eq!(TimerInterval::parse("Weekly").unwrap(), TimerInterval::Weekly);
        assert_eq!(TimerInterval::parse("6h").unwrap(), TimerInterval::Hours(6));
        assert_eq!(TimerInterval::parse("2d").unwrap(), TimerInterval::Days(2));
        for bad in ["", "0h", "h", "3w", "-1d", "often"] {
            assert!(TimerInterval::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn timer_units_invoke_flush_for_the_container() {
        let units = plan_timer("105", TimerInterval::Hours(6), Path::new("/usr/bin/lxsmb"));
        assert_eq!(units.name, "lxsmb-recycle-105");
        assert!(units
            .service
            .contains("ExecStart=/usr/bin/lxsmb --ctid 105 recycle flush\n"));
        assert!(units.timer.contains("OnUnitActiveSec=6h\n"));
        assert!(units.timer.contains("Unit=lxsmb-recycle-105.service\n"));

        let daily = plan_timer("105", TimerInterval::Daily, Path::new("/usr/bin/lxsmb"));
        assert!(daily.timer.contains("OnCalendar=daily\n"));
    }

    #[test]
    fn write_then_remove_timer_files() {
        let dir = tempfile::tempdir().unwrap();
        let units = plan_timer("105", TimerInterval::Daily, Path::new("/usr/bin/lxsmb"));
        let paths = write_timer(dir.path(), &units).unwrap();
        assert!(paths.iter().all(|p| p.exists()));
        assert!(remove_timer(dir.path(), "105").unwrap());
        assert!(!remove_timer(dir.path(), "105").unwrap());
    }
}
