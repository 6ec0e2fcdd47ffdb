//! In-process collaborators for tests.
//!
//! `MockStorage` keeps each dataset as a real directory under a scratch root
//! (children nested inside their parent, as ZFS mounts them) and snapshots as
//! directory copies. `MockGuest` maps guest paths under its own root; a bind
//! mount becomes a symlink to the dataset directory. `MockIdentity` is an
//! in-memory account database. Every mutating call consults an injected
//! fault list first.

use crate::command::ExecOutput;
use crate::guest::{next_free_slot, BindMount, Guest, GuestStatus};
use crate::identity::{IdentityDirectory, Secret};
use crate::storage::StorageBackend;
use crate::RuntimeError;
use lxsmb_schema::{DatasetName, Quota, SnapshotTag, Username};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// A call to fail. String payloads name the dataset, guest path, program,
/// user or group the fault applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    CreateDataset(String),
    DestroyDataset(String),
    SetQuota(String),
    Snapshot,
    Rollback(String),
    DestroySnapshot(String),
    AddBindMount(String),
    RemoveBindMount(String),
    MakeDir(String),
    RemoveDir(String),
    WriteFile(String),
    SetOwner(String),
    /// Program name; the call returns exit status 1.
    Exec(String),
    CreateUser(String),
    DeleteUser(String),
    CreateGroup(String),
    DeleteGroup(String),
    AddToGroup { user: String, group: String },
    SetPassword(String),
}

#[derive(Debug, Default)]
struct FaultPlan(Mutex<Vec<Fault>>);

impl FaultPlan {
    fn inject(&self, fault: Fault) {
        if let Ok(mut faults) = self.0.lock() {
            faults.push(fault);
        }
    }

    fn clear(&self) {
        if let Ok(mut faults) = self.0.lock() {
            faults.clear();
        }
    }

    fn armed(&self, fault: &Fault) -> bool {
        self.0.lock().map(|f| f.contains(fault)).unwrap_or(false)
    }

    fn check(&self, fault: Fault) -> Result<(), RuntimeError> {
        if self.armed(&fault) {
            Err(RuntimeError::Injected(format!("{fault:?}")))
        } else {
            Ok(())
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RuntimeError> {
    mutex
        .lock()
        .map_err(|e| RuntimeError::Poisoned(e.to_string()))
}

fn tool_failure(program: &str, code: i32, stderr: String) -> RuntimeError {
    RuntimeError::CommandFailed {
        program: program.to_owned(),
        code,
        stderr,
    }
}

// --- storage ---------------------------------------------------------------

#[derive(Debug, Default)]
struct DatasetEntry {
    quota: Quota,
    snapshots: Vec<String>,
}

pub struct MockStorage {
    root: PathBuf,
    datasets: Mutex<BTreeMap<String, DatasetEntry>>,
    faults: FaultPlan,
}

impl MockStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, RuntimeError> {
        let root = root.into();
        fs::create_dir_all(root.join(".snapshots"))?;
        Ok(Self {
            root,
            datasets: Mutex::new(BTreeMap::new()),
            faults: FaultPlan::default(),
        })
    }

    /// Register a pool root (or any pre-existing dataset).
    pub fn add_pool(&self, name: &str) -> Result<(), RuntimeError> {
        fs::create_dir_all(self.root.join(name))?;
        lock(&self.datasets)?.insert(name.to_owned(), DatasetEntry::default());
        Ok(())
    }

    pub fn fail_on(&self, fault: Fault) {
        self.faults.inject(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn datasets(&self) -> Vec<String> {
        self.datasets
            .lock()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn quotas(&self) -> BTreeMap<String, Quota> {
        self.datasets
            .lock()
            .map(|d| d.iter().map(|(k, v)| (k.clone(), v.quota)).collect())
            .unwrap_or_default()
    }

    fn path_of(&self, dataset: &str) -> PathBuf {
        self.root.join(dataset)
    }

    fn snapshot_dir(&self, dataset: &str, tag: &str) -> PathBuf {
        self.root
            .join(".snapshots")
            .join(dataset.replace('/', "%"))
            .join(tag)
    }

    fn child_mountpoints(
        &self,
        datasets: &BTreeMap<String, DatasetEntry>,
        dataset: &str,
    ) -> Vec<PathBuf> {
        let prefix = format!("{dataset}/");
        datasets
            .keys()
            .filter(|k| k.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('/')))
            .map(|k| self.path_of(k))
            .collect()
    }

    fn missing(dataset: &str) -> RuntimeError {
        tool_failure("zfs", 1, format!("cannot open '{dataset}': dataset does not exist"))
    }
}

impl StorageBackend for MockStorage {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn exists(&self, dataset: &DatasetName) -> Result<bool, RuntimeError> {
        Ok(lock(&self.datasets)?.contains_key(dataset.as_str()))
    }

    fn create(&self, dataset: &DatasetName) -> Result<(), RuntimeError> {
        self.faults.check(Fault::CreateDataset(dataset.to_string()))?;
        let mut datasets = lock(&self.datasets)?;
        if datasets.contains_key(dataset.as_str()) {
            return Err(tool_failure(
                "zfs",
                1,
                format!("cannot create '{dataset}': dataset already exists"),
            ));
        }
        match dataset.parent() {
            Some(parent) if datasets.contains_key(parent.as_str()) => {}
            _ => {
                return Err(tool_failure(
                    "zfs",
                    1,
                    format!("cannot create '{dataset}': parent does not exist"),
                ))
            }
        }
        fs::create_dir_all(self.path_of(dataset))?;
        datasets.insert(dataset.to_string(), DatasetEntry::default());
        Ok(())
    }

    fn destroy(&self, dataset: &DatasetName) -> Result<(), RuntimeError> {
        self.faults.check(Fault::DestroyDataset(dataset.to_string()))?;
        let mut datasets = lock(&self.datasets)?;
        if !datasets.contains_key(dataset.as_str()) {
            return Err(Self::missing(dataset));
        }
        let prefix = format!("{dataset}/");
        let doomed: Vec<String> = datasets
            .keys()
            .filter(|k| k.as_str() == dataset.as_str() || k.starts_with(&prefix))
            .cloned()
            .collect();
        for name in &doomed {
            datasets.remove(name);
            let snaps = self.root.join(".snapshots").join(name.replace('/', "%"));
            if snaps.exists() {
                fs::remove_dir_all(snaps)?;
            }
        }
        let path = self.path_of(dataset);
        if path.exists() {
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    fn mountpoint(&self, dataset: &DatasetName) -> Result<PathBuf, RuntimeError> {
        if !lock(&self.datasets)?.contains_key(dataset.as_str()) {
            return Err(Self::missing(dataset));
        }
        Ok(self.path_of(dataset))
    }

    fn quota(&self, dataset: &DatasetName) -> Result<Quota, RuntimeError> {
        lock(&self.datasets)?
            .get(dataset.as_str())
            .map(|d| d.quota)
            .ok_or_else(|| Self::missing(dataset))
    }

    fn set_quota(&self, dataset: &DatasetName, quota: Quota) -> Result<(), RuntimeError> {
        self.faults.check(Fault::SetQuota(dataset.to_string()))?;
        let mut datasets = lock(&self.datasets)?;
        let entry = datasets
            .get_mut(dataset.as_str())
            .ok_or_else(|| Self::missing(dataset))?;
        entry.quota = quota;
        Ok(())
    }

    fn snapshot(&self, datasets: &[DatasetName], tag: &SnapshotTag) -> Result<(), RuntimeError> {
        self.faults.check(Fault::Snapshot)?;
        let mut all = lock(&self.datasets)?;
        for ds in datasets {
            let entry = all.get(ds.as_str()).ok_or_else(|| Self::missing(ds))?;
            if entry.snapshots.iter().any(|t| t == tag.as_str()) {
                return Err(tool_failure(
                    "zfs",
                    1,
                    format!("cannot create snapshot '{}': dataset already exists", ds.at(tag)),
                ));
            }
        }
        for ds in datasets {
            let skip = self.child_mountpoints(&all, ds);
            copy_tree(&self.path_of(ds), &self.snapshot_dir(ds, tag), &skip)?;
            if let Some(entry) = all.get_mut(ds.as_str()) {
                entry.snapshots.push(tag.to_string());
            }
        }
        Ok(())
    }

    fn snapshots(&self, dataset: &DatasetName) -> Result<Vec<String>, RuntimeError> {
        lock(&self.datasets)?
            .get(dataset.as_str())
            .map(|d| d.snapshots.clone())
            .ok_or_else(|| Self::missing(dataset))
    }

    fn rollback(&self, dataset: &DatasetName, tag: &SnapshotTag) -> Result<(), RuntimeError> {
        self.faults.check(Fault::Rollback(dataset.to_string()))?;
        let mut all = lock(&self.datasets)?;
        let skip = self.child_mountpoints(&all, dataset);
        let entry = all
            .get_mut(dataset.as_str())
            .ok_or_else(|| Self::missing(dataset))?;
        let Some(pos) = entry.snapshots.iter().position(|t| t == tag.as_str()) else {
            return Err(Self::missing(&dataset.at(tag)));
        };
        for later in entry.snapshots.drain(pos + 1..) {
            fs::remove_dir_all(self.snapshot_dir(dataset, &later))?;
        }
        let live = self.path_of(dataset);
        clear_dir(&live, &skip)?;
        copy_tree(&self.snapshot_dir(dataset, tag), &live, &[])?;
        Ok(())
    }

    fn destroy_snapshot(
        &self,
        dataset: &DatasetName,
        tag: &SnapshotTag,
    ) -> Result<(), RuntimeError> {
        self.faults.check(Fault::DestroySnapshot(dataset.to_string()))?;
        let mut all = lock(&self.datasets)?;
        let entry = all
            .get_mut(dataset.as_str())
            .ok_or_else(|| Self::missing(dataset))?;
        let before = entry.snapshots.len();
        entry.snapshots.retain(|t| t != tag.as_str());
        if entry.snapshots.len() == before {
            return Err(tool_failure(
                "zfs",
                1,
                format!("could not find any snapshots to destroy; check snapshot names. ({})", dataset.at(tag)),
            ));
        }
        fs::remove_dir_all(self.snapshot_dir(dataset, tag))?;
        Ok(())
    }
}

fn copy_tree(src: &Path, dst: &Path, skip: &[PathBuf]) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        if skip.contains(&path) {
            continue;
        }
        let target = dst.join(entry.file_name());
        let kind = entry.file_type()?;
        if kind.is_dir() {
            copy_tree(&path, &target, &[])?;
        } else if kind.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(&path)?, &target)?;
        } else {
            fs::copy(&path, &target)?;
        }
    }
    Ok(())
}

fn clear_dir(dir: &Path, skip: &[PathBuf]) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if skip.contains(&path) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

// --- guest -----------------------------------------------------------------

#[derive(Debug)]
struct GuestState {
    status: GuestStatus,
    mounts: Vec<BindMount>,
    exec_log: Vec<Vec<String>>,
    last_input: Option<String>,
    responses: BTreeMap<String, ExecOutput>,
    owners: BTreeMap<String, (String, String, u32)>,
}

pub struct MockGuest {
    id: String,
    root: PathBuf,
    state: Mutex<GuestState>,
    faults: FaultPlan,
}

impl MockGuest {
    /// A running guest whose filesystem lives under `root`, seeded with
    /// the directories a fresh Samba container has.
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self, RuntimeError> {
        let root = root.into();
        for dir in ["etc/samba", "srv", "var/log/samba"] {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self {
            id: id.into(),
            root,
            state: Mutex::new(GuestState {
                status: GuestStatus::Running,
                mounts: Vec::new(),
                exec_log: Vec::new(),
                last_input: None,
                responses: BTreeMap::new(),
                owners: BTreeMap::new(),
            }),
            faults: FaultPlan::default(),
        })
    }

    pub fn fail_on(&self, fault: Fault) {
        self.faults.inject(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    pub fn set_status(&self, status: GuestStatus) {
        if let Ok(mut state) = self.state.lock() {
            state.status = status;
        }
    }

    /// Canned output for every later `exec` of `program`.
    pub fn respond(&self, program: &str, output: ExecOutput) {
        if let Ok(mut state) = self.state.lock() {
            state.responses.insert(program.to_owned(), output);
        }
    }

    pub fn exec_log(&self) -> Vec<Vec<String>> {
        self.state
            .lock()
            .map(|s| s.exec_log.clone())
            .unwrap_or_default()
    }

    /// Commands run so far whose program is `program`.
    pub fn execs_of(&self, program: &str) -> Vec<Vec<String>> {
        self.exec_log()
            .into_iter()
            .filter(|argv| argv.first().is_some_and(|p| p == program))
            .collect()
    }

    pub fn last_input(&self) -> Option<String> {
        self.state.lock().ok().and_then(|s| s.last_input.clone())
    }

    pub fn mounts(&self) -> Vec<BindMount> {
        self.state
            .lock()
            .map(|s| s.mounts.clone())
            .unwrap_or_default()
    }

    /// Ownership and mode last applied to a guest path.
    pub fn owner_of(&self, path: &str) -> Option<(String, String, u32)> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.owners.get(path).cloned())
    }

    /// Host location of a guest path.
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    /// Every entry under the guest root, without following mounts. Symlinked
    /// mount points appear as `path -> source`.
    pub fn tree(&self) -> Vec<String> {
        let mut out = Vec::new();
        walk(&self.root, &self.root, &mut out);
        out.sort();
        out
    }
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let rel = path
            .strip_prefix(root)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match entry.file_type() {
            Ok(t) if t.is_symlink() => {
                let target = fs::read_link(&path).unwrap_or_default();
                out.push(format!("{rel} -> {}", target.display()));
            }
            Ok(t) if t.is_dir() => {
                out.push(format!("{rel}/"));
                walk(root, &path, out);
            }
            _ => out.push(rel),
        }
    }
}

impl Guest for MockGuest {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> Result<GuestStatus, RuntimeError> {
        Ok(lock(&self.state)?.status)
    }

    fn start(&self) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state)?;
        if state.status == GuestStatus::Missing {
            return Err(RuntimeError::GuestMissing(self.id.clone()));
        }
        state.status = GuestStatus::Running;
        Ok(())
    }

    fn bind_mounts(&self) -> Result<Vec<BindMount>, RuntimeError> {
        Ok(lock(&self.state)?.mounts.clone())
    }

    fn add_bind_mount(&self, source: &Path, target: &str) -> Result<BindMount, RuntimeError> {
        self.faults.check(Fault::AddBindMount(target.to_owned()))?;
        let mut state = lock(&self.state)?;
        if let Some(m) = state.mounts.iter().find(|m| m.target == target) {
            return Err(RuntimeError::MountConflict {
                target: target.to_owned(),
                existing: m.source.display().to_string(),
            });
        }
        let slot =
            next_free_slot(&state.mounts).ok_or_else(|| RuntimeError::NoFreeMountSlot(self.id.clone()))?;

        let host = self.host_path(target);
        let already_visible = match (fs::canonicalize(&host), fs::canonicalize(source)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if !already_visible {
            if host.is_dir() {
                // Mounting over a non-empty directory would hide its content.
                fs::remove_dir(&host).map_err(|_| RuntimeError::MountConflict {
                    target: target.to_owned(),
                    existing: host.display().to_string(),
                })?;
            }
            if let Some(parent) = host.parent() {
                fs::create_dir_all(parent)?;
            }
            std::os::unix::fs::symlink(source, &host)?;
        }

        let mount = BindMount {
            slot,
            source: source.to_path_buf(),
            target: target.to_owned(),
        };
        state.mounts.push(mount.clone());
        state.mounts.sort_by_key(|m| m.slot);
        Ok(mount)
    }

    fn remove_bind_mount(&self, target: &str) -> Result<(), RuntimeError> {
        self.faults.check(Fault::RemoveBindMount(target.to_owned()))?;
        let mut state = lock(&self.state)?;
        state.mounts.retain(|m| m.target != target);
        let host = self.host_path(target);
        if fs::symlink_metadata(&host).is_ok_and(|m| m.file_type().is_symlink()) {
            fs::remove_file(&host)?;
        }
        Ok(())
    }

    fn exec(&self, argv: &[&str], input: Option<&str>) -> Result<ExecOutput, RuntimeError> {
        let program = argv.first().copied().unwrap_or_default();
        let mut state = lock(&self.state)?;
        state
            .exec_log
            .push(argv.iter().map(|a| (*a).to_owned()).collect());
        state.last_input = input.map(ToOwned::to_owned);
        if self.faults.armed(&Fault::Exec(program.to_owned())) {
            return Ok(ExecOutput {
                code: 1,
                stdout: String::new(),
                stderr: format!("injected failure in {program}\n"),
            });
        }
        Ok(state.responses.get(program).cloned().unwrap_or_default())
    }

    fn read_file(&self, path: &str) -> Result<Option<String>, RuntimeError> {
        let host = self.host_path(path);
        if !host.is_file() {
            return Ok(None);
        }
        Ok(Some(fs::read_to_string(host)?))
    }

    fn write_file(&self, path: &str, content: &str, _mode: u32) -> Result<(), RuntimeError> {
        self.faults.check(Fault::WriteFile(path.to_owned()))?;
        let host = self.host_path(path);
        let staged = self.host_path(&format!("{path}.lxsmb-new"));
        fs::write(&staged, content)?;
        fs::rename(&staged, host)?;
        Ok(())
    }

    fn copy_file(&self, from: &str, to: &str) -> Result<(), RuntimeError> {
        fs::copy(self.host_path(from), self.host_path(to))?;
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<(), RuntimeError> {
        match fs::remove_file(self.host_path(path)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn list_dir(&self, path: &str) -> Result<Vec<String>, RuntimeError> {
        fs::read_dir(self.host_path(path))?
            .map(|e| -> Result<String, RuntimeError> {
                Ok(e?.file_name().to_string_lossy().into_owned())
            })
            .collect()
    }

    fn is_dir(&self, path: &str) -> Result<bool, RuntimeError> {
        Ok(self.host_path(path).is_dir())
    }

    fn make_dir(&self, path: &str) -> Result<(), RuntimeError> {
        self.faults.check(Fault::MakeDir(path.to_owned()))?;
        fs::create_dir(self.host_path(path))?;
        Ok(())
    }

    fn remove_dir_if_empty(&self, path: &str) -> Result<bool, RuntimeError> {
        self.faults.check(Fault::RemoveDir(path.to_owned()))?;
        match fs::remove_dir(self.host_path(path)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(_) if self.host_path(path).is_dir() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn set_owner_mode(
        &self,
        path: &str,
        owner: &str,
        group: &str,
        mode: u32,
    ) -> Result<(), RuntimeError> {
        self.faults.check(Fault::SetOwner(path.to_owned()))?;
        if !self.host_path(path).exists() {
            return Err(tool_failure(
                "chown",
                1,
                format!("cannot access '{path}': No such file or directory"),
            ));
        }
        lock(&self.state)?.owners.insert(
            path.to_owned(),
            (owner.to_owned(), group.to_owned(), mode),
        );
        Ok(())
    }
}

// --- identity --------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct MockUser {
    primary: String,
    groups: BTreeSet<String>,
    password: Option<String>,
}

#[derive(Debug, Default)]
struct IdentityState {
    users: BTreeMap<String, MockUser>,
    groups: BTreeSet<String>,
}

#[derive(Default)]
pub struct MockIdentity {
    state: Mutex<IdentityState>,
    faults: FaultPlan,
}

impl MockIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, fault: Fault) {
        self.faults.inject(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Seed an account that existed before any provisioning run.
    pub fn add_existing_user(&self, name: &str, primary: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.groups.insert(primary.to_owned());
            state.users.insert(
                name.to_owned(),
                MockUser {
                    primary: primary.to_owned(),
                    groups: BTreeSet::new(),
                    password: None,
                },
            );
        }
    }

    pub fn add_existing_group(&self, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.groups.insert(name.to_owned());
        }
    }

    pub fn users(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.users.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn groups(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.groups.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Users with `group` as a supplementary group.
    pub fn members_of(&self, group: &str) -> Vec<String> {
        self.state
            .lock()
            .map(|s| {
                s.users
                    .iter()
                    .filter(|(_, u)| u.groups.contains(group))
                    .map(|(n, _)| n.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn password_of(&self, user: &str) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.users.get(user).and_then(|u| u.password.clone()))
    }
}

impl IdentityDirectory for MockIdentity {
    fn user_exists(&self, user: &Username) -> Result<bool, RuntimeError> {
        Ok(lock(&self.state)?.users.contains_key(user.as_str()))
    }

    fn create_user(&self, user: &Username, primary_group: &str) -> Result<(), RuntimeError> {
        self.faults.check(Fault::CreateUser(user.to_string()))?;
        let mut state = lock(&self.state)?;
        if state.users.contains_key(user.as_str()) {
            return Err(tool_failure("useradd", 9, format!("user '{user}' already exists")));
        }
        if !state.groups.contains(primary_group) {
            return Err(tool_failure(
                "useradd",
                6,
                format!("group '{primary_group}' does not exist"),
            ));
        }
        state.users.insert(
            user.to_string(),
            MockUser {
                primary: primary_group.to_owned(),
                groups: BTreeSet::new(),
                password: None,
            },
        );
        Ok(())
    }

    fn delete_user(&self, user: &Username) -> Result<(), RuntimeError> {
        self.faults.check(Fault::DeleteUser(user.to_string()))?;
        lock(&self.state)?
            .users
            .remove(user.as_str())
            .map(|_| ())
            .ok_or_else(|| tool_failure("userdel", 6, format!("user '{user}' does not exist")))
    }

    fn group_exists(&self, group: &str) -> Result<bool, RuntimeError> {
        Ok(lock(&self.state)?.groups.contains(group))
    }

    fn create_group(&self, group: &str) -> Result<(), RuntimeError> {
        self.faults.check(Fault::CreateGroup(group.to_owned()))?;
        if !lock(&self.state)?.groups.insert(group.to_owned()) {
            return Err(tool_failure("groupadd", 9, format!("group '{group}' already exists")));
        }
        Ok(())
    }

    fn delete_group(&self, group: &str) -> Result<(), RuntimeError> {
        self.faults.check(Fault::DeleteGroup(group.to_owned()))?;
        let mut state = lock(&self.state)?;
        if let Some((name, _)) = state.users.iter().find(|(_, u)| u.primary == group) {
            return Err(tool_failure(
                "groupdel",
                8,
                format!("cannot remove the primary group of user '{name}'"),
            ));
        }
        if !state.groups.remove(group) {
            return Err(tool_failure("groupdel", 6, format!("group '{group}' does not exist")));
        }
        for u in state.users.values_mut() {
            u.groups.remove(group);
        }
        Ok(())
    }

    fn groups_of(&self, user: &Username) -> Result<Vec<String>, RuntimeError> {
        let state = lock(&self.state)?;
        let entry = state
            .users
            .get(user.as_str())
            .ok_or_else(|| tool_failure("id", 1, format!("'{user}': no such user")))?;
        let mut groups = vec![entry.primary.clone()];
        groups.extend(entry.groups.iter().filter(|g| **g != entry.primary).cloned());
        Ok(groups)
    }

    fn add_to_group(&self, user: &Username, group: &str) -> Result<(), RuntimeError> {
        self.faults.check(Fault::AddToGroup {
            user: user.to_string(),
            group: group.to_owned(),
        })?;
        let mut state = lock(&self.state)?;
        if !state.groups.contains(group) {
            return Err(tool_failure("usermod", 6, format!("group '{group}' does not exist")));
        }
        let entry = state
            .users
            .get_mut(user.as_str())
            .ok_or_else(|| tool_failure("usermod", 6, format!("user '{user}' does not exist")))?;
        entry.groups.insert(group.to_owned());
        Ok(())
    }

    fn remove_from_group(&self, user: &Username, group: &str) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state)?;
        let entry = state
            .users
            .get_mut(user.as_str())
            .ok_or_else(|| tool_failure("gpasswd", 3, format!("user '{user}' does not exist")))?;
        entry.groups.remove(group);
        Ok(())
    }

    fn set_password(&self, user: &Username, secret: &Secret) -> Result<(), RuntimeError> {
        self.faults.check(Fault::SetPassword(user.to_string()))?;
        let mut state = lock(&self.state)?;
        let entry = state
            .users
            .get_mut(user.as_str())
            .ok_or_else(|| tool_failure("smbpasswd", 1, format!("user '{user}' does not exist")))?;
        entry.password = Some(secret.expose().to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ds(name: &str) -> DatasetName {
        DatasetName::parse(name).unwrap()
    }

    fn tag(name: &str) -> SnapshotTag {
        SnapshotTag::parse(name).unwrap()
    }

    fn storage(dir: &Path) -> MockStorage {
        let s = MockStorage::new(dir).unwrap();
        s.add_pool("tank").unwrap();
        s
    }

    #[test]
    fn create_requires_parent_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        assert!(s.create(&ds("tank/samba/homes")).is_err());
        s.create(&ds("tank/samba")).unwrap();
        assert!(s.create(&ds("tank/samba")).is_err());
        s.create(&ds("tank/samba/homes")).unwrap();
        assert!(s.mountpoint(&ds("tank/samba/homes")).unwrap().is_dir());
    }

    #[test]
    fn destroy_is_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        s.create(&ds("tank/samba")).unwrap();
        s.create(&ds("tank/samba/homes")).unwrap();
        s.destroy(&ds("tank/samba")).unwrap();
        assert_eq!(s.datasets(), vec!["tank"]);
        assert!(!dir.path().join("tank/samba").exists());
    }

    #[test]
    fn snapshot_rollback_restores_content_but_not_children() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        s.create(&ds("tank/samba")).unwrap();
        s.create(&ds("tank/samba/homes")).unwrap();
        let base = s.mountpoint(&ds("tank/samba")).unwrap();
        let homes = s.mountpoint(&ds("tank/samba/homes")).unwrap();
        fs::write(base.join("a.txt"), "one").unwrap();
        fs::write(homes.join("h.txt"), "home").unwrap();

        s.snapshot(&[ds("tank/samba")], &tag("t1")).unwrap();
        fs::write(base.join("a.txt"), "two").unwrap();
        fs::write(base.join("b.txt"), "new").unwrap();
        fs::write(homes.join("h.txt"), "changed").unwrap();

        s.rollback(&ds("tank/samba"), &tag("t1")).unwrap();
        assert_eq!(fs::read_to_string(base.join("a.txt")).unwrap(), "one");
        assert!(!base.join("b.txt").exists());
        assert_eq!(fs::read_to_string(homes.join("h.txt")).unwrap(), "changed");
    }

    #[test]
    fn rollback_discards_later_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        s.create(&ds("tank/samba")).unwrap();
        s.snapshot(&[ds("tank/samba")], &tag("t1")).unwrap();
        s.snapshot(&[ds("tank/samba")], &tag("t2")).unwrap();
        s.rollback(&ds("tank/samba"), &tag("t1")).unwrap();
        assert_eq!(s.snapshots(&ds("tank/samba")).unwrap(), vec!["t1"]);
    }

    #[test]
    fn snapshot_is_all_or_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        s.create(&ds("tank/samba")).unwrap();
        let err = s.snapshot(&[ds("tank/samba"), ds("tank/missing")], &tag("t1"));
        assert!(err.is_err());
        assert!(s.snapshots(&ds("tank/samba")).unwrap().is_empty());
    }

    #[test]
    fn injected_fault_fails_only_the_named_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(dir.path());
        s.fail_on(Fault::CreateDataset("tank/b".to_owned()));
        s.create(&ds("tank/a")).unwrap();
        assert!(matches!(
            s.create(&ds("tank/b")).unwrap_err(),
            RuntimeError::Injected(_)
        ));
        s.clear_faults();
        s.create(&ds("tank/b")).unwrap();
    }

    #[test]
    fn bind_mount_links_target_to_source() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(&dir.path().join("host"));
        let g = MockGuest::new("105", dir.path().join("guest")).unwrap();
        s.create(&ds("tank/samba")).unwrap();
        let src = s.mountpoint(&ds("tank/samba")).unwrap();

        let m = g.add_bind_mount(&src, "/srv/samba").unwrap();
        assert_eq!(m.slot, 0);
        g.make_dir("/srv/samba/homes").unwrap();
        assert!(src.join("homes").is_dir());

        assert!(matches!(
            g.add_bind_mount(&src, "/srv/samba").unwrap_err(),
            RuntimeError::MountConflict { .. }
        ));

        g.remove_bind_mount("/srv/samba").unwrap();
        assert!(g.mounts().is_empty());
        assert!(!g.host_path("/srv/samba").exists());
    }

    #[test]
    fn nested_bind_mount_already_visible_is_only_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let s = storage(&dir.path().join("host"));
        let g = MockGuest::new("105", dir.path().join("guest")).unwrap();
        s.create(&ds("tank/samba")).unwrap();
        s.create(&ds("tank/samba/homes")).unwrap();
        g.add_bind_mount(&s.mountpoint(&ds("tank/samba")).unwrap(), "/srv/samba")
            .unwrap();
        let homes = g
            .add_bind_mount(&s.mountpoint(&ds("tank/samba/homes")).unwrap(), "/srv/samba/homes")
            .unwrap();
        assert_eq!(homes.slot, 1);
        g.remove_bind_mount("/srv/samba/homes").unwrap();
        assert!(s.mountpoint(&ds("tank/samba/homes")).unwrap().is_dir());
    }

    #[test]
    fn guest_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let g = MockGuest::new("105", dir.path()).unwrap();
        assert_eq!(g.read_file("/etc/samba/smb.conf").unwrap(), None);
        g.write_file("/etc/samba/smb.conf", "[global]\n", 0o644).unwrap();
        assert_eq!(
            g.read_file("/etc/samba/smb.conf").unwrap().as_deref(),
            Some("[global]\n")
        );
        assert!(g.write_file("/etc/lxsmb/state.conf", "x", 0o600).is_err());

        g.make_dir("/srv/data").unwrap();
        g.write_file("/srv/data/f", "x", 0o644).unwrap();
        assert!(!g.remove_dir_if_empty("/srv/data").unwrap());
        g.remove_file("/srv/data/f").unwrap();
        assert!(g.remove_dir_if_empty("/srv/data").unwrap());
        assert!(!g.remove_dir_if_empty("/srv/data").unwrap());
    }

    #[test]
    fn exec_fault_returns_failing_status() {
        let dir = tempfile::tempdir().unwrap();
        let g = MockGuest::new("105", dir.path()).unwrap();
        g.fail_on(Fault::Exec("testparm".to_owned()));
        let out = g.exec(&["testparm", "-s"], None).unwrap();
        assert_eq!(out.code, 1);
        assert!(g.run(&["testparm", "-s"]).is_err());
        assert!(g.run(&["systemctl", "restart", "smbd"]).is_ok());
        assert_eq!(g.execs_of("testparm").len(), 2);
    }

    #[test]
    fn identity_primary_group_blocks_groupdel() {
        let id = MockIdentity::new();
        let alice = Username::parse("alice").unwrap();
        id.create_group("smbusers").unwrap();
        id.create_user(&alice, "smbusers").unwrap();
        assert!(id.delete_group("smbusers").is_err());
        id.delete_user(&alice).unwrap();
        id.delete_group("smbusers").unwrap();
        assert!(id.groups().is_empty());
    }

    #[test]
    fn identity_membership_and_password() {
        let id = MockIdentity::new();
        let bob = Username::parse("bob").unwrap();
        id.create_group("smbusers").unwrap();
        id.create_group("smbwriters").unwrap();
        id.create_user(&bob, "smbusers").unwrap();
        id.add_to_group(&bob, "smbwriters").unwrap();
        assert_eq!(id.groups_of(&bob).unwrap(), vec!["smbusers", "smbwriters"]);
        assert_eq!(id.members_of("smbwriters"), vec!["bob"]);
        id.set_password(&bob, &Secret::new("pw")).unwrap();
        assert_eq!(id.password_of("bob").as_deref(), Some("pw"));
    }
}
