use crate::compensate::compensate;
use crate::concurrency::shutdown_requested;
use crate::ledger::Ledger;
use crate::provision;
use crate::CoreError;
use lxsmb_runtime::{Guest, GuestStatus, IdentityDirectory, RuntimeError, Secret, StorageBackend};
use lxsmb_schema::{render_smb_conf, resolve, LogicalUnit, PersistedState, Username, ValidationError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

/// The three collaborators every operation talks to.
#[derive(Clone, Copy)]
pub struct Backends<'a> {
    pub storage: &'a dyn StorageBackend,
    pub guest: &'a dyn Guest,
    pub identity: &'a dyn IdentityDirectory,
}

/// Provisioning steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Groups,
    Principals,
    Volumes,
    Mounts,
    Directories,
    Ownership,
    Config,
    State,
}

impl Step {
    pub const ALL: [Step; 8] = [
        Step::Groups,
        Step::Principals,
        Step::Volumes,
        Step::Mounts,
        Step::Directories,
        Step::Ownership,
        Step::Config,
        Step::State,
    ];
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Groups => "groups",
            Step::Principals => "principals",
            Step::Volumes => "volumes",
            Step::Mounts => "mounts",
            Step::Directories => "directories",
            Step::Ownership => "ownership",
            Step::Config => "config",
            Step::State => "state",
        };
        f.write_str(name)
    }
}

/// Target state of one run plus the passwords to set on the way.
#[derive(Debug, Clone)]
pub struct Plan {
    pub state: PersistedState,
    pub passwords: BTreeMap<Username, Secret>,
}

impl Plan {
    pub fn new(state: PersistedState) -> Self {
        Self {
            state,
            passwords: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_password(mut self, user: Username, secret: Secret) -> Self {
        self.passwords.insert(user, secret);
        self
    }

    pub fn units(&self) -> Result<Vec<LogicalUnit>, ValidationError> {
        resolve(&self.state.topology)
    }

    pub fn render_config(&self) -> String {
        render_smb_conf(&self.state.topology, &self.state.policy)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProvisionReport {
    pub started_guest: bool,
    /// Every recorded change, oldest first.
    pub changes: Vec<String>,
    pub config_changed: bool,
    pub state_changed: bool,
}

impl ProvisionReport {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Runs one plan to completion or unwinds everything it did.
///
/// A provisioner is single-use: `run` consumes it together with its ledger,
/// so a ledger is never replayed or reused after a failure.
pub struct Provisioner<'a> {
    backends: Backends<'a>,
    ledger: Ledger,
    cancel: Box<dyn Fn() -> bool + 'a>,
}

impl<'a> Provisioner<'a> {
    pub fn new(backends: Backends<'a>) -> Self {
        Self {
            backends,
            ledger: Ledger::new(),
            cancel: Box::new(shutdown_requested),
        }
    }

    /// Replace the cancellation check consulted between steps.
    #[must_use]
    pub fn cancel_when(mut self, check: impl Fn() -> bool + 'a) -> Self {
        self.cancel = Box::new(check);
        self
    }

    pub fn run(mut self, plan: &Plan) -> Result<ProvisionReport, CoreError> {
        plan.state.validate()?;
        let units = plan.units()?;
        let mut report = ProvisionReport {
            started_guest: prepare_guest(self.backends.guest)?,
            ..ProvisionReport::default()
        };

        info!(
            "provisioning {} unit(s) for container {}",
            units.len(),
            self.backends.guest.id()
        );
        for step in Step::ALL {
            if (self.cancel)() {
                return Err(self.unwind(CoreError::Interrupted(step)));
            }
            info!("step: {step}");
            if let Err(source) = self.execute(step, plan, &units, &mut report) {
                return Err(self.unwind(CoreError::Step { step, source }));
            }
        }

        report.changes = self.ledger.records().iter().map(ToString::to_string).collect();
        if report.is_noop() {
            info!("deployment already up to date");
        } else {
            info!("applied {} change(s)", report.changes.len());
        }
        Ok(report)
    }

    fn execute(
        &mut self,
        step: Step,
        plan: &Plan,
        units: &[LogicalUnit],
        report: &mut ProvisionReport,
    ) -> Result<(), RuntimeError> {
        let b = &self.backends;
        let ledger = &mut self.ledger;
        let topology = &plan.state.topology;
        match step {
            Step::Groups => provision::ensure_groups(b, topology, ledger),
            Step::Principals => provision::ensure_principals(b, plan, ledger),
            Step::Volumes => provision::ensure_volumes(b, &plan.state, units, ledger),
            Step::Mounts => provision::ensure_mounts(b, units, ledger),
            Step::Directories => provision::ensure_directories(b, topology, ledger),
            Step::Ownership => provision::apply_ownership(b, topology, units),
            Step::Config => {
                report.config_changed = provision::apply_config(b, &plan.state, ledger)?;
                Ok(())
            }
            Step::State => {
                report.state_changed = provision::persist_state(b, &plan.state, ledger)?;
                Ok(())
            }
        }
    }

    /// Compensate everything recorded so far and hand back the original error.
    fn unwind(self, error: CoreError) -> CoreError {
        warn!("{error}; rolling back {} recorded change(s)", self.ledger.len());
        let report = compensate(self.ledger, &self.backends);
        if !report.failed.is_empty() {
            warn!(
                "rollback incomplete: {} of {} change(s) could not be undone",
                report.failed.len(),
                report.failed.len() + report.undone
            );
        }
        error
    }
}

/// Container must exist and have Samba installed; a stopped one is started.
/// Returns whether it had to be started.
fn prepare_guest(guest: &dyn Guest) -> Result<bool, CoreError> {
    let started = match guest.status()? {
        GuestStatus::Missing => {
            return Err(CoreError::Precondition(format!(
                "container {} does not exist",
                guest.id()
            )))
        }
        GuestStatus::Stopped => {
            info!("starting container {}", guest.id());
            guest.start()?;
            true
        }
        GuestStatus::Running => false,
    };
    if !guest.is_dir("/etc/samba")? {
        return Err(CoreError::Precondition(format!(
            "samba is not installed in container {}",
            guest.id()
        )));
    }
    Ok(started)
}
