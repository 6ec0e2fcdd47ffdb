pub mod completions;
pub mod info;
pub mod man_pages;
pub mod recycle;
pub mod setup;
pub mod smb;
pub mod snapshot;

use indicatif::{ProgressBar, ProgressStyle};
use lxsmb_core::concurrency::DEFAULT_RUN_DIR;
use lxsmb_core::ops::recycle::DEFAULT_SYSTEMD_DIR;
use lxsmb_core::{Backends, OperatorLock};
use lxsmb_runtime::{check_host_prereqs, format_missing, is_root, GuestIdentity, PctGuest, ZfsBackend};
use std::io::{stderr, IsTerminal};
use std::path::PathBuf;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_VALIDATION: u8 = 2;
pub const EXIT_STALE_STATE: u8 = 3;
pub const EXIT_PRECONDITION: u8 = 4;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// A spinner on stderr, hidden when stderr is not a terminal.
pub fn spinner(msg: &str) -> ProgressBar {
    if !stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "running" => Style::new().green().apply_to(status).to_string(),
        "stopped" => Style::new().yellow().apply_to(status).to_string(),
        "missing" => Style::new().red().bold().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

/// Proxmox container ids are plain decimal numbers.
pub fn parse_ctid(raw: Option<&str>) -> Result<String, String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Err("validation error: no container selected, pass --ctid or set LXSMB_CTID".to_owned());
    };
    if raw.len() > 9 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("validation error: invalid container id '{raw}'"));
    }
    Ok(raw.to_owned())
}

fn env_path(var: &str, default: &str) -> PathBuf {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(default), PathBuf::from)
}

/// Host-side context of one invocation against one container.
#[derive(Debug, Clone)]
pub struct Host {
    pub ctid: String,
    pub run_dir: PathBuf,
    pub systemd_dir: PathBuf,
}

impl Host {
    pub fn from_env(ctid: String) -> Self {
        Self {
            ctid,
            run_dir: env_path("LXSMB_RUN_DIR", DEFAULT_RUN_DIR),
            systemd_dir: env_path("LXSMB_SYSTEMD_DIR", DEFAULT_SYSTEMD_DIR),
        }
    }

    /// Root and the host tools, unless `LXSMB_SKIP_PREREQS=1`.
    pub fn preflight(&self) -> Result<(), String> {
        if std::env::var("LXSMB_SKIP_PREREQS").as_deref() == Ok("1") {
            return Ok(());
        }
        if !is_root() {
            return Err("precondition failed: must run as root on the Proxmox host".to_owned());
        }
        let missing = check_host_prereqs();
        if !missing.is_empty() {
            return Err(format!("precondition failed: {}", format_missing(&missing)));
        }
        Ok(())
    }

    pub fn lock(&self) -> Result<OperatorLock, String> {
        OperatorLock::acquire(&self.run_dir, &self.ctid).map_err(|e| e.to_string())
    }

    /// Run `f` against the real ZFS pool and container.
    pub fn with_backends<T>(
        &self,
        f: impl FnOnce(&Backends<'_>) -> Result<T, String>,
    ) -> Result<T, String> {
        let storage = ZfsBackend::new();
        let guest = PctGuest::new(self.ctid.clone());
        let identity = GuestIdentity::new(&guest);
        f(&Backends {
            storage: &storage,
            guest: &guest,
            identity: &identity,
        })
    }
}
