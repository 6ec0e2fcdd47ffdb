use super::{json_pretty, parse_ctid, spin_fail, spin_ok, spinner, Host, EXIT_SUCCESS};
use dialoguer::{Confirm, Input, Password, Select};
use lxsmb_core::{
    validate_change, Backends, DeploymentState, Plan, ProvisionReport, Provisioner, StateStore,
};
use lxsmb_runtime::{GuestStatus, Secret};
use lxsmb_schema::{
    parse_answers_file, InstallAnswers, LayoutMode, OptionalShare, PersistedState, UserAnswer,
};
use std::io::{stderr, stdin, IsTerminal};
use std::path::PathBuf;
use tracing::{info, warn};

/// Everything `lxsmb-setup` can be told on the command line.
#[derive(Debug, Clone, Default)]
pub struct SetupArgs {
    pub ctid: Option<String>,
    pub answers: Option<PathBuf>,
    pub dataset: Option<String>,
    pub layout: Option<String>,
    pub shares: Vec<String>,
    pub users: Vec<String>,
    pub workgroup: Option<String>,
    pub allow: Vec<String>,
    pub allow_all: bool,
    pub recycle: Option<bool>,
    pub home_quota: Option<String>,
    pub writers: Vec<String>,
    pub admins: Vec<String>,
    pub enable_shares: Vec<String>,
    pub disable_shares: Vec<String>,
    pub dry_run: bool,
    pub yes: bool,
    pub json: bool,
}

fn is_tty() -> bool {
    stdin().is_terminal() && stderr().is_terminal()
}

fn prompt_err(e: dialoguer::Error) -> String {
    format!("prompt failed: {e}")
}

/// Answers file first, then flags on top of it.
fn merge_answers(args: &SetupArgs) -> Result<InstallAnswers, String> {
    let mut answers = match &args.answers {
        Some(path) => parse_answers_file(path).map_err(|e| e.to_string())?,
        None => InstallAnswers::default(),
    };
    if args.dataset.is_some() {
        answers.dataset.clone_from(&args.dataset);
    }
    if args.layout.is_some() {
        answers.layout.clone_from(&args.layout);
    }
    if !args.shares.is_empty() {
        answers.shares.clone_from(&args.shares);
    }
    for name in &args.users {
        if !answers.users.iter().any(|u| u.name == *name) {
            answers.users.push(UserAnswer {
                name: name.clone(),
                password: None,
            });
        }
    }
    if args.workgroup.is_some() {
        answers.workgroup.clone_from(&args.workgroup);
    }
    if !args.allow.is_empty() {
        answers.allowed_subnets.clone_from(&args.allow);
    }
    if args.recycle.is_some() {
        answers.recycle = args.recycle;
    }
    if args.home_quota.is_some() {
        answers.home_quota.clone_from(&args.home_quota);
    }
    if !args.writers.is_empty() {
        answers.writers.clone_from(&args.writers);
    }
    if !args.admins.is_empty() {
        answers.admins.clone_from(&args.admins);
    }
    Ok(answers)
}

/// Ask for the install values nobody supplied. Only called on a terminal.
fn prompt_install(answers: &mut InstallAnswers) -> Result<(), String> {
    if answers.dataset.is_none() {
        let dataset: String = Input::new()
            .with_prompt("ZFS dataset for the shares (e.g. tank/samba)")
            .interact_text()
            .map_err(prompt_err)?;
        answers.dataset = Some(dataset);
    }
    if answers.layout.is_none() {
        let layouts = [LayoutMode::Unified, LayoutMode::PerUser];
        let idx = Select::new()
            .with_prompt("storage layout")
            .items(&layouts)
            .default(0)
            .interact()
            .map_err(prompt_err)?;
        answers.layout = Some(layouts[idx].to_string());
    }
    if answers.users.is_empty() {
        let users: String = Input::new()
            .with_prompt("users (space-separated)")
            .interact_text()
            .map_err(prompt_err)?;
        answers
            .users
            .extend(users.split_whitespace().map(|name| UserAnswer {
                name: name.to_owned(),
                password: None,
            }));
    }
    if answers.recycle.is_none() {
        let recycle = Confirm::new()
            .with_prompt("keep deleted files in a per-user recycle bin?")
            .default(false)
            .interact()
            .map_err(prompt_err)?;
        answers.recycle = Some(recycle);
    }
    Ok(())
}

fn parse_shares(names: &[String]) -> Result<Vec<OptionalShare>, String> {
    names
        .iter()
        .map(|s| {
            s.parse::<OptionalShare>()
                .map_err(|e| format!("validation error: {e}"))
        })
        .collect()
}

fn apply_toggles(state: &mut PersistedState, args: &SetupArgs) -> Result<(), String> {
    for share in parse_shares(&args.enable_shares)? {
        state.topology.shares.insert(share);
    }
    for share in parse_shares(&args.disable_shares)? {
        if state.topology.shares.remove(&share) {
            info!("disabling {share}: the share stops being exported, its data is kept");
        }
    }
    if args.allow_all {
        state.policy.allowed_subnets.clear();
    }
    state
        .validate()
        .map_err(|e| format!("validation error: {e}"))
}

/// The target state for a run against an uninstalled or installed container.
fn target_state(
    answers: &mut InstallAnswers,
    current: Option<&PersistedState>,
    args: &SetupArgs,
) -> Result<PersistedState, String> {
    let mut state = match current {
        Some(current) => answers.apply_to(current).map_err(|e| e.to_string())?,
        None => {
            if answers.dataset.is_none() && is_tty() {
                prompt_install(answers)?;
            }
            answers.to_state().map_err(|e| e.to_string())?
        }
    };
    apply_toggles(&mut state, args)?;
    if let Some(current) = current {
        validate_change(current, &state).map_err(|e| e.to_string())?;
    }
    Ok(state)
}

/// Passwords from the answers file, then prompts for accounts that do not
/// exist yet. Existing accounts keep their password unless one is given.
fn collect_passwords(
    mut plan: Plan,
    answers: &InstallAnswers,
    backends: &Backends<'_>,
) -> Result<Plan, String> {
    let tty = is_tty();
    for user in plan.state.topology.principals.clone() {
        let given = answers
            .users
            .iter()
            .find(|u| u.name.trim() == user.as_str())
            .and_then(|u| u.password.clone());
        if let Some(pw) = given {
            plan = plan.with_password(user, Secret::new(pw));
            continue;
        }
        if backends
            .identity
            .user_exists(&user)
            .map_err(|e| e.to_string())?
        {
            continue;
        }
        if tty {
            let pw = Password::new()
                .with_prompt(format!("samba password for {user}"))
                .with_confirmation("repeat password", "passwords do not match")
                .interact()
                .map_err(prompt_err)?;
            plan = plan.with_password(user, Secret::new(pw));
        } else {
            warn!("no password for new user {user}; set one later with smbpasswd");
        }
    }
    Ok(plan)
}

fn print_plan(plan: &Plan, mode: &str, json: bool) -> Result<(), String> {
    let units = plan
        .units()
        .map_err(|e| format!("validation error: {e}"))?;
    let config = plan.render_config();
    if json {
        let payload = serde_json::json!({
            "mode": mode,
            "state": plan.state,
            "units": units,
            "directories": plan.state.topology.directories(),
            "smb_conf": config,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(());
    }
    println!("mode:    {mode}");
    println!("dataset: {}", plan.state.topology.base);
    println!("layout:  {}", plan.state.topology.layout);
    println!("units:");
    for unit in &units {
        println!("  {} -> {}", unit.dataset, unit.mount_target);
    }
    let dirs = plan.state.topology.directories();
    if !dirs.is_empty() {
        println!("directories:");
        for d in &dirs {
            println!("  {} {}:{} {:o}", d.path, d.owner, d.group, d.mode);
        }
    }
    println!("smb.conf:");
    print!("{config}");
    Ok(())
}

fn print_report(report: &ProvisionReport, ctid: &str, json: bool) -> Result<(), String> {
    if json {
        println!("{}", json_pretty(report)?);
    } else if report.is_noop() {
        println!("container {ctid} is already up to date");
    } else {
        if report.started_guest {
            println!("started container {ctid}");
        }
        for change in &report.changes {
            println!("  {change}");
        }
        println!("applied {} change(s) to container {ctid}", report.changes.len());
    }
    Ok(())
}

fn confirm(mode: &str, ctid: &str, args: &SetupArgs) -> Result<bool, String> {
    if args.yes || !is_tty() {
        return Ok(true);
    }
    Confirm::new()
        .with_prompt(format!("{mode} samba in container {ctid}?"))
        .default(true)
        .interact()
        .map_err(prompt_err)
}

/// The state record and accounts live inside the guest, so it has to be up
/// before either is read. A dry run never starts it.
fn ensure_running(b: &Backends<'_>, dry_run: bool) -> Result<(), String> {
    let id = b.guest.id();
    match b.guest.status().map_err(|e| e.to_string())? {
        GuestStatus::Running => Ok(()),
        GuestStatus::Missing => Err(format!("precondition failed: container {id} does not exist")),
        GuestStatus::Stopped if dry_run => {
            Err(format!("precondition failed: container {id} is not running"))
        }
        GuestStatus::Stopped => {
            info!("starting container {id}");
            b.guest.start().map_err(|e| e.to_string())
        }
    }
}

/// Dry run with no container: resolve and render from the inputs alone.
fn offline_dry_run(answers: &mut InstallAnswers, args: &SetupArgs) -> Result<u8, String> {
    let state = target_state(answers, None, args)?;
    print_plan(&Plan::new(state), "install", args.json)?;
    Ok(EXIT_SUCCESS)
}

pub fn run(args: &SetupArgs) -> Result<u8, String> {
    let mut answers = merge_answers(args)?;
    if args.dry_run && args.ctid.is_none() {
        return offline_dry_run(&mut answers, args);
    }
    let host = Host::from_env(parse_ctid(args.ctid.as_deref())?);
    host.preflight()?;
    let _lock = if args.dry_run {
        None
    } else {
        Some(host.lock()?)
    };

    host.with_backends(|b| {
        ensure_running(b, args.dry_run)?;
        let deployed =
            DeploymentState::detect(&StateStore::new(b.guest)).map_err(|e| e.to_string())?;
        let (mode, current) = match &deployed {
            DeploymentState::Installed(state) => ("manage", Some(state)),
            DeploymentState::Uninstalled => ("install", None),
        };
        let state = target_state(&mut answers, current, args)?;
        if args.dry_run {
            print_plan(&Plan::new(state), mode, args.json)?;
            return Ok(EXIT_SUCCESS);
        }
        let plan = collect_passwords(Plan::new(state), &answers, b)?;
        if !confirm(mode, &host.ctid, args)? {
            println!("aborted");
            return Ok(EXIT_SUCCESS);
        }

        let pb = spinner(&format!("provisioning container {}...", host.ctid));
        match Provisioner::new(*b).run(&plan) {
            Ok(report) => {
                spin_ok(&pb, "provisioning complete");
                print_report(&report, &host.ctid, args.json)?;
                Ok(EXIT_SUCCESS)
            }
            Err(e) => {
                spin_fail(&pb, "provisioning failed, changes rolled back");
                Err(e.to_string())
            }
        }
    })
}
