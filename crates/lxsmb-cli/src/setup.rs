use clap::Parser;
use clap_complete::Shell;
use lxsmb_cli::commands::setup::{run, SetupArgs};
use lxsmb_cli::commands::{completions, man_pages};
use lxsmb_cli::{finish, init_logging, install_panic_hook};
use lxsmb_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

/// Install Samba storage into a Proxmox container, or change an existing
/// deployment. The container's state record decides which.
#[derive(Debug, Parser)]
#[command(name = "lxsmb-setup", version)]
struct Cli {
    /// Proxmox container id.
    #[arg(long, env = "LXSMB_CTID")]
    ctid: Option<String>,

    /// TOML answers file; command-line flags override it.
    #[arg(long, value_name = "FILE")]
    answers: Option<PathBuf>,

    /// Base ZFS dataset (install only).
    #[arg(long)]
    dataset: Option<String>,

    /// unified or per-user (install only).
    #[arg(long)]
    layout: Option<String>,

    /// Optional share to export: Shared, Public or Guest. Replaces the set.
    #[arg(long = "share", value_name = "SHARE")]
    shares: Vec<String>,

    /// User to enroll. Users are never removed.
    #[arg(long = "user", value_name = "NAME")]
    users: Vec<String>,

    #[arg(long)]
    workgroup: Option<String>,

    /// Network allowed to connect (CIDR or address). Replaces the list.
    #[arg(long = "allow", value_name = "CIDR")]
    allow: Vec<String>,

    /// Allow every network.
    #[arg(long, conflicts_with = "allow")]
    allow_all: bool,

    /// Keep deleted files in per-user recycle bins.
    #[arg(long, overrides_with = "no_recycle")]
    recycle: bool,

    #[arg(long, overrides_with = "recycle")]
    no_recycle: bool,

    /// Quota for every home (per-user layout), e.g. 50G or none.
    #[arg(long, value_name = "SIZE")]
    home_quota: Option<String>,

    /// Member of the writers group (Public share).
    #[arg(long = "writer", value_name = "NAME")]
    writers: Vec<String>,

    /// Member of the admin group (Guest share).
    #[arg(long = "admin", value_name = "NAME")]
    admins: Vec<String>,

    /// Start exporting a share, keeping the others.
    #[arg(long = "enable-share", value_name = "SHARE")]
    enable_shares: Vec<String>,

    /// Stop exporting a share. Its dataset and data are kept.
    #[arg(long = "disable-share", value_name = "SHARE")]
    disable_shares: Vec<String>,

    /// Print the units and smb.conf that would be applied, change nothing.
    #[arg(long)]
    dry_run: bool,

    /// Do not ask for confirmation.
    #[arg(short, long)]
    yes: bool,

    /// Output results as structured JSON.
    #[arg(long)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long)]
    trace: bool,

    /// Print shell completions and exit.
    #[arg(long, value_name = "SHELL")]
    completions: Option<Shell>,

    /// Write man pages into DIR and exit.
    #[arg(long, value_name = "DIR")]
    man_pages: Option<PathBuf>,
}

impl Cli {
    fn recycle(&self) -> Option<bool> {
        if self.recycle {
            Some(true)
        } else if self.no_recycle {
            Some(false)
        } else {
            None
        }
    }

    fn into_args(self) -> SetupArgs {
        SetupArgs {
            recycle: self.recycle(),
            ctid: self.ctid,
            answers: self.answers,
            dataset: self.dataset,
            layout: self.layout,
            shares: self.shares,
            users: self.users,
            workgroup: self.workgroup,
            allow: self.allow,
            allow_all: self.allow_all,
            home_quota: self.home_quota,
            writers: self.writers,
            admins: self.admins,
            enable_shares: self.enable_shares,
            disable_shares: self.disable_shares,
            dry_run: self.dry_run,
            yes: self.yes,
            json: self.json,
        }
    }
}

fn main() -> ExitCode {
    install_panic_hook();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.trace);
    if let Some(shell) = cli.completions {
        return finish(completions::run::<Cli>(shell, "lxsmb-setup"));
    }
    if let Some(dir) = &cli.man_pages {
        return finish(man_pages::run::<Cli>(dir, "lxsmb-setup"));
    }
    install_signal_handler();
    finish(run(&cli.into_args()))
}
