use clap::{Parser, Subcommand};
use clap_complete::Shell;
use lxsmb_cli::commands::{self, parse_ctid, Host};
use lxsmb_cli::{finish, init_logging, install_panic_hook};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "lxsmb",
    version,
    about = "Day-to-day operations for a Samba deployment in a Proxmox container"
)]
struct Cli {
    /// Proxmox container id.
    #[arg(long, env = "LXSMB_CTID", global = true)]
    ctid: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show container status, settings, storage units and snapshots.
    Info,
    /// Back up and restore smb.conf.
    Smb {
        #[command(subcommand)]
        action: SmbAction,
    },
    /// Snapshot every storage unit under one tag.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
    /// Empty the per-user recycle bins, now or on a timer.
    Recycle {
        #[command(subcommand)]
        action: RecycleAction,
    },
    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages.
    ManPages {
        /// Output directory.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum SmbAction {
    /// Copy the live smb.conf to a timestamped backup.
    Backup,
    /// List smb.conf backups, newest first.
    List,
    /// Make a backup live again and restart smbd.
    Restore {
        /// Backup to restore (path or file name); the newest when omitted.
        file: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum SnapshotAction {
    /// Snapshot every unit in one atomic call.
    Create {
        /// Snapshot name; defaults to lxsmb-YYYYmmdd-HHMMSS.
        #[arg(long)]
        tag: Option<String>,
    },
    /// List tags and which units carry them.
    List,
    /// Revert every unit to a tag. Later snapshots are destroyed.
    Rollback { tag: String },
    /// Destroy a tag on every unit that carries it.
    Remove { tag: String },
}

#[derive(Debug, Subcommand)]
enum RecycleAction {
    /// Empty every recycle bin now.
    Flush,
    /// Install a systemd timer that flushes the bins periodically.
    Timer {
        /// hourly, daily, weekly, monthly, <n>h or <n>d.
        interval: String,
    },
    /// Disable and remove the flush timer.
    Off,
}

fn dispatch(cli: Cli) -> Result<u8, String> {
    let json = cli.json;
    let host = || parse_ctid(cli.ctid.as_deref()).map(Host::from_env);
    match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell, "lxsmb"),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir, "lxsmb"),
        Commands::Info => commands::info::run(&host()?, json),
        Commands::Smb { action } => match action {
            SmbAction::Backup => commands::smb::backup(&host()?, json),
            SmbAction::List => commands::smb::list(&host()?, json),
            SmbAction::Restore { file } => commands::smb::restore(&host()?, file.as_deref(), json),
        },
        Commands::Snapshot { action } => match action {
            SnapshotAction::Create { tag } => {
                commands::snapshot::create(&host()?, tag.as_deref(), json)
            }
            SnapshotAction::List => commands::snapshot::list(&host()?, json),
            SnapshotAction::Rollback { tag } => commands::snapshot::rollback(&host()?, &tag, json),
            SnapshotAction::Remove { tag } => commands::snapshot::remove(&host()?, &tag, json),
        },
        Commands::Recycle { action } => match action {
            RecycleAction::Flush => commands::recycle::flush(&host()?, json),
            RecycleAction::Timer { interval } => {
                commands::recycle::timer(&host()?, &interval, json)
            }
            RecycleAction::Off => commands::recycle::off(&host()?, json),
        },
    }
}

fn main() -> ExitCode {
    install_panic_hook();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.trace);
    finish(dispatch(cli))
}
