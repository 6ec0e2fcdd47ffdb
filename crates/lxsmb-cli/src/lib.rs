//! Command handlers shared by the `lxsmb-setup` and `lxsmb` binaries.
//!
//! Handlers return `Result<u8, String>`: the exit code on success, or a
//! diagnostic whose prefix selects the exit code (see [`exit_code_for`]).

pub mod commands;

use commands::{EXIT_FAILURE, EXIT_PRECONDITION, EXIT_STALE_STATE, EXIT_VALIDATION};
use std::process::ExitCode;

/// Exit quietly when stdout is closed early (`lxsmb info | head`).
pub fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));
}

/// `LXSMB_LOG` wins; otherwise warn, debug with `--verbose`, trace with `--trace`.
pub fn init_logging(verbose: bool, trace: bool) {
    let default_level = if trace {
        "trace"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("LXSMB_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("validation error:") || msg.starts_with("failed to parse answers file") {
        EXIT_VALIDATION
    } else if msg.starts_with("stale state:") {
        EXIT_STALE_STATE
    } else if msg.starts_with("precondition failed:") {
        EXIT_PRECONDITION
    } else {
        EXIT_FAILURE
    }
}

/// Print the diagnostic on one line and pick the exit code.
pub fn finish(result: Result<u8, String>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            let line = msg.split_whitespace().collect::<Vec<_>>().join(" ");
            eprintln!("error: {line}");
            ExitCode::from(exit_code_for(&line))
        }
    }
}
