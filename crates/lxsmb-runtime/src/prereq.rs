use std::fmt;
use std::process::Command;

/// A missing host prerequisite with an install hint.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}; install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Safe wrapper around libc::geteuid().
#[allow(unsafe_code)]
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Host tools both binaries drive. Empty means everything is present.
pub fn check_host_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("zfs") {
        missing.push(MissingPrereq {
            name: "zfs",
            purpose: "dataset, quota and snapshot management",
            install_hint: "apt install zfsutils-linux",
        });
    }

    if !command_exists("pct") {
        missing.push(MissingPrereq {
            name: "pct",
            purpose: "container control and bind mounts",
            install_hint: "run on a Proxmox VE host (pve-container)",
        });
    }

    missing
}

/// One-line diagnostic for a list of missing prerequisites.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    let items: Vec<String> = missing.iter().map(ToString::to_string).collect();
    format!("missing prerequisites: {}", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_prereq_display() {
        let m = MissingPrereq {
            name: "zfs",
            purpose: "datasets",
            install_hint: "apt install zfsutils-linux",
        };
        let s = format!("{m}");
        assert!(s.contains("zfs"));
        assert!(s.contains("datasets"));
        assert!(s.contains("apt install zfsutils-linux"));
    }

    #[test]
    fn format_missing_is_single_line() {
        let items = vec![
            MissingPrereq {
                name: "zfs",
                purpose: "datasets",
                install_hint: "apt install zfsutils-linux",
            },
            MissingPrereq {
                name: "pct",
                purpose: "containers",
                install_hint: "proxmox",
            },
        ];
        let output = format_missing(&items);
        assert!(output.starts_with("missing prerequisites:"));
        assert!(output.contains("zfs"));
        assert!(output.contains("pct"));
        assert!(!output.contains('\n'));
    }
}
