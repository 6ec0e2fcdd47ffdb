//! Samba configuration renderer.
//!
//! Output depends only on the topology and policy, so rendering twice yields
//! identical bytes. No timestamps or host facts are embedded.

use crate::state::Policy;
use crate::topology::{
    AccessPolicy, OptionalShare, Topology, ADMIN_GROUP, USERS_GROUP, WRITERS_GROUP,
};
use crate::types::Username;
use std::fmt::Write as _;

/// Fixed guest path of the service configuration.
pub const SMB_CONF_PATH: &str = "/etc/samba/smb.conf";
/// Discard bin directory name inside each home.
pub const RECYCLE_DIR: &str = ".recycle";

pub fn render_smb_conf(topology: &Topology, policy: &Policy) -> String {
    let mut out = String::new();
    out.push_str("# Generated by lxsmb-setup. Manual edits are overwritten on the next run.\n");
    render_global(&mut out, topology, policy);
    for user in &topology.principals {
        render_home(&mut out, user, policy.recycle);
    }
    for share in &topology.shares {
        render_share(&mut out, *share);
    }
    out
}

fn render_global(out: &mut String, topology: &Topology, policy: &Policy) {
    let guest = topology.shares.contains(&OptionalShare::Guest);
    out.push_str("\n[global]\n");
    param(out, "workgroup", policy.workgroup.as_str());
    param(out, "server string", "lxsmb file server");
    param(out, "server role", "standalone server");
    param(out, "security", "user");
    param(out, "map to guest", if guest { "Bad User" } else { "Never" });
    param(out, "access based share enum", "yes");
    if !policy.allowed_subnets.is_empty() {
        let mut allow = policy
            .allowed_subnets
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        allow.extend(["127.0.0.1".to_owned(), "::1".to_owned()]);
        param(out, "hosts allow", &allow.join(" "));
        // Matches both address families; the allow list takes precedence.
        param(out, "hosts deny", "ALL");
    }
    param(out, "log file", "/var/log/samba/log.%m");
    param(out, "max log size", "1000");
    param(out, "load printers", "no");
    param(out, "printing", "bsd");
    param(out, "printcap name", "/dev/null");
    param(out, "disable spoolss", "yes");
}

fn render_home(out: &mut String, user: &Username, recycle: bool) {
    let _ = write!(out, "\n[{user}]\n");
    param(out, "comment", &format!("Home of {user}"));
    param(out, "path", &Topology::home_path(user));
    param(out, "valid users", user.as_str());
    param(out, "read only", "no");
    param(out, "create mask", "0600");
    param(out, "directory mask", "0700");
    if recycle {
        param(out, "vfs objects", "recycle");
        param(out, "recycle:repository", RECYCLE_DIR);
        param(out, "recycle:keeptree", "yes");
        param(out, "recycle:versions", "yes");
        param(out, "recycle:touch", "yes");
        param(out, "recycle:directory_mode", "0700");
        param(out, "recycle:exclude", "*.tmp,*.temp,~$*");
    }
}

fn render_share(out: &mut String, share: OptionalShare) {
    let _ = write!(out, "\n[{share}]\n");
    param(out, "path", &Topology::share_path(share));
    match share.policy() {
        AccessPolicy::OwnerWriteAllRead => {
            param(out, "comment", "Shared files");
            param(out, "valid users", &format!("@{USERS_GROUP}"));
            param(out, "read only", "no");
            param(out, "force group", USERS_GROUP);
            param(out, "create mask", "0644");
            param(out, "directory mask", "0755");
        }
        AccessPolicy::GroupWriteAllRead => {
            param(out, "comment", "Public files");
            param(out, "valid users", &format!("@{USERS_GROUP}"));
            param(out, "read only", "yes");
            param(out, "write list", &format!("@{WRITERS_GROUP}"));
            param(out, "force group", WRITERS_GROUP);
            param(out, "create mask", "0664");
            param(out, "directory mask", "2775");
        }
        AccessPolicy::GuestReadAdminWrite => {
            param(out, "comment", "Guest access");
            param(out, "guest ok", "yes");
            param(out, "read only", "yes");
            param(out, "write list", &format!("@{ADMIN_GROUP}"));
            param(out, "force group", ADMIN_GROUP);
            param(out, "create mask", "0664");
            param(out, "directory mask", "2775");
        }
    }
}

fn param(out: &mut String, key: &str, value: &str) {
    let _ = writeln!(out, "   {key} = {value}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::LayoutMode;
    use crate::types::{DatasetName, Subnet, Workgroup};

    fn topology(shares: &[OptionalShare], users: &[&str]) -> Topology {
        let mut t = Topology::new(DatasetName::parse("tank/samba").unwrap(), LayoutMode::Unified);
        t.shares.extend(shares.iter().copied());
        for u in users {
            t.enroll(Username::parse(*u).unwrap());
        }
        t
    }

    fn sections(conf: &str) -> Vec<&str> {
        conf.lines()
            .filter(|l| l.starts_with('['))
            .collect()
    }

    #[test]
    fn single_user_without_shares() {
        let conf = render_smb_conf(&topology(&[], &["alice"]), &Policy::default());
        assert_eq!(sections(&conf), vec!["[global]", "[alice]"]);
        assert!(conf.contains("   valid users = alice\n"));
        assert!(conf.contains("   path = /srv/samba/homes/alice\n"));
        assert!(conf.contains("   map to guest = Never\n"));
        assert!(!conf.contains("hosts allow"));
        assert!(!conf.contains("vfs objects"));
    }

    #[test]
    fn empty_topology_renders_only_global() {
        let conf = render_smb_conf(&topology(&[], &[]), &Policy::default());
        assert_eq!(sections(&conf), vec!["[global]"]);
        assert!(conf.contains("workgroup = WORKGROUP"));
    }

    #[test]
    fn home_sections_never_name_siblings() {
        let conf = render_smb_conf(&topology(&[], &["alice", "bob"]), &Policy::default());
        let alice = conf
            .split("\n[")
            .find(|s| s.starts_with("alice]"))
            .unwrap();
        assert!(!alice.contains("bob"));
        let bob = conf.split("\n[").find(|s| s.starts_with("bob]")).unwrap();
        assert!(!bob.contains("alice"));
    }

    #[test]
    fn shares_render_in_fixed_order_with_their_policy() {
        let conf = render_smb_conf(
            &topology(&[OptionalShare::Guest, OptionalShare::Shared, OptionalShare::Public], &[]),
            &Policy::default(),
        );
        assert_eq!(
            sections(&conf),
            vec!["[global]", "[Shared]", "[Public]", "[Guest]"]
        );
        let guest = conf.split("\n[").find(|s| s.starts_with("Guest]")).unwrap();
        assert!(guest.contains("guest ok = yes"));
        assert!(guest.contains("write list = @smbadmin"));
        let public = conf.split("\n[").find(|s| s.starts_with("Public]")).unwrap();
        assert!(public.contains("write list = @smbwriters"));
        assert!(public.contains("read only = yes"));
        assert!(conf.contains("map to guest = Bad User"));
    }

    #[test]
    fn policy_controls_hosts_and_recycle() {
        let policy = Policy {
            workgroup: Workgroup::parse("HOMENET").unwrap(),
            allowed_subnets: vec![Subnet::parse("192.168.1.0/24").unwrap()],
            recycle: true,
            ..Policy::default()
        };
        let conf = render_smb_conf(&topology(&[], &["alice"]), &policy);
        assert!(conf.contains("workgroup = HOMENET"));
        assert!(conf.contains("hosts allow = 192.168.1.0/24 127.0.0.1 ::1\n"));
        assert!(conf.contains("hosts deny = ALL\n"));
        assert!(conf.contains("recycle:repository = .recycle"));
    }

    fn host_lines(subnets: &[&str]) -> Vec<String> {
        let policy = Policy {
            allowed_subnets: subnets.iter().map(|s| Subnet::parse(s).unwrap()).collect(),
            ..Policy::default()
        };
        render_smb_conf(&topology(&[], &["alice"]), &policy)
            .lines()
            .filter(|l| l.trim_start().starts_with("hosts "))
            .map(|l| l.trim().to_owned())
            .collect()
    }

    #[test]
    fn allowed_ranges_deny_every_other_host() {
        assert_eq!(
            host_lines(&["10.0.0.0/8"]),
            ["hosts allow = 10.0.0.0/8 127.0.0.1 ::1", "hosts deny = ALL"]
        );
        assert_eq!(
            host_lines(&["fd00::/64"]),
            ["hosts allow = fd00::/64 127.0.0.1 ::1", "hosts deny = ALL"]
        );
        assert_eq!(
            host_lines(&["192.168.1.0/24", "2001:db8::/32"]),
            [
                "hosts allow = 192.168.1.0/24 2001:db8::/32 127.0.0.1 ::1",
                "hosts deny = ALL"
            ]
        );
        assert!(host_lines(&[]).is_empty());
    }

    #[test]
    fn rendering_is_pure() {
        let t = topology(&OptionalShare::ALL, &["alice", "bob"]);
        let p = Policy {
            recycle: true,
            ..Policy::default()
        };
        assert_eq!(render_smb_conf(&t, &p), render_smb_conf(&t.clone(), &p.clone()));
    }
}
