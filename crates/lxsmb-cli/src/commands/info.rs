use super::{colorize_status, json_pretty, Host, EXIT_SUCCESS};
use lxsmb_core::ops::info::{gather, Info, UnitInfo};
use lxsmb_runtime::GuestStatus;
use lxsmb_schema::{Quota, UnitKind};

fn kind_label(unit: &UnitInfo) -> String {
    match &unit.kind {
        UnitKind::Base => "base".to_owned(),
        UnitKind::Homes => "homes".to_owned(),
        UnitKind::Home(user) => format!("home:{user}"),
        UnitKind::Share(share) => format!("share:{share}"),
    }
}

fn print_human(info: &Info) {
    let status = match info.status {
        GuestStatus::Running => "running",
        GuestStatus::Stopped => "stopped",
        GuestStatus::Missing => "missing",
    };
    println!("container:   {}", info.ctid);
    println!("status:      {}", colorize_status(status));
    let Some(state) = &info.state else {
        println!("installed:   no");
        return;
    };
    let topology = &state.topology;
    let policy = &state.policy;
    println!("installed:   yes");
    println!("dataset:     {}", topology.base);
    println!("layout:      {}", topology.layout);
    let shares: Vec<String> = topology.shares.iter().map(ToString::to_string).collect();
    println!(
        "shares:      {}",
        if shares.is_empty() { "(none)".to_owned() } else { shares.join(", ") }
    );
    let users: Vec<String> = topology.principals.iter().map(ToString::to_string).collect();
    println!("users:       {}", users.join(", "));
    println!("workgroup:   {}", policy.workgroup);
    let subnets: Vec<String> = policy.allowed_subnets.iter().map(ToString::to_string).collect();
    println!(
        "allowed:     {}",
        if subnets.is_empty() { "any".to_owned() } else { subnets.join(", ") }
    );
    println!("recycle:     {}", if policy.recycle { "on" } else { "off" });
    if let Some(q) = policy.home_quota {
        println!("home quota:  {q}");
    }
    println!("units:");
    for unit in &info.units {
        let mut flags = Vec::new();
        if !unit.exists {
            flags.push("missing".to_owned());
        } else if !unit.mounted {
            flags.push("unmounted".to_owned());
        }
        if let Some(q) = unit.quota.filter(|q| *q != Quota::None) {
            flags.push(format!("quota {q}"));
        }
        let suffix = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "  {:<14} {} -> {}{suffix}",
            kind_label(unit),
            unit.dataset,
            unit.mount_target
        );
    }
    if info.snapshots.is_empty() {
        println!("snapshots:   (none)");
    } else {
        println!("snapshots:   {}", info.snapshots.join(", "));
    }
}

pub fn run(host: &Host, json: bool) -> Result<u8, String> {
    host.preflight()?;
    let info = host.with_backends(|b| gather(b).map_err(|e| e.to_string()))?;
    if json {
        println!("{}", json_pretty(&info)?);
    } else {
        print_human(&info);
    }
    Ok(EXIT_SUCCESS)
}
