use super::{json_pretty, Host, EXIT_SUCCESS};
use lxsmb_core::ops::installed_state;
use lxsmb_core::ops::recycle::{
    activate_timer, deactivate_timer, flush as flush_bins, plan_timer, reload_systemd,
    remove_timer, timer_name, write_timer, TimerInterval,
};
use tracing::warn;

pub fn flush(host: &Host, json: bool) -> Result<u8, String> {
    host.preflight()?;
    let report = host.with_backends(|b| {
        let state = installed_state(b.guest).map_err(|e| e.to_string())?;
        flush_bins(b.storage, &state).map_err(|e| e.to_string())
    })?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "flushed {} bin(s), {} entr{} removed",
            report.bins.len(),
            report.removed,
            if report.removed == 1 { "y" } else { "ies" }
        );
        for path in &report.skipped {
            println!("  skipped {}: not a directory", path.display());
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn timer(host: &Host, interval: &str, json: bool) -> Result<u8, String> {
    let interval = TimerInterval::parse(interval).map_err(|e| format!("validation error: {e}"))?;
    host.preflight()?;
    let _lock = host.lock()?;
    host.with_backends(|b| installed_state(b.guest).map(drop).map_err(|e| e.to_string()))?;

    let exe = std::env::current_exe().map_err(|e| format!("cannot locate lxsmb binary: {e}"))?;
    let units = plan_timer(&host.ctid, interval, &exe);
    let paths = write_timer(&host.systemd_dir, &units).map_err(|e| e.to_string())?;
    if let Err(e) = activate_timer(&units.name) {
        warn!("activating {}.timer failed, removing unit files", units.name);
        if let Err(cleanup) = remove_timer(&host.systemd_dir, &host.ctid) {
            warn!("removing unit files: {cleanup}");
        }
        return Err(e.to_string());
    }

    if json {
        let payload = serde_json::json!({
            "timer": format!("{}.timer", units.name),
            "interval": interval.to_string(),
            "files": paths,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}.timer enabled ({interval})", units.name);
    }
    Ok(EXIT_SUCCESS)
}

pub fn off(host: &Host, json: bool) -> Result<u8, String> {
    host.preflight()?;
    let _lock = host.lock()?;
    let name = timer_name(&host.ctid);
    deactivate_timer(&name);
    let removed = remove_timer(&host.systemd_dir, &host.ctid).map_err(|e| e.to_string())?;
    if removed {
        reload_systemd().map_err(|e| e.to_string())?;
    }
    if json {
        let payload = serde_json::json!({ "timer": format!("{name}.timer"), "removed": removed });
        println!("{}", json_pretty(&payload)?);
    } else if removed {
        println!("{name}.timer disabled and removed");
    } else {
        println!("no recycle timer for container {}", host.ctid);
    }
    Ok(EXIT_SUCCESS)
}
