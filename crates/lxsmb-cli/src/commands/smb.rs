use super::{json_pretty, spin_fail, spin_ok, spinner, Host, EXIT_SUCCESS};
use lxsmb_core::ops::backup;

pub fn backup(host: &Host, json: bool) -> Result<u8, String> {
    host.preflight()?;
    let _lock = host.lock()?;
    let path = host.with_backends(|b| backup::backup(b.guest).map_err(|e| e.to_string()))?;
    if json {
        println!("{}", json_pretty(&serde_json::json!({ "backup": path }))?);
    } else {
        println!("backed up smb.conf to {path}");
    }
    Ok(EXIT_SUCCESS)
}

pub fn list(host: &Host, json: bool) -> Result<u8, String> {
    host.preflight()?;
    let backups = host.with_backends(|b| backup::list(b.guest).map_err(|e| e.to_string()))?;
    if json {
        println!("{}", json_pretty(&backups)?);
    } else if backups.is_empty() {
        println!("no smb.conf backups in container {}", host.ctid);
    } else {
        for path in &backups {
            println!("{path}");
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn restore(host: &Host, file: Option<&str>, json: bool) -> Result<u8, String> {
    host.preflight()?;
    let _lock = host.lock()?;
    let pb = spinner("restoring smb.conf...");
    let restored = match host.with_backends(|b| backup::restore(b, file).map_err(|e| e.to_string())) {
        Ok(r) => {
            spin_ok(&pb, "smb.conf restored");
            r
        }
        Err(e) => {
            spin_fail(&pb, "restore failed");
            return Err(e);
        }
    };
    if json {
        println!("{}", json_pretty(&restored)?);
    } else {
        println!("restored {}", restored.from);
        if let Some(prev) = &restored.previous {
            println!("previous configuration saved as {prev}");
        }
    }
    Ok(EXIT_SUCCESS)
}
