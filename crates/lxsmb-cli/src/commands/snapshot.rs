use super::{json_pretty, Host, EXIT_SUCCESS};
use lxsmb_core::ops::{installed_state, snapshot};
use lxsmb_schema::SnapshotTag;

fn parse_tag(raw: &str) -> Result<SnapshotTag, String> {
    SnapshotTag::parse(raw).map_err(|e| format!("validation error: {e}"))
}

pub fn create(host: &Host, tag: Option<&str>, json: bool) -> Result<u8, String> {
    let tag = tag.map(parse_tag).transpose()?;
    host.preflight()?;
    let _lock = host.lock()?;
    let tag = host.with_backends(|b| {
        let state = installed_state(b.guest).map_err(|e| e.to_string())?;
        snapshot::create(b.storage, &state, tag).map_err(|e| e.to_string())
    })?;
    if json {
        println!("{}", json_pretty(&serde_json::json!({ "tag": tag.as_str() }))?);
    } else {
        println!("created snapshot {tag}");
    }
    Ok(EXIT_SUCCESS)
}

pub fn list(host: &Host, json: bool) -> Result<u8, String> {
    host.preflight()?;
    let tags = host.with_backends(|b| {
        let state = installed_state(b.guest).map_err(|e| e.to_string())?;
        snapshot::list(b.storage, &state).map_err(|e| e.to_string())
    })?;
    if json {
        println!("{}", json_pretty(&tags)?);
    } else if tags.is_empty() {
        println!("no snapshots for container {}", host.ctid);
    } else {
        for cov in &tags {
            if cov.is_complete() {
                println!("{}", cov.tag);
            } else {
                let missing: Vec<String> = cov.missing.iter().map(ToString::to_string).collect();
                println!("{} (partial, missing on {})", cov.tag, missing.join(", "));
            }
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn rollback(host: &Host, tag: &str, json: bool) -> Result<u8, String> {
    let tag = parse_tag(tag)?;
    host.preflight()?;
    let _lock = host.lock()?;
    let units = host.with_backends(|b| {
        let state = installed_state(b.guest).map_err(|e| e.to_string())?;
        snapshot::rollback(b.storage, &state, &tag).map_err(|e| e.to_string())
    })?;
    if json {
        let payload = serde_json::json!({ "tag": tag.as_str(), "rolled_back": units });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("rolled back {} unit(s) to {tag}", units.len());
    }
    Ok(EXIT_SUCCESS)
}

pub fn remove(host: &Host, tag: &str, json: bool) -> Result<u8, String> {
    let tag = parse_tag(tag)?;
    host.preflight()?;
    let _lock = host.lock()?;
    let report = host.with_backends(|b| {
        let state = installed_state(b.guest).map_err(|e| e.to_string())?;
        snapshot::remove(b.storage, &state, &tag).map_err(|e| e.to_string())
    })?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!("removed {tag} from {} unit(s)", report.removed.len());
        for ds in &report.skipped {
            println!("  skipped {ds}: no such snapshot");
        }
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_tag_is_a_validation_error() {
        let err = parse_tag("has space").unwrap_err();
        assert!(err.starts_with("validation error:"));
        assert!(parse_tag("before-upgrade").is_ok());
    }
}
