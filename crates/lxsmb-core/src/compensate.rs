use crate::engine::Backends;
use crate::ledger::{Ledger, ResourceRecord};
use lxsmb_runtime::RuntimeError;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct CompensationReport {
    pub undone: usize,
    /// One line per record whose inverse failed.
    pub failed: Vec<String>,
}

/// Undo every record, newest first. A failing inverse is logged and the walk
/// continues with the next older record; the ledger is consumed either way.
pub fn compensate(ledger: Ledger, backends: &Backends<'_>) -> CompensationReport {
    let mut report = CompensationReport::default();
    if ledger.is_empty() {
        return report;
    }
    info!("rollback: undoing {} change(s)", ledger.len());
    for record in ledger.drain_newest_first() {
        match undo(&record, backends) {
            Ok(()) => {
                debug!("rollback: undid {record}");
                report.undone += 1;
            }
            Err(e) => {
                warn!("rollback: failed to undo {record}: {e}");
                report.failed.push(format!("{record}: {e}"));
            }
        }
    }
    report
}

fn undo(record: &ResourceRecord, b: &Backends<'_>) -> Result<(), RuntimeError> {
    match record {
        ResourceRecord::Volume { dataset } => b.storage.destroy(dataset),
        ResourceRecord::Directory { path } => {
            if !b.guest.remove_dir_if_empty(path)? {
                warn!("rollback: {path} is not empty, left in place");
            }
            Ok(())
        }
        ResourceRecord::BindMount { target, .. } => b.guest.remove_bind_mount(target),
        ResourceRecord::Group { name } => b.identity.delete_group(name),
        ResourceRecord::Principal { name } => b.identity.delete_user(name),
        ResourceRecord::Membership { user, group } => b.identity.remove_from_group(user, group),
        ResourceRecord::QuotaChange { dataset, previous } => {
            b.storage.set_quota(dataset, *previous)
        }
        ResourceRecord::ConfigFile {
            path,
            backup,
            service,
        } => {
            match backup {
                Some(backup) => {
                    b.guest.copy_file(backup, path)?;
                    b.guest.remove_file(backup)?;
                }
                None => b.guest.remove_file(path)?,
            }
            if let Some(service) = service {
                // With no configuration left the daemon is stopped, not restarted.
                let action = if backup.is_some() { "restart" } else { "stop" };
                b.guest.run(&["systemctl", action, service])?;
            }
            Ok(())
        }
    }
}
