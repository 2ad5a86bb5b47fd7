//! Reverse-order undo of everything a run created.
//!
//! Teardown never fails: an inverse action that does not succeed becomes a
//! [`PartialTeardownWarning`] and the remaining entries are still processed.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::{
    errors::{DeployError, PartialTeardownWarning, Result},
    host::{Host, Invocation},
    ledger::{ProvisionedResource, ResourceKind, ResourceLog},
    model::CodeName,
    nginx, paths, systemd,
};

#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Entries in the order they were undone.
    pub undone: Vec<ProvisionedResource>,
    pub warnings: Vec<PartialTeardownWarning>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    fn warn(&mut self, entry: &ProvisionedResource, err: impl ToString) {
        let warning = PartialTeardownWarning {
            kind: entry.kind.to_string(),
            identifier: entry.identifier.clone(),
            message: err.to_string(),
        };
        warn!(kind = %entry.kind, identifier = %entry.identifier, error = %warning.message, "teardown step failed");
        self.warnings.push(warning);
    }
}

/// Drains `log` newest-first, applying the inverse of every entry. The
/// journal, if any, shrinks with each undone step; entries whose inverse
/// failed stay in it for `rollback` to retry.
pub fn teardown(host: &dyn Host, log: &mut ResourceLog) -> TeardownReport {
    let mut report = TeardownReport::default();
    if log.is_empty() {
        return report;
    }
    info!(entries = log.len(), "tearing down");

    while let Some(entry) = log.pop() {
        info!(kind = %entry.kind, identifier = %entry.identifier, "undoing");
        let undone = match undo(host, &entry) {
            Ok(()) => true,
            Err(err) => {
                report.warn(&entry, err);
                log.retain(entry.clone());
                false
            }
        };
        if let Err(err) = log.sync() {
            report.warn(&entry, err);
        }
        if undone {
            report.undone.push(entry);
        }
    }
    report
}

fn undo(host: &dyn Host, entry: &ProvisionedResource) -> Result<()> {
    let id = entry.identifier.as_str();
    match entry.kind {
        ResourceKind::UnitStarted => {
            host.run_checked(&systemd::stop(id))?;
        }
        ResourceKind::UnitEnabled => {
            host.run_checked(&systemd::disable(id))?;
        }
        ResourceKind::UnitFileWritten => {
            host.remove_file(Path::new(id))?;
            host.run_checked(&systemd::daemon_reload())?;
        }
        ResourceKind::ProxyReloaded => {
            let code = CodeName::try_from(id)?;
            host.remove_file(&paths::nginx_access_log(&code))?;
            host.remove_file(&paths::nginx_error_log(&code))?;
        }
        ResourceKind::SiteEnabled => {
            host.remove_file(Path::new(id))?;
            nginx::test_and_reload(host)?;
        }
        ResourceKind::SiteWritten => {
            host.remove_file(Path::new(id))?;
        }
        ResourceKind::LogDirectoryCreated
        | ResourceKind::DependenciesInstalled
        | ResourceKind::RepositoryCloned
        | ResourceKind::DirectoryCreated => {
            host.remove_dir_all(Path::new(id))?;
        }
        ResourceKind::UserCreated => {
            host.run_checked(&Invocation::new("userdel").arg(id))?;
        }
    }
    Ok(())
}

/// What a fully provisioned application looks like, in creation order.
/// Everything below the home directory goes with it, so the checkout and
/// toolchains need no entries of their own.
pub fn full_inventory(code: &CodeName) -> Vec<(ResourceKind, String)> {
    let path = |p: PathBuf| p.display().to_string();
    let unit = paths::unit_name(code);
    vec![
        (ResourceKind::UserCreated, code.to_string()),
        (ResourceKind::DirectoryCreated, path(paths::home_dir(code))),
        (ResourceKind::LogDirectoryCreated, path(paths::log_dir(code))),
        (ResourceKind::UnitFileWritten, path(paths::unit_path(code))),
        (ResourceKind::UnitEnabled, unit.clone()),
        (ResourceKind::UnitStarted, unit),
        (ResourceKind::SiteWritten, path(paths::site_path(code))),
        (ResourceKind::SiteEnabled, path(paths::site_link(code))),
        (ResourceKind::ProxyReloaded, code.to_string()),
    ]
}

/// Whether anything belonging to `code` is present on the host.
pub fn has_trace(host: &dyn Host, code: &CodeName) -> Result<bool> {
    if host.user_exists(code.as_str())? {
        return Ok(true);
    }
    let found = [
        paths::unit_path(code),
        paths::site_path(code),
        paths::site_link(code),
        paths::home_dir(code),
    ]
    .iter()
    .any(|p| host.exists(p));
    Ok(found)
}

/// Removes an installed application, assuming every resource exists.
/// Missing pieces show up as warnings. A leftover journal is deleted.
pub fn uninstall(host: &dyn Host, code: &CodeName, journal: &Path) -> Result<TeardownReport> {
    if !has_trace(host, code)? {
        return Err(DeployError::UnknownApplication(code.to_string()));
    }
    info!(code_name = %code, "uninstalling");

    let mut log = ResourceLog::in_memory();
    for (kind, identifier) in full_inventory(code) {
        log.record(kind, identifier)?;
    }
    let mut report = teardown(host, &mut log);

    match std::fs::remove_file(journal) {
        Ok(()) => info!(journal = %journal.display(), "removed stale journal"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => report.warnings.push(PartialTeardownWarning {
            kind: "journal".into(),
            identifier: journal.display().to_string(),
            message: err.to_string(),
        }),
    }
    Ok(report)
}

/// Undoes whatever an interrupted or crashed run recorded in its journal.
pub fn rollback(host: &dyn Host, journal: &Path) -> Result<TeardownReport> {
    if !journal.exists() {
        return Err(DeployError::NoJournal(journal.to_path_buf()));
    }
    let mut log = ResourceLog::load(journal)?;
    info!(journal = %journal.display(), entries = log.len(), "rolling back recorded run");
    Ok(teardown(host, &mut log))
}
