use std::{fmt, path::Path};

use crate::{
    errors::{DeployError, Result},
    host::Host,
    model::CodeName,
    paths, systemd, teardown,
};

/// Snapshot of one managed application as the host sees it right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStatus {
    pub code_name: CodeName,
    pub user: bool,
    pub unit_installed: bool,
    pub unit_enabled: bool,
    pub unit_active: bool,
    pub site_enabled: bool,
    /// A journal from an unfinished run is waiting for `rollback`.
    pub pending_rollback: bool,
}

impl AppStatus {
    pub fn healthy(&self) -> bool {
        self.user && self.unit_active && self.unit_enabled && self.site_enabled && !self.pending_rollback
    }
}

fn mark(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "application    {}", self.code_name)?;
        writeln!(f, "system user    {}", mark(self.user))?;
        writeln!(f, "unit installed {}", mark(self.unit_installed))?;
        writeln!(f, "unit enabled   {}", mark(self.unit_enabled))?;
        writeln!(f, "unit active    {}", mark(self.unit_active))?;
        writeln!(f, "site enabled   {}", mark(self.site_enabled))?;
        write!(f, "pending run    {}", mark(self.pending_rollback))
    }
}

pub fn status(host: &dyn Host, code: &CodeName, journal: &Path) -> Result<AppStatus> {
    let pending_rollback = journal.exists();
    if !pending_rollback && !teardown::has_trace(host, code)? {
        return Err(DeployError::UnknownApplication(code.to_string()));
    }
    let unit = paths::unit_name(code);
    Ok(AppStatus {
        code_name: code.clone(),
        user: host.user_exists(code.as_str())?,
        unit_installed: host.exists(&paths::unit_path(code)),
        unit_enabled: host.run(&systemd::is_enabled(&unit))?.success(),
        unit_active: host.run(&systemd::is_active(&unit))?.success(),
        site_enabled: host.exists(&paths::site_link(code)),
        pending_rollback,
    })
}
