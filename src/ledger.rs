//! Ordered record of every host mutation applied during a run.
//!
//! The log is the only input teardown needs. Entries are appended after a
//! step succeeds and before the next one begins; with a journal configured
//! each append is flushed to disk so a crashed run can be rolled back later.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    errors::{DeployError, Result},
    util,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    UserCreated,
    DirectoryCreated,
    RepositoryCloned,
    DependenciesInstalled,
    LogDirectoryCreated,
    UnitFileWritten,
    UnitEnabled,
    UnitStarted,
    SiteWritten,
    SiteEnabled,
    ProxyReloaded,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceKind::UserCreated => "user",
            ResourceKind::DirectoryCreated => "directory",
            ResourceKind::RepositoryCloned => "repository",
            ResourceKind::DependenciesInstalled => "dependencies",
            ResourceKind::LogDirectoryCreated => "log directory",
            ResourceKind::UnitFileWritten => "unit file",
            ResourceKind::UnitEnabled => "enabled unit",
            ResourceKind::UnitStarted => "started unit",
            ResourceKind::SiteWritten => "site file",
            ResourceKind::SiteEnabled => "enabled site",
            ResourceKind::ProxyReloaded => "proxy reload",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    pub kind: ResourceKind,
    pub identifier: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Journal {
    operator: String,
    entries: Vec<ProvisionedResource>,
}

#[derive(Debug, Default)]
pub struct ResourceLog {
    entries: Vec<ProvisionedResource>,
    /// Popped entries whose inverse failed, newest first.
    retained: Vec<ProvisionedResource>,
    journal: Option<PathBuf>,
}

impl ResourceLog {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn with_journal(path: impl Into<PathBuf>) -> Self {
        Self {
            journal: Some(path.into()),
            ..Self::default()
        }
    }

    /// Reopens the journal a previous run left behind.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| DeployError::io(path, err))?;
        let journal: Journal = serde_json::from_str(&raw).map_err(|source| DeployError::Journal {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            entries: journal.entries,
            retained: Vec::new(),
            journal: Some(path.to_path_buf()),
        })
    }

    /// Appends an entry unless the same kind+identifier is already present.
    /// Returns whether a new entry was added.
    pub fn record(&mut self, kind: ResourceKind, identifier: impl Into<String>) -> Result<bool> {
        let identifier = identifier.into();
        if self.contains(kind, &identifier) {
            debug!(%kind, %identifier, "resource already recorded");
            return Ok(false);
        }
        debug!(%kind, %identifier, "recording resource");
        self.entries.push(ProvisionedResource {
            kind,
            identifier,
            recorded_at: Utc::now(),
        });
        self.sync()?;
        Ok(true)
    }

    pub fn contains(&self, kind: ResourceKind, identifier: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.kind == kind && entry.identifier == identifier)
    }

    pub fn entries(&self) -> &[ProvisionedResource] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes the most recent entry. Call [`ResourceLog::sync`] afterwards to
    /// persist the shrink.
    pub fn pop(&mut self) -> Option<ProvisionedResource> {
        self.entries.pop()
    }

    /// Keeps a popped entry in the journal so a later rollback retries it.
    /// Call [`ResourceLog::sync`] afterwards.
    pub fn retain(&mut self, entry: ProvisionedResource) {
        self.retained.push(entry);
    }

    pub fn retained(&self) -> &[ProvisionedResource] {
        &self.retained
    }

    /// Pending entries followed by retained ones, in creation order.
    fn persisted(&self) -> Vec<ProvisionedResource> {
        self.entries
            .iter()
            .chain(self.retained.iter().rev())
            .cloned()
            .collect()
    }

    pub fn journal_path(&self) -> Option<&Path> {
        self.journal.as_deref()
    }

    /// Deletes the journal of a run that completed. Entries stay in memory
    /// for reporting.
    pub fn close_journal(&mut self) -> Result<()> {
        let Some(path) = self.journal.take() else {
            return Ok(());
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(DeployError::io(path, err)),
        }
    }

    /// Flushes the current entries to the journal, deleting it once empty.
    pub fn sync(&self) -> Result<()> {
        let Some(path) = &self.journal else {
            return Ok(());
        };
        let entries = self.persisted();
        if entries.is_empty() {
            return match fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(DeployError::io(path, err)),
            };
        }
        if let Some(parent) = path.parent() {
            util::ensure_dir(parent).map_err(|err| DeployError::io(parent, err))?;
        }
        let journal = Journal {
            operator: whoami::username(),
            entries,
        };
        let serialized = serde_json::to_vec_pretty(&journal).map_err(|source| DeployError::Journal {
            path: path.clone(),
            source,
        })?;
        util::atomic_write(path, &serialized).map_err(|err| DeployError::io(path, err))
    }
}
