//! Error taxonomy shared by every stage of the deploy workflow.

use std::{fmt, io, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::lifecycle::UnitState;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("preflight failed: {0}")]
    Preflight(#[from] PreflightError),

    #[error("`{command}` exited with status {status}{}", stderr_suffix(.stderr))]
    ExternalCommand {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("failed to execute `{command}`: {source}")]
    CommandIo {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` did not finish within {}s", .timeout.as_secs())]
    ExternalCommandTimeout { command: String, timeout: Duration },

    #[error("interrupted by operator")]
    Interrupted,

    #[error("user `{user}` already exists with incompatible settings: {reason}")]
    UserExistsConflict { user: String, reason: String },

    #[error("failed to clone repository (status {status}){}", stderr_suffix(.stderr))]
    Clone { status: i32, stderr: String },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("{unit} stopped at state {reached}: {source}")]
    Lifecycle {
        unit: String,
        reached: UnitState,
        #[source]
        source: Box<DeployError>,
    },

    #[error("{unit} failed verification: {reason}")]
    Verification { unit: String, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("journal `{path}` is unreadable: {source}")]
    Journal {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("another appforge run holds the lock for `{0}`")]
    LockHeld(String),

    #[error("no application named `{0}` is installed on this host")]
    UnknownApplication(String),

    #[error("no unfinished run recorded at {}", .0.display())]
    NoJournal(PathBuf),

    #[error("prompt failed: {0}")]
    Prompt(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("port {0} is already in use by a listening socket")]
    PortInUse(u16),

    #[error("root privileges are required (running as `{0}`)")]
    NotRoot(String),

    #[error("package `{package}` could not be installed: {reason}")]
    PackageUnavailable { package: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{field} value `{value}` contains characters that are not allowed in {target}")]
    UnsafeValue {
        field: &'static str,
        value: String,
        target: &'static str,
    },
}

/// An inverse action that failed during teardown. Logged and collected,
/// never propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialTeardownWarning {
    pub kind: String,
    pub identifier: String,
    pub message: String,
}

impl fmt::Display for PartialTeardownWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "could not undo {} `{}`: {}",
            self.kind, self.identifier, self.message
        )
    }
}

impl DeployError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DeployError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DeployError::Io {
            path: path.into(),
            source,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        let last = trimmed.lines().last().unwrap_or(trimmed);
        format!(": {last}")
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
