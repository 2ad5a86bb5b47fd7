//! The seam between the workflow and the machine it mutates.
//!
//! Every external collaborator (package manager, systemd, nginx, git, the
//! language toolchains) is reached through [`Host`]. [`SystemHost`] drives
//! the real machine; [`FakeHost`] keeps an in-memory model used by the test
//! suite and by `install --dry-run`.

pub mod fake;
pub mod system;

use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

pub use fake::FakeHost;
pub use system::SystemHost;

use crate::{
    errors::{DeployError, Result},
    model::Secret,
};

/// A single external command, described independently of how it runs.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub run_as: Option<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, Secret)>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Runs the command as `user` instead of the ambient root process.
    pub fn run_as(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), Secret::new(value)));
        self
    }

    pub fn secret_env(mut self, key: impl Into<String>, value: &Secret) -> Self {
        self.env.push((key.into(), value.clone()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Program and arguments joined by spaces, without user or env.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.expose())
    }
}

/// Printable form; environment values are never shown.
impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.run_as {
            write!(f, "[{user}] ")?;
        }
        f.write_str(&self.command_line())?;
        if !self.env.is_empty() {
            let keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
            write!(f, " (env: {})", keys.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

pub trait Host {
    /// Runs a command to completion. A non-zero exit is reported through
    /// [`CommandOutput::status`], not as an error.
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Home directory of `name`, or `None` when the user does not exist.
    fn user_home(&self, name: &str) -> Result<Option<PathBuf>>;

    fn exists(&self, path: &Path) -> bool;

    fn create_dir_all(&self, path: &Path) -> Result<()>;

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()>;

    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;

    /// Missing files count as removed.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Missing trees count as removed.
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    fn chown_recursive(&self, path: &Path, user: &str) -> Result<()>;

    /// Ports with a TCP socket in LISTEN state, IPv4 and IPv6.
    fn listening_ports(&self) -> Result<BTreeSet<u16>>;

    /// Whether the operator asked the run to stop.
    fn interrupted(&self) -> bool;

    /// Resets the interrupt so teardown commands are not killed on sight.
    fn acknowledge_interrupt(&self);

    fn pause(&self, duration: Duration);

    /// [`Host::run`], turning a non-zero exit into
    /// [`DeployError::ExternalCommand`].
    fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let output = self.run(invocation)?;
        if output.success() {
            Ok(output)
        } else {
            Err(DeployError::ExternalCommand {
                command: invocation.to_string(),
                status: output.status,
                stderr: output.stderr,
            })
        }
    }

    fn user_exists(&self, name: &str) -> Result<bool> {
        Ok(self.user_home(name)?.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Upper bound for package installs, clones and dependency installs.
    pub install: Duration,
    pub verify_attempts: u32,
    pub verify_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            install: Duration::from_secs(1800),
            verify_attempts: 15,
            verify_interval: Duration::from_secs(1),
        }
    }
}

/// What every workflow stage needs: the host to act on and its limits.
#[derive(Clone, Copy)]
pub struct HostContext<'a> {
    pub host: &'a dyn Host,
    pub timeouts: Timeouts,
}

impl<'a> HostContext<'a> {
    pub fn new(host: &'a dyn Host, timeouts: Timeouts) -> Self {
        Self { host, timeouts }
    }

    /// Fails with [`DeployError::Interrupted`] once the operator has asked
    /// to stop; checked between steps.
    pub fn checkpoint(&self) -> Result<()> {
        if self.host.interrupted() {
            Err(DeployError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_hides_environment_values() {
        let invocation = Invocation::new("git")
            .args(["clone", "https://github.com/acme/demo.git", "/var/www/demo/app"])
            .run_as("demo")
            .secret_env("APPFORGE_GIT_TOKEN", &Secret::new("ghp_hidden"));

        let shown = invocation.to_string();

        assert!(shown.starts_with("[demo] git clone"));
        assert!(shown.contains("APPFORGE_GIT_TOKEN"));
        assert!(!shown.contains("ghp_hidden"));
        assert!(!format!("{invocation:?}").contains("ghp_hidden"));
        assert_eq!(invocation.env_value("APPFORGE_GIT_TOKEN"), Some("ghp_hidden"));
    }
}
