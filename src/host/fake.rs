//! In-memory [`Host`] that models just enough of a Debian machine for the
//! workflow: users, files, symlinks, packages, systemd units and listening
//! ports. Commands are recorded and interpreted instead of executed.

use std::{
    cell::{Ref, RefCell},
    collections::{BTreeMap, BTreeSet},
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use super::{CommandOutput, Host, Invocation};
use crate::errors::{DeployError, Result};

#[derive(Debug, Default, Clone)]
pub struct FakeState {
    pub users: BTreeMap<String, PathBuf>,
    pub files: BTreeMap<PathBuf, String>,
    pub dirs: BTreeSet<PathBuf>,
    pub symlinks: BTreeMap<PathBuf, PathBuf>,
    pub owners: BTreeMap<PathBuf, String>,
    pub packages: BTreeSet<String>,
    pub enabled_units: BTreeSet<String>,
    pub active_units: BTreeSet<String>,
    pub listening: BTreeSet<u16>,
    pub commands: Vec<String>,
    pub proxy_reloads: usize,
    pub audit_vulnerabilities: u32,
    failing_commands: Vec<String>,
    failing_writes: Vec<PathBuf>,
    interrupt_after: Option<usize>,
    repository_files: Vec<String>,
}

impl FakeState {
    fn under(&self, path: &Path) -> bool {
        self.dirs.iter().any(|d| d.starts_with(path))
            || self.files.keys().any(|f| f.starts_with(path))
            || self.symlinks.keys().any(|l| l.starts_with(path))
    }

    fn unit_port(&self, unit: &str) -> Option<u16> {
        let contents = self.files.get(&Path::new("/etc/systemd/system").join(unit))?;
        contents
            .lines()
            .find_map(|line| line.strip_prefix("Environment=PORT="))
            .and_then(|port| port.trim().parse().ok())
    }
}

pub struct FakeHost {
    state: RefCell<FakeState>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHost {
    pub fn new() -> Self {
        let state = FakeState {
            repository_files: vec!["package.json".into(), "requirements.txt".into()],
            ..FakeState::default()
        };
        Self {
            state: RefCell::new(state),
        }
    }

    pub fn with_listening(self, port: u16) -> Self {
        self.state.borrow_mut().listening.insert(port);
        self
    }

    pub fn with_user(self, name: &str, home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        {
            let mut state = self.state.borrow_mut();
            state.dirs.insert(home.clone());
            state.users.insert(name.to_string(), home);
        }
        self
    }

    pub fn with_packages(self, packages: &[&str]) -> Self {
        self.state
            .borrow_mut()
            .packages
            .extend(packages.iter().map(|p| p.to_string()));
        self
    }

    pub fn with_file(self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.state
            .borrow_mut()
            .files
            .insert(path.into(), contents.to_string());
        self
    }

    /// Files a `git clone` leaves in the destination.
    pub fn with_repository_files(self, files: &[&str]) -> Self {
        self.state.borrow_mut().repository_files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_audit_vulnerabilities(self, count: u32) -> Self {
        self.state.borrow_mut().audit_vulnerabilities = count;
        self
    }

    /// Any command whose printed form contains `pattern` exits with status 1.
    pub fn fail_command(self, pattern: &str) -> Self {
        self.state
            .borrow_mut()
            .failing_commands
            .push(pattern.to_string());
        self
    }

    /// Writes below `prefix` fail as if the disk were full.
    pub fn fail_writes_under(self, prefix: impl Into<PathBuf>) -> Self {
        self.state.borrow_mut().failing_writes.push(prefix.into());
        self
    }

    /// Reports an operator interrupt once `commands` commands have run.
    pub fn interrupt_after(self, commands: usize) -> Self {
        self.state.borrow_mut().interrupt_after = Some(commands);
        self
    }

    pub fn state(&self) -> Ref<'_, FakeState> {
        self.state.borrow()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state.borrow().files.get(path.as_ref()).cloned()
    }

    fn interpret(state: &mut FakeState, invocation: &Invocation) -> CommandOutput {
        let args: Vec<&str> = invocation.args.iter().map(String::as_str).collect();
        let ok = CommandOutput::default();
        let status = |code: i32, stderr: &str| CommandOutput {
            status: code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        };

        match invocation.program.as_str() {
            "dpkg-query" => match args.last() {
                Some(package) if state.packages.contains(*package) => CommandOutput {
                    stdout: "install ok installed".into(),
                    ..ok
                },
                _ => status(1, "no packages found matching"),
            },
            "apt-get" => {
                if let Some(pos) = args.iter().position(|a| *a == "install") {
                    let wanted = args[pos + 1..].iter().filter(|a| !a.starts_with('-'));
                    state.packages.extend(wanted.map(|p| p.to_string()));
                }
                ok
            }
            "useradd" => {
                let Some(name) = args.last() else {
                    return status(2, "usage");
                };
                if state.users.contains_key(*name) {
                    return status(9, "user already exists");
                }
                let home = args
                    .iter()
                    .position(|a| *a == "--home-dir")
                    .and_then(|pos| args.get(pos + 1))
                    .map(PathBuf::from)
                    .unwrap_or_else(|| Path::new("/home").join(name));
                if args.contains(&"--create-home") {
                    state.dirs.insert(home.clone());
                    state.owners.insert(home.clone(), name.to_string());
                }
                state.users.insert(name.to_string(), home);
                ok
            }
            "userdel" => match args.last() {
                Some(name) if state.users.remove(*name).is_some() => ok,
                _ => status(6, "user does not exist"),
            },
            "git" if args.contains(&"clone") => {
                let Some(dest) = args.last().map(PathBuf::from) else {
                    return status(129, "usage");
                };
                if state.under(&dest) {
                    return status(128, "destination path already exists and is not empty");
                }
                state.dirs.insert(dest.clone());
                for file in state.repository_files.clone() {
                    state.files.insert(dest.join(file), String::new());
                }
                ok
            }
            "bash" => {
                let script = args.last().copied().unwrap_or_default();
                let home = invocation.env_value("HOME").map(PathBuf::from);
                if script.contains("install.sh") {
                    if let Some(home) = home {
                        state.dirs.insert(home.join(".nvm"));
                    }
                    ok
                } else if script.contains("npm audit fix --force") {
                    state.audit_vulnerabilities = 0;
                    ok
                } else if script.contains("npm audit --json") {
                    CommandOutput {
                        status: i32::from(state.audit_vulnerabilities > 0),
                        stdout: format!(
                            r#"{{"auditReportVersion":2,"metadata":{{"vulnerabilities":{{"total":{}}}}}}}"#,
                            state.audit_vulnerabilities
                        ),
                        stderr: String::new(),
                    }
                } else if script.contains("--version") {
                    CommandOutput {
                        stdout: "v20.11.1\n10.2.4\n".into(),
                        ..ok
                    }
                } else {
                    if script.contains("npm install") || script.contains("npm init") {
                        if let Some(cwd) = &invocation.cwd {
                            state.dirs.insert(cwd.join("node_modules"));
                            state.files.entry(cwd.join("package.json")).or_default();
                        }
                    }
                    ok
                }
            }
            "python3" if args.first() == Some(&"-m") && args.get(1) == Some(&"venv") => {
                if let Some(dest) = args.last() {
                    state.dirs.insert(PathBuf::from(dest));
                }
                ok
            }
            program if program.ends_with("/python") || program.ends_with("/pip") => {
                if args.contains(&"--version") {
                    CommandOutput {
                        stdout: "Python 3.12.3\n".into(),
                        ..ok
                    }
                } else {
                    ok
                }
            }
            "systemctl" => {
                let unit = args.last().map(|u| u.to_string()).unwrap_or_default();
                match args.first().copied() {
                    Some("enable") => {
                        state.enabled_units.insert(unit);
                        ok
                    }
                    Some("disable") => {
                        state.enabled_units.remove(&unit);
                        ok
                    }
                    Some("start") => {
                        if let Some(port) = state.unit_port(&unit) {
                            state.listening.insert(port);
                        }
                        state.active_units.insert(unit);
                        ok
                    }
                    Some("stop") => {
                        if let Some(port) = state.unit_port(&unit) {
                            state.listening.remove(&port);
                        }
                        state.active_units.remove(&unit);
                        ok
                    }
                    Some("is-active") if state.active_units.contains(&unit) => ok,
                    Some("is-active") if unit == "nginx" && state.packages.contains("nginx") => ok,
                    Some("is-active") => status(3, ""),
                    Some("is-enabled") if state.enabled_units.contains(&unit) => ok,
                    Some("is-enabled") => status(1, ""),
                    Some("reload") => {
                        state.proxy_reloads += 1;
                        ok
                    }
                    _ => ok,
                }
            }
            "nginx" => CommandOutput {
                stderr: "nginx: configuration file /etc/nginx/nginx.conf test is successful".into(),
                ..ok
            },
            _ => ok,
        }
    }
}

impl Host for FakeHost {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let mut state = self.state.borrow_mut();
        let printed = invocation.to_string();
        state.commands.push(printed.clone());
        if state
            .failing_commands
            .iter()
            .any(|pattern| printed.contains(pattern.as_str()))
        {
            return Ok(CommandOutput {
                status: 1,
                stdout: String::new(),
                stderr: "simulated failure".into(),
            });
        }
        Ok(Self::interpret(&mut state, invocation))
    }

    fn user_home(&self, name: &str) -> Result<Option<PathBuf>> {
        Ok(self.state.borrow().users.get(name).cloned())
    }

    fn exists(&self, path: &Path) -> bool {
        self.state.borrow().under(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.state.borrow_mut().dirs.insert(path.to_path_buf());
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &str, _mode: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.failing_writes.iter().any(|prefix| path.starts_with(prefix)) {
            return Err(DeployError::io(
                path,
                io::Error::other("No space left on device"),
            ));
        }
        state.files.insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.failing_writes.iter().any(|prefix| link.starts_with(prefix)) {
            return Err(DeployError::io(
                link,
                io::Error::other("No space left on device"),
            ));
        }
        state
            .symlinks
            .insert(link.to_path_buf(), target.to_path_buf());
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.files.remove(path);
        state.symlinks.remove(path);
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.dirs.retain(|d| !d.starts_with(path));
        state.files.retain(|f, _| !f.starts_with(path));
        state.symlinks.retain(|l, _| !l.starts_with(path));
        state.owners.retain(|o, _| !o.starts_with(path));
        Ok(())
    }

    fn chown_recursive(&self, path: &Path, user: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !state.users.contains_key(user) {
            return Err(DeployError::io(
                path,
                io::Error::new(io::ErrorKind::NotFound, format!("no user `{user}`")),
            ));
        }
        state.owners.insert(path.to_path_buf(), user.to_string());
        Ok(())
    }

    fn listening_ports(&self) -> Result<BTreeSet<u16>> {
        Ok(self.state.borrow().listening.clone())
    }

    fn interrupted(&self) -> bool {
        let state = self.state.borrow();
        state
            .interrupt_after
            .is_some_and(|limit| state.commands.len() >= limit)
    }

    fn acknowledge_interrupt(&self) {
        self.state.borrow_mut().interrupt_after = None;
    }

    fn pause(&self, _duration: Duration) {}
}
