//! Creates the per-application resources: OS user, source checkout,
//! language dependencies, log directory and ownership.
//!
//! Each step records what it created in the [`ResourceLog`] before the next
//! step runs. Install commands run as the application user through
//! `runuser`; only the final ownership pass touches files as root.

use std::path::Path;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    errors::{DeployError, Result},
    host::{HostContext, Invocation},
    ledger::{ResourceKind, ResourceLog},
    model::{CodeName, Credentials, ProvisioningConfig, RepositoryUrl, Runtime},
    paths,
};

const NVM_INSTALLER: &str = "https://raw.githubusercontent.com/nvm-sh/nvm/v0.40.1/install.sh";
const PYTHON_EXTRAS: &[&str] = &["uvicorn[standard]", "uvloop", "httptools"];
const MARKER_FILE: &str = ".appforge.json";

/// Shell credential helper fed from the environment, so the token never
/// reaches argv, the remote URL, or `.git/config`.
const CREDENTIAL_HELPER: &str = "credential.helper=!f() { test \"$1\" = get || exit 0; \
echo \"username=$APPFORGE_GIT_USERNAME\"; echo \"password=$APPFORGE_GIT_TOKEN\"; }; f";

pub struct Provisioner<'a> {
    ctx: HostContext<'a>,
    config: &'a ProvisioningConfig,
}

impl<'a> Provisioner<'a> {
    pub fn new(ctx: HostContext<'a>, config: &'a ProvisioningConfig) -> Self {
        Self { ctx, config }
    }

    fn code(&self) -> &CodeName {
        &self.config.code_name
    }

    /// Every provisioning step, in order.
    pub fn run(&self, log: &mut ResourceLog) -> Result<()> {
        self.create_app_user(log)?;
        self.clone_repository(
            log,
            &self.config.repository,
            self.config.credentials.as_ref(),
            &paths::app_dir(self.code()),
        )?;
        self.install_dependencies(log, &paths::app_dir(self.code()), self.config.runtime)?;
        self.record_version_marker()?;
        self.prepare_log_directory(log)?;
        self.set_ownership()
    }

    pub fn create_app_user(&self, log: &mut ResourceLog) -> Result<()> {
        self.ctx.checkpoint()?;
        let host = self.ctx.host;
        let code = self.code();
        let home = paths::home_dir(code);

        match host.user_home(code.as_str())? {
            Some(existing) if existing == home => {
                info!(user = %code, "user already exists, reusing it");
                if !host.exists(&home) {
                    host.create_dir_all(&home)?;
                    log.record(ResourceKind::DirectoryCreated, path_id(&home))?;
                    host.chown_recursive(&home, code.as_str())?;
                }
                Ok(())
            }
            Some(existing) => Err(DeployError::UserExistsConflict {
                user: code.to_string(),
                reason: format!(
                    "home directory is {} instead of {}",
                    existing.display(),
                    home.display()
                ),
            }),
            None => {
                let home_was_present = host.exists(&home);
                host.create_dir_all(Path::new(paths::WEB_ROOT))?;
                info!(user = %code, home = %home.display(), "creating system user");
                host.run_checked(
                    &Invocation::new("useradd")
                        .args(["--system", "--create-home", "--user-group"])
                        .args(["--shell", "/bin/bash", "--home-dir"])
                        .arg(path_id(&home))
                        .arg(code.as_str()),
                )?;
                log.record(ResourceKind::UserCreated, code.as_str())?;
                if !home_was_present {
                    log.record(ResourceKind::DirectoryCreated, path_id(&home))?;
                }
                Ok(())
            }
        }
    }

    pub fn clone_repository(
        &self,
        log: &mut ResourceLog,
        url: &RepositoryUrl,
        credentials: Option<&Credentials>,
        dest: &Path,
    ) -> Result<()> {
        self.ctx.checkpoint()?;
        let host = self.ctx.host;
        let code = self.code();

        if host.exists(dest) {
            return Err(DeployError::Clone {
                status: -1,
                stderr: format!("{} already exists", dest.display()),
            });
        }

        let mut invocation = Invocation::new("git");
        if let Some(credentials) = credentials {
            invocation = invocation
                .args(["-c", "credential.helper=", "-c", CREDENTIAL_HELPER])
                .env("APPFORGE_GIT_USERNAME", credentials.username.clone())
                .secret_env("APPFORGE_GIT_TOKEN", &credentials.token);
        }
        let invocation = invocation
            .arg("clone")
            .arg(url.as_str())
            .arg(path_id(dest))
            .run_as(code.as_str())
            .cwd(paths::home_dir(code))
            .env("HOME", path_id(&paths::home_dir(code)))
            .env("GIT_TERMINAL_PROMPT", "0")
            .timeout(self.ctx.timeouts.install);

        info!(repository = %url, dest = %dest.display(), private = credentials.is_some(), "cloning repository");
        let output = host.run(&invocation)?;
        if !output.success() {
            if let Err(err) = host.remove_dir_all(dest) {
                warn!(error = %err, "could not remove partial checkout");
            }
            return Err(DeployError::Clone {
                status: output.status,
                stderr: output.stderr,
            });
        }
        log.record(ResourceKind::RepositoryCloned, path_id(dest))?;
        Ok(())
    }

    pub fn install_dependencies(
        &self,
        log: &mut ResourceLog,
        dest: &Path,
        runtime: Runtime,
    ) -> Result<()> {
        self.ctx.checkpoint()?;
        match runtime {
            Runtime::Node => self.install_node(log, dest),
            Runtime::Fastapi => self.install_python(log, dest),
        }
    }

    fn as_app_user(&self, invocation: Invocation, cwd: &Path) -> Invocation {
        let home = paths::home_dir(self.code());
        invocation
            .run_as(self.code().as_str())
            .cwd(cwd)
            .env("HOME", path_id(&home))
            .timeout(self.ctx.timeouts.install)
    }

    /// A bash invocation with nvm loaded, run as the application user.
    fn node_script(&self, script: &str, cwd: &Path) -> Invocation {
        let loader = nvm_loader(self.code(), script);
        self.as_app_user(Invocation::new("bash").args(["-c", loader.as_str()]), cwd)
    }

    fn install_node(&self, log: &mut ResourceLog, dest: &Path) -> Result<()> {
        let host = self.ctx.host;
        let nvm = paths::nvm_dir(self.code());

        if host.exists(&nvm) {
            debug!(nvm = %nvm.display(), "nvm already present");
        } else {
            info!("installing nvm");
            let script = format!(
                "curl -fsSL {NVM_INSTALLER} | NVM_DIR=\"{}\" PROFILE=/dev/null bash",
                nvm.display()
            );
            host.run_checked(&self.as_app_user(
                Invocation::new("bash").args(["-c", script.as_str()]),
                &paths::home_dir(self.code()),
            ))?;
            log.record(ResourceKind::DependenciesInstalled, path_id(&nvm))?;
        }

        self.ctx.checkpoint()?;
        let version = &self.config.knobs.node_version;
        info!(%version, "installing node");
        host.run_checked(&self.node_script(
            &format!("nvm install '{version}' && nvm alias default '{version}'"),
            dest,
        ))?;

        self.ctx.checkpoint()?;
        if host.exists(&dest.join("package.json")) {
            info!("installing project dependencies");
            host.run_checked(&self.node_script("npm install", dest))?;
        } else {
            info!("no package.json found, initialising one");
            host.run_checked(&self.node_script("npm init -y", dest))?;
        }

        self.ctx.checkpoint()?;
        self.audit_fix(dest)
    }

    /// `npm audit fix`, escalating to `--force` only when vulnerabilities
    /// remain. Audit problems are reported, never fatal.
    fn audit_fix(&self, dest: &Path) -> Result<()> {
        let host = self.ctx.host;
        let first = host.run(&self.node_script("npm audit fix", dest))?;
        if !first.success() {
            warn!(status = first.status, "npm audit fix reported problems");
        }

        let report = host.run(&self.node_script("npm audit --json", dest))?;
        match vulnerability_total(&report.stdout) {
            Some(0) => {
                debug!("no known vulnerabilities");
                Ok(())
            }
            Some(remaining) => {
                warn!(remaining, "vulnerabilities remain, running npm audit fix --force");
                let forced = host.run(&self.node_script("npm audit fix --force", dest))?;
                if !forced.success() {
                    warn!(status = forced.status, "npm audit fix --force did not resolve everything");
                }
                Ok(())
            }
            None => {
                warn!("could not read npm audit report");
                Ok(())
            }
        }
    }

    fn install_python(&self, log: &mut ResourceLog, dest: &Path) -> Result<()> {
        let host = self.ctx.host;
        let venv = paths::venv_dir(self.code());
        let pip = venv.join("bin").join("pip");

        if host.exists(&venv) {
            debug!(venv = %venv.display(), "virtual environment already present");
        } else {
            info!(venv = %venv.display(), "creating virtual environment");
            host.run_checked(&self.as_app_user(
                Invocation::new("python3").args(["-m", "venv"]).arg(path_id(&venv)),
                dest,
            ))?;
            log.record(ResourceKind::DependenciesInstalled, path_id(&venv))?;
        }

        let pip_install = |args: &[&str]| {
            self.as_app_user(
                Invocation::new(path_id(&pip))
                    .args(["install", "--no-input"])
                    .args(args.iter().copied()),
                dest,
            )
        };

        self.ctx.checkpoint()?;
        host.run_checked(&pip_install(&["--upgrade", "pip"]))?;

        self.ctx.checkpoint()?;
        if host.exists(&dest.join("requirements.txt")) {
            info!("installing requirements.txt");
            host.run_checked(&pip_install(&["-r", "requirements.txt"]))?;
        } else {
            warn!("no requirements.txt found, installing server packages only");
        }

        self.ctx.checkpoint()?;
        info!(packages = ?PYTHON_EXTRAS, "installing server packages");
        host.run_checked(&pip_install(PYTHON_EXTRAS))?;
        Ok(())
    }

    /// Stamps the checkout with the tool version that provisioned it.
    pub fn record_version_marker(&self) -> Result<()> {
        self.ctx.checkpoint()?;
        let dest = paths::app_dir(self.code());
        let version = env!("CARGO_PKG_VERSION");
        match self.config.runtime {
            Runtime::Node => {
                self.ctx.host.run_checked(
                    &self.node_script(&format!("npm pkg set appforge.version={version}"), &dest),
                )?;
            }
            Runtime::Fastapi => {
                let marker = json!({ "appforge": { "version": version } });
                self.ctx.host.write_file(
                    &dest.join(MARKER_FILE),
                    &format!("{marker:#}\n"),
                    0o644,
                )?;
            }
        }
        Ok(())
    }

    pub fn prepare_log_directory(&self, log: &mut ResourceLog) -> Result<()> {
        self.ctx.checkpoint()?;
        let dir = paths::log_dir(self.code());
        if self.ctx.host.exists(&dir) {
            debug!(dir = %dir.display(), "log directory already present");
            return Ok(());
        }
        self.ctx.host.create_dir_all(&dir)?;
        log.record(ResourceKind::LogDirectoryCreated, path_id(&dir))?;
        Ok(())
    }

    /// Hands the home and log trees to the application user. Runs last so
    /// nothing created as root during provisioning is left behind.
    pub fn set_ownership(&self) -> Result<()> {
        self.ctx.checkpoint()?;
        let code = self.code();
        for dir in [paths::home_dir(code), paths::log_dir(code)] {
            debug!(dir = %dir.display(), user = %code, "setting ownership");
            self.ctx.host.chown_recursive(&dir, code.as_str())?;
        }
        Ok(())
    }
}

fn path_id(path: &Path) -> String {
    path.display().to_string()
}

/// Total reported by `npm audit --json` (npm 7+ report format).
pub fn vulnerability_total(report: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(report).ok()?;
    value
        .pointer("/metadata/vulnerabilities/total")
        .and_then(serde_json::Value::as_u64)
}

fn nvm_loader(code: &CodeName, script: &str) -> String {
    format!(
        "export NVM_DIR=\"{}\"; . \"$NVM_DIR/nvm.sh\" && {script}",
        paths::nvm_dir(code).display()
    )
}

/// Asks the installed toolchain to identify its interpreter and package
/// manager, as the application user would see them.
pub fn toolchain_probe(config: &ProvisioningConfig) -> Invocation {
    let code = &config.code_name;
    let script = match config.runtime {
        Runtime::Node => nvm_loader(code, "node --version && npm --version"),
        Runtime::Fastapi => {
            let bin = paths::venv_dir(code).join("bin");
            format!(
                "{}/python --version && {}/pip --version",
                bin.display(),
                bin.display()
            )
        }
    };
    Invocation::new("bash")
        .args(["-c", script.as_str()])
        .run_as(code.as_str())
        .cwd(paths::app_dir(code))
        .env("HOME", path_id(&paths::home_dir(code)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_total_is_read_from_metadata() {
        let report = r#"{"auditReportVersion":2,"metadata":{"vulnerabilities":{"low":1,"total":3}}}"#;
        assert_eq!(vulnerability_total(report), Some(3));
        assert_eq!(vulnerability_total("npm ERR! audit endpoint"), None);
        assert_eq!(vulnerability_total(r#"{"metadata":{}}"#), None);
    }
}
