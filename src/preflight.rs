//! Host prerequisites. Nothing here creates a tracked resource, so a failure
//! at this stage never needs teardown.

use tracing::{debug, info};

use crate::{
    errors::{DeployError, PreflightError, Result},
    host::{Host, HostContext, Invocation},
    model::{ProvisioningConfig, Runtime},
    util,
};

pub const NGINX_PACKAGE: &str = "nginx";
pub const NODE_PACKAGES: &[&str] = &["curl", "git", "build-essential"];
pub const PYTHON_PACKAGES: &[&str] = &["python3", "python3-venv", "python3-pip", "git"];

pub fn require_root() -> Result<()> {
    if util::is_root() {
        Ok(())
    } else {
        Err(PreflightError::NotRoot(whoami::username()).into())
    }
}

fn apt_get(ctx: &HostContext<'_>) -> Invocation {
    Invocation::new("apt-get")
        .env("DEBIAN_FRONTEND", "noninteractive")
        .timeout(ctx.timeouts.install)
}

pub fn ensure_packages_updated(ctx: &HostContext<'_>) -> Result<()> {
    info!("refreshing package index");
    ctx.host.run_checked(&apt_get(ctx).arg("update"))?;
    Ok(())
}

fn is_installed(host: &dyn Host, package: &str) -> Result<bool> {
    let output = host.run(
        &Invocation::new("dpkg-query").args(["-W", "-f=${Status}", package]),
    )?;
    Ok(output.success() && output.stdout.contains("install ok installed"))
}

/// Installs `package` unless dpkg already reports it installed.
pub fn ensure_package(ctx: &HostContext<'_>, package: &str) -> Result<()> {
    if is_installed(ctx.host, package)? {
        debug!(package, "already installed");
        return Ok(());
    }
    info!(package, "installing package");
    ctx.host
        .run_checked(&apt_get(ctx).args(["install", "-y", package]))
        .map_err(|err| match err {
            DeployError::ExternalCommand { stderr, status, .. } => {
                PreflightError::PackageUnavailable {
                    package: package.to_string(),
                    reason: format!("apt-get exited with status {status}: {}", stderr.trim()),
                }
                .into()
            }
            other => other,
        })?;
    Ok(())
}

pub fn ensure_nginx_installed(ctx: &HostContext<'_>) -> Result<()> {
    ensure_package(ctx, NGINX_PACKAGE)
}

/// System packages the runtime needs. Node itself comes from nvm, which is
/// installed per application user by the provisioner.
pub fn ensure_runtime_installed(ctx: &HostContext<'_>, runtime: Runtime) -> Result<()> {
    let packages = match runtime {
        Runtime::Node => NODE_PACKAGES,
        Runtime::Fastapi => PYTHON_PACKAGES,
    };
    for package in packages {
        ensure_package(ctx, package)?;
    }
    Ok(())
}

/// Checks the kernel socket tables; never binds the port itself.
pub fn ensure_port_free(host: &dyn Host, port: u16) -> Result<()> {
    if host.listening_ports()?.contains(&port) {
        return Err(PreflightError::PortInUse(port).into());
    }
    debug!(port, "port is free");
    Ok(())
}

/// All checks in order. The port goes first: it is the cheapest check and
/// the one an operator is most likely to need to fix.
pub fn run(ctx: &HostContext<'_>, config: &ProvisioningConfig) -> Result<()> {
    ensure_port_free(ctx.host, config.port)?;
    ctx.checkpoint()?;
    ensure_packages_updated(ctx)?;
    ctx.checkpoint()?;
    ensure_nginx_installed(ctx)?;
    ctx.checkpoint()?;
    ensure_runtime_installed(ctx, config.runtime)?;
    Ok(())
}
