//! Brings the two managed units (the application service and its nginx
//! site) through `Absent → Written → Enabled → Started → Verified`.
//!
//! Transitions only move forward. A failed transition is returned as
//! [`DeployError::Lifecycle`] carrying the last state reached; the caller
//! owns teardown.

use std::fmt;

use tracing::{debug, info, warn};

use crate::{
    errors::{DeployError, Result},
    host::HostContext,
    ledger::{ResourceKind, ResourceLog},
    model::ProvisioningConfig,
    nginx, paths, provision, systemd,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitState {
    Absent,
    Written,
    Enabled,
    Started,
    Verified,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UnitState::Absent => "absent",
            UnitState::Written => "written",
            UnitState::Enabled => "enabled",
            UnitState::Started => "started",
            UnitState::Verified => "verified",
        };
        f.write_str(label)
    }
}

/// Runs `steps`, attaching the state reached to any failure.
fn drive(
    unit: &str,
    steps: impl FnOnce(&mut UnitState) -> Result<()>,
) -> Result<UnitState> {
    let mut state = UnitState::Absent;
    match steps(&mut state) {
        Ok(()) => {
            info!(unit, %state, "unit ready");
            Ok(state)
        }
        Err(source) => {
            warn!(unit, reached = %state, error = %source, "unit transition failed");
            Err(DeployError::Lifecycle {
                unit: unit.to_string(),
                reached: state,
                source: Box::new(source),
            })
        }
    }
}

fn advance(state: &mut UnitState, unit: &str, next: UnitState) {
    debug!(unit, from = %state, to = %next, "transition");
    *state = next;
}

pub struct LifecycleController<'a> {
    ctx: HostContext<'a>,
    config: &'a ProvisioningConfig,
}

impl<'a> LifecycleController<'a> {
    pub fn new(ctx: HostContext<'a>, config: &'a ProvisioningConfig) -> Self {
        Self { ctx, config }
    }

    pub fn bring_up_service(&self, log: &mut ResourceLog, unit_text: &str) -> Result<UnitState> {
        let host = self.ctx.host;
        let code = &self.config.code_name;
        let unit = paths::unit_name(code);
        let unit_path = paths::unit_path(code);

        drive(&unit, |state| {
            self.ctx.checkpoint()?;
            host.write_file(&unit_path, unit_text, 0o644)?;
            log.record(ResourceKind::UnitFileWritten, unit_path.display().to_string())?;
            advance(state, &unit, UnitState::Written);

            self.ctx.checkpoint()?;
            host.run_checked(&systemd::daemon_reload())?;
            host.run_checked(&systemd::enable(&unit))?;
            log.record(ResourceKind::UnitEnabled, unit.as_str())?;
            advance(state, &unit, UnitState::Enabled);

            self.ctx.checkpoint()?;
            if let Err(err) = host.run_checked(&systemd::start(&unit)) {
                // a failed start can leave the unit cycling through restarts
                if let Err(stop_err) = host.run_checked(&systemd::stop(&unit)) {
                    warn!(%unit, error = %stop_err, "could not stop unit after failed start");
                }
                return Err(err);
            }
            log.record(ResourceKind::UnitStarted, unit.as_str())?;
            advance(state, &unit, UnitState::Started);

            self.verify_service(&unit)?;
            advance(state, &unit, UnitState::Verified);
            Ok(())
        })
    }

    /// The unit is active, the toolchain answers, and the port is listening.
    fn verify_service(&self, unit: &str) -> Result<()> {
        let host = self.ctx.host;
        let port = self.config.port;

        host.run_checked(&systemd::is_active(unit))?;
        let probe = host.run_checked(&provision::toolchain_probe(self.config))?;
        debug!(versions = %probe.stdout.trim().replace('\n', ", "), "toolchain responds");

        let attempts = self.ctx.timeouts.verify_attempts;
        for attempt in 1..=attempts {
            self.ctx.checkpoint()?;
            if host.listening_ports()?.contains(&port) {
                debug!(port, attempt, "application is listening");
                return Ok(());
            }
            debug!(port, attempt, attempts, "waiting for application to listen");
            host.pause(self.ctx.timeouts.verify_interval);
        }
        Err(DeployError::Verification {
            unit: unit.to_string(),
            reason: format!("nothing is listening on 127.0.0.1:{port} after {attempts} checks"),
        })
    }

    pub fn bring_up_site(&self, log: &mut ResourceLog, site_text: &str) -> Result<UnitState> {
        let host = self.ctx.host;
        let code = &self.config.code_name;
        let site = format!("nginx site {code}");
        let site_path = paths::site_path(code);
        let site_link = paths::site_link(code);

        drive(&site, |state| {
            self.ctx.checkpoint()?;
            host.write_file(&site_path, site_text, 0o644)?;
            log.record(ResourceKind::SiteWritten, site_path.display().to_string())?;
            advance(state, &site, UnitState::Written);

            self.ctx.checkpoint()?;
            host.symlink(&site_path, &site_link)?;
            log.record(ResourceKind::SiteEnabled, site_link.display().to_string())?;
            advance(state, &site, UnitState::Enabled);

            self.ctx.checkpoint()?;
            nginx::test_and_reload(host)?;
            log.record(ResourceKind::ProxyReloaded, code.as_str())?;
            advance(state, &site, UnitState::Started);

            nginx::test_config(host)?;
            host.run_checked(&systemd::is_active("nginx"))?;
            advance(state, &site, UnitState::Verified);
            Ok(())
        })
    }
}
