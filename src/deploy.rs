//! The install workflow: preflight, render, provision, bring both units up.
//! Any failure after the first host mutation tears the run back down.

use std::fmt;

use tracing::{error, info};

use crate::{
    errors::DeployError,
    host::HostContext,
    ledger::{ProvisionedResource, ResourceLog},
    lifecycle::{LifecycleController, UnitState},
    model::{CodeName, Domain, ProvisioningConfig},
    preflight,
    provision::Provisioner,
    teardown::{self, TeardownReport},
    templates,
};

#[derive(Debug)]
pub struct InstallReport {
    pub code_name: CodeName,
    pub domain: Domain,
    pub service: UnitState,
    pub site: UnitState,
    pub resources: Vec<ProvisionedResource>,
}

/// An install that did not complete. `teardown` is `None` when the run
/// stopped before touching the host.
#[derive(Debug)]
pub struct InstallFailure {
    pub error: DeployError,
    pub teardown: Option<TeardownReport>,
}

impl fmt::Display for InstallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for InstallFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<DeployError> for InstallFailure {
    fn from(error: DeployError) -> Self {
        Self {
            error,
            teardown: None,
        }
    }
}

/// Renders both unit texts. Pure; an unsafe field fails here, before any
/// host mutation.
pub fn render(config: &ProvisioningConfig) -> Result<(String, String), DeployError> {
    let unit = templates::render_service_unit(config)?;
    let site = templates::render_reverse_proxy_site(config)?;
    Ok((unit, site))
}

pub fn install(
    ctx: HostContext<'_>,
    config: &ProvisioningConfig,
    log: &mut ResourceLog,
) -> Result<InstallReport, InstallFailure> {
    info!(code_name = %config.code_name, runtime = %config.runtime, port = config.port, "starting install");

    preflight::run(&ctx, config)?;
    let (unit_text, site_text) = render(config)?;

    match apply(ctx, config, log, &unit_text, &site_text) {
        Ok((service, site)) => {
            log.close_journal()?;
            info!(code_name = %config.code_name, domain = %config.domain, "install complete");
            Ok(InstallReport {
                code_name: config.code_name.clone(),
                domain: config.domain.clone(),
                service,
                site,
                resources: log.entries().to_vec(),
            })
        }
        Err(error) => {
            error!(code_name = %config.code_name, %error, "install failed, tearing down");
            ctx.host.acknowledge_interrupt();
            let report = teardown::teardown(ctx.host, log);
            Err(InstallFailure {
                error,
                teardown: Some(report),
            })
        }
    }
}

fn apply(
    ctx: HostContext<'_>,
    config: &ProvisioningConfig,
    log: &mut ResourceLog,
    unit_text: &str,
    site_text: &str,
) -> Result<(UnitState, UnitState), DeployError> {
    Provisioner::new(ctx, config).run(log)?;

    let lifecycle = LifecycleController::new(ctx, config);
    let service = lifecycle.bring_up_service(log, unit_text)?;
    let site = lifecycle.bring_up_site(log, site_text)?;
    Ok((service, site))
}
