//! Driving the shared reverse proxy.
//!
//! A reload affects every site on the host, so [`test_and_reload`] is the
//! only way this crate reloads nginx: configuration test first, then a
//! signal-based reload. The proxy is never restarted.

use tracing::{debug, info};

use crate::{
    errors::Result,
    host::{Host, Invocation},
};

pub fn config_test() -> Invocation {
    Invocation::new("nginx").arg("-t")
}

pub fn reload() -> Invocation {
    Invocation::new("systemctl").args(["reload", "nginx"])
}

/// Runs `nginx -t`; a failing test is returned as an error and nothing is
/// reloaded.
pub fn test_config(host: &dyn Host) -> Result<()> {
    let output = host.run_checked(&config_test())?;
    debug!(output = %output.stderr.trim(), "nginx configuration test passed");
    Ok(())
}

pub fn test_and_reload(host: &dyn Host) -> Result<()> {
    test_config(host)?;
    host.run_checked(&reload())?;
    info!("nginx reloaded");
    Ok(())
}
