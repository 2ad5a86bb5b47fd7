use crate::host::Invocation;

fn systemctl(verb: &str, unit: &str) -> Invocation {
    Invocation::new("systemctl").args([verb, unit])
}

pub fn daemon_reload() -> Invocation {
    Invocation::new("systemctl").arg("daemon-reload")
}

pub fn enable(unit: &str) -> Invocation {
    systemctl("enable", unit)
}

pub fn disable(unit: &str) -> Invocation {
    systemctl("disable", unit)
}

pub fn start(unit: &str) -> Invocation {
    systemctl("start", unit)
}

pub fn stop(unit: &str) -> Invocation {
    systemctl("stop", unit)
}

pub fn is_active(unit: &str) -> Invocation {
    Invocation::new("systemctl").args(["is-active", "--quiet", unit])
}

pub fn is_enabled(unit: &str) -> Invocation {
    Invocation::new("systemctl").args(["is-enabled", "--quiet", unit])
}
