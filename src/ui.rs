//! Operator-facing status lines. Diagnostics go through `tracing`; these
//! are the few lines a human is meant to read.

use console::style;

use crate::{
    deploy::InstallReport,
    errors::PartialTeardownWarning,
    ledger::ProvisionedResource,
    teardown::TeardownReport,
};

const BANNER: &str = r#"
    _                 __
   /_\  _ __ _ __  / _|___ _ _ __ _ ___
  / _ \| '_ \ '_ \|  _/ _ \ '_/ _` / -_)
 /_/ \_\ .__/ .__/|_| \___/_| \__, \___|
       |_|  |_|               |___/
"#;

pub fn banner() {
    println!("{}", style(BANNER).cyan());
    println!("{}", style("Node.js / FastAPI application provisioning").dim());
}

pub fn info(message: impl AsRef<str>) {
    println!("{}", style(message.as_ref()).cyan());
}

pub fn success(message: impl AsRef<str>) {
    println!("{}", style(message.as_ref()).green().bold());
}

pub fn warn(message: impl AsRef<str>) {
    eprintln!("{}", style(message.as_ref()).yellow());
}

pub fn failure(message: impl AsRef<str>) {
    eprintln!("{}", style(message.as_ref()).red().bold());
}

fn resource_line(entry: &ProvisionedResource) -> String {
    format!("  {:<14} {}", entry.kind.to_string(), entry.identifier)
}

pub fn installed(report: &InstallReport) {
    success(format!(
        "{} is live at http://{}",
        report.code_name, report.domain
    ));
    println!(
        "service {} | site {}",
        style(report.service).cyan(),
        style(report.site).cyan()
    );
    for entry in &report.resources {
        println!("{}", style(resource_line(entry)).dim());
    }
}

pub fn teardown(report: &TeardownReport) {
    for entry in &report.undone {
        println!("{}", style(format!("removed{}", resource_line(entry))).dim());
    }
    for warning in &report.warnings {
        teardown_warning(warning);
    }
    if report.is_clean() {
        info("host restored");
    } else {
        warn(format!(
            "{} step(s) could not be undone; see the warnings above",
            report.warnings.len()
        ));
    }
}

fn teardown_warning(warning: &PartialTeardownWarning) {
    warn(format!("warning: {warning}"));
}

pub fn planned(commands: &[String]) {
    info("dry run, nothing was changed. Planned commands:");
    for (index, command) in commands.iter().enumerate() {
        println!("{:>3}. {command}", index + 1);
    }
}
