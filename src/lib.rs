pub mod cli;
pub mod collect;
pub mod config;
pub mod deploy;
pub mod errors;
pub mod host;
pub mod interrupt;
pub mod ledger;
pub mod lifecycle;
pub mod lock;
pub mod model;
pub mod nginx;
pub mod paths;
pub mod preflight;
pub mod provision;
pub mod services;
pub mod systemd;
pub mod teardown;
pub mod templates;
pub mod ui;
pub mod util;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::{
    cli::{Commands, InstallOptions, UninstallOptions},
    collect::{Collector, Prompter, TerminalPrompter},
    config::ToolConfig,
    host::{FakeHost, Host, HostContext, SystemHost},
    ledger::ResourceLog,
    lock::AppLock,
    model::{CodeName, Credentials, ProvisioningConfig},
};

pub fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    util::init_logging(cli.verbose);

    if let Err(err) = interrupt::install_handler() {
        warn!(error = %err, "could not install signal handlers, Ctrl-C will not roll back");
    }

    let config_path = config::resolve_config_path()?;
    let mut tool_config = config::load_from(&config_path)?;

    let command = match cli.command {
        Some(command) => command,
        None => choose_command()?,
    };

    match command {
        Commands::Install { opts } => {
            info!("starting install");
            install(opts, &config_path, &mut tool_config)
        }
        Commands::Uninstall { opts } => {
            info!("starting uninstall");
            uninstall(opts, &config_path, &mut tool_config)
        }
        Commands::Rollback { code_name } => rollback(&code_name, &tool_config),
        Commands::Render { answers } => render(&answers),
        Commands::Status { code_name } => status(&code_name, &tool_config),
    }
}

fn choose_command() -> Result<Commands> {
    let mut prompter = TerminalPrompter::default();
    let picked = prompter.select("What do you want to do?", &["Install", "Uninstall"], 0)?;
    Ok(if picked == 0 {
        Commands::Install {
            opts: InstallOptions::default(),
        }
    } else {
        Commands::Uninstall {
            opts: UninstallOptions::default(),
        }
    })
}

/// Loads an answers file; credentials come from the environment only.
pub fn load_answers(path: &Path) -> Result<ProvisioningConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read answers file {}", path.display()))?;
    let mut config = ProvisioningConfig::from_json(&raw)
        .with_context(|| format!("invalid answers file {}", path.display()))?;
    config.credentials = Credentials::from_env();
    Ok(config)
}

fn install(opts: InstallOptions, config_path: &Path, tool_config: &mut ToolConfig) -> Result<()> {
    ui::banner();
    let config = match &opts.answers {
        Some(path) => load_answers(path)?,
        None => {
            let mut prompter = TerminalPrompter::default();
            Collector::new(&mut prompter, opts.mode)?.collect()?
        }
    };

    if opts.dry_run {
        return dry_run(&config, tool_config);
    }

    preflight::require_root()?;
    let code = &config.code_name;
    let journal = tool_config.journal_path(code);
    if journal.exists() {
        anyhow::bail!(
            "an unfinished run of `{code}` left {}; run `appforge rollback {code}` first",
            journal.display()
        );
    }
    let _lock = AppLock::acquire(&tool_config.lock_dir, code)?;

    let host = SystemHost::new(tool_config.command_timeout());
    let ctx = HostContext::new(&host, tool_config.timeouts());
    let mut log = ResourceLog::with_journal(&journal);

    match deploy::install(ctx, &config, &mut log) {
        Ok(report) => {
            ui::installed(&report);
            tool_config.last_code_name = Some(code.to_string());
            tool_config.last_domain = Some(config.domain.to_string());
            config::save(config_path, tool_config)?;
            Ok(())
        }
        Err(failure) => {
            if let Some(report) = &failure.teardown {
                ui::teardown(report);
            }
            Err(anyhow::Error::new(failure.error).context(format!("install of `{code}` failed")))
        }
    }
}

/// Runs the whole workflow against an in-memory host seeded with the real
/// listening ports, then prints what would have been executed.
fn dry_run(config: &ProvisioningConfig, tool_config: &ToolConfig) -> Result<()> {
    let mut fake = FakeHost::new();
    match SystemHost::new(tool_config.command_timeout()).listening_ports() {
        Ok(ports) => {
            for port in ports {
                fake = fake.with_listening(port);
            }
        }
        Err(err) => warn!(error = %err, "could not read socket tables, assuming no ports in use"),
    }

    let ctx = HostContext::new(&fake, tool_config.timeouts());
    let mut log = ResourceLog::in_memory();
    let outcome = deploy::install(ctx, config, &mut log);
    ui::planned(&fake.commands());
    match outcome {
        Ok(_) => Ok(()),
        Err(failure) => Err(anyhow::Error::new(failure.error).context("dry run stopped early")),
    }
}

fn resolve_code_name(given: Option<String>, tool_config: &ToolConfig) -> Result<CodeName> {
    let raw = match given.or_else(|| tool_config.last_code_name.clone()) {
        Some(raw) => raw,
        None => TerminalPrompter::default().input("Code name to uninstall", &validate::code_name)?,
    };
    Ok(CodeName::try_from(raw)?)
}

fn uninstall(opts: UninstallOptions, config_path: &Path, tool_config: &mut ToolConfig) -> Result<()> {
    let code = resolve_code_name(opts.code_name, tool_config)?;
    preflight::require_root()?;

    if !opts.yes {
        let question = format!("Remove `{code}` with its user, files, unit and site?");
        if !TerminalPrompter::default().confirm(&question, false)? {
            ui::info("nothing removed");
            return Ok(());
        }
    }

    let _lock = AppLock::acquire(&tool_config.lock_dir, &code)?;
    let host = SystemHost::new(tool_config.command_timeout());
    let report = teardown::uninstall(&host, &code, &tool_config.journal_path(&code))?;
    ui::teardown(&report);

    if tool_config.last_code_name.as_deref() == Some(code.as_str()) {
        tool_config.last_code_name = None;
        tool_config.last_domain = None;
        config::save(config_path, tool_config)?;
    }
    ui::success(format!("{code} uninstalled"));
    Ok(())
}

fn rollback(code_name: &str, tool_config: &ToolConfig) -> Result<()> {
    let code = CodeName::try_from(code_name)?;
    preflight::require_root()?;
    let _lock = AppLock::acquire(&tool_config.lock_dir, &code)?;

    let host = SystemHost::new(tool_config.command_timeout());
    let report = teardown::rollback(&host, &tool_config.journal_path(&code))?;
    ui::teardown(&report);
    Ok(())
}

fn render(answers: &Path) -> Result<()> {
    let config = load_answers(answers)?;
    let (unit, site) = deploy::render(&config)?;
    println!("# {}", paths::unit_path(&config.code_name).display());
    println!("{unit}");
    println!("# {}", paths::site_path(&config.code_name).display());
    println!("{site}");
    Ok(())
}

fn status(code_name: &str, tool_config: &ToolConfig) -> Result<()> {
    let code = CodeName::try_from(code_name)?;
    let host = SystemHost::new(tool_config.command_timeout());
    let status = services::status(&host, &code, &tool_config.journal_path(&code))?;
    println!("{status}");
    if status.healthy() {
        ui::success("healthy");
    } else {
        ui::warn("not fully running");
    }
    Ok(())
}
