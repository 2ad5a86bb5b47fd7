use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::collect::Mode;

#[derive(Parser, Debug)]
#[command(name = "appforge")]
#[command(about = "Provision a Node.js or FastAPI application behind nginx", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Without a command, pick install or uninstall interactively
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision and start an application
    Install {
        #[command(flatten)]
        opts: InstallOptions,
    },
    /// Remove an installed application and everything it owns
    Uninstall {
        #[command(flatten)]
        opts: UninstallOptions,
    },
    /// Undo an install that was interrupted or crashed
    Rollback {
        /// Code name of the application
        code_name: String,
    },
    /// Print the unit file and nginx site for an answers file
    Render {
        /// JSON answers file
        #[arg(long)]
        answers: PathBuf,
    },
    /// Show what is installed for an application
    Status {
        /// Code name of the application
        code_name: String,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct InstallOptions {
    /// Prompting mode; asked interactively when omitted
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Read the configuration from a JSON answers file instead of prompting
    #[arg(long)]
    pub answers: Option<PathBuf>,

    /// Print the planned commands without touching the host
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct UninstallOptions {
    /// Code name of the application; defaults to the last one installed
    pub code_name: Option<String>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}
