use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use app_guard::usage_limits::{ReportPeriod, Transition};

/// App Usage Guard
///
/// Enforces per-app daily time limits and block windows against the
/// foreground app, with a small number of pauses per day.
#[derive(Parser, Debug)]
#[command(name = "app-guard")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the enforcement loop in the foreground (Ctrl+C to stop)
    Run,
    /// Manage restriction policies
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
    /// Record a foreground transition in the event log
    Event {
        /// Whether the app entered or left the foreground
        #[arg(value_enum)]
        transition: TransitionArg,

        /// App identifier (bundle id, package name or executable)
        app_id: String,
    },
    /// Show usage statistics
    Usage {
        #[command(subcommand)]
        command: UsageCommands,
    },
    /// Inspect or use pause grants
    Pause {
        #[command(subcommand)]
        command: PauseCommands,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum PolicyCommands {
    /// Limit an app to a number of minutes per day
    Add {
        #[arg(long)]
        app: String,

        /// Display name (defaults to the app id)
        #[arg(long)]
        name: Option<String>,

        /// Daily limit in minutes
        #[arg(long)]
        limit: u32,
    },
    /// Block an app for the next N minutes
    Block {
        #[arg(long)]
        app: String,

        /// Display name (defaults to the app id)
        #[arg(long)]
        name: Option<String>,

        /// Length of the block window in minutes
        #[arg(long)]
        minutes: u32,
    },
    /// Remove the restriction for an app
    Remove {
        #[arg(long)]
        app: String,
    },
    /// List all restrictions
    List,
}

#[derive(Subcommand, Debug)]
pub enum UsageCommands {
    /// Minutes an app has been in the foreground today
    Today {
        app_id: String,
    },
    /// Usage histogram and per-app totals
    Stats {
        #[arg(long, default_value = "today")]
        period: ReportPeriod,
    },
}

#[derive(Subcommand, Debug)]
pub enum PauseCommands {
    /// Show pause state and remaining grants for an app
    Status {
        app_id: String,
    },
    /// Use one of today's pause grants for an app
    Grant {
        app_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionArg {
    Enter,
    Exit,
}

impl From<TransitionArg> for Transition {
    fn from(arg: TransitionArg) -> Self {
        match arg {
            TransitionArg::Enter => Transition::Enter,
            TransitionArg::Exit => Transition::Exit,
        }
    }
}
