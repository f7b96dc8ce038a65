use anyhow::{Context as _, Result};
use clap::Parser;

mod cli;
mod commands;

use app_guard::usage_limits::EngineConfig;
use cli::{Args, Commands, ConfigCommands, PauseCommands, PolicyCommands, UsageCommands};
use commands::Context;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let config_path = commands::resolve_config_path(args.config.as_deref())?;
    let config = EngineConfig::load(&config_path)?;

    commands::utils::init_logging(args.verbose, &config.logging.level);

    match args.command {
        Commands::Run => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
            runtime.block_on(commands::engine::run(config))
        }
        Commands::Policy { command } => {
            let ctx = Context::open(&config)?;
            match command {
                PolicyCommands::Add { app, name, limit } => commands::policy::add(&ctx, &app, name, limit),
                PolicyCommands::Block { app, name, minutes } => {
                    commands::policy::block(&ctx, &app, name, minutes)
                }
                PolicyCommands::Remove { app } => commands::policy::remove(&ctx, &app),
                PolicyCommands::List => commands::policy::list(&ctx),
            }
        }
        Commands::Event { transition, app_id } => {
            let ctx = Context::open(&config)?;
            commands::event::record(&ctx, transition.into(), &app_id)
        }
        Commands::Usage { command } => {
            let ctx = Context::open(&config)?;
            match command {
                UsageCommands::Today { app_id } => commands::usage::today(&ctx, &app_id),
                UsageCommands::Stats { period } => commands::usage::stats(&ctx, period),
            }
        }
        Commands::Pause { command } => {
            let ctx = Context::open(&config)?;
            match command {
                PauseCommands::Status { app_id } => commands::pause::status(&ctx, &app_id),
                PauseCommands::Grant { app_id } => commands::pause::grant(&ctx, &app_id),
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Init { force } => commands::config::init(&config_path, force),
            ConfigCommands::Show => commands::config::show(&config_path, &config),
        },
    }
}
