use anyhow::{Context as _, Result};
use std::path::Path;

use app_guard::usage_limits::EngineConfig;

/// Write a default configuration file
pub fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Configuration file already exists: {}\nUse --force to overwrite",
            path.display()
        );
    }

    EngineConfig::default().save(path)?;

    println!("✓ Created configuration file: {}", path.display());
    Ok(())
}

/// Print the effective configuration and where records live
pub fn show(path: &Path, config: &EngineConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to serialize config")?;

    println!("# {}", path.display());
    if !path.exists() {
        println!("# (file not found, showing defaults)");
    }
    println!("{}", rendered.trim_end());
    println!();
    println!("# Data directory: {}", config.data_dir()?.display());

    Ok(())
}
