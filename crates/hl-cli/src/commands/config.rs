//! Config command implementations

use anyhow::{Context, Result};

use super::CliContext;

/// Print the config file path
pub fn config_path(ctx: &CliContext) -> Result<()> {
    println!("{}", ctx.config_path().display());
    Ok(())
}

/// Print the effective configuration with credentials masked
pub fn config_show(ctx: &CliContext) -> Result<()> {
    let mut config = ctx.load_config()?;
    for host in &mut config.hosts {
        if host.credential.is_some() {
            host.credential = Some("********".to_string());
        }
    }

    let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
    println!("# {}", ctx.config_path().display());
    println!("{}", rendered);
    Ok(())
}
