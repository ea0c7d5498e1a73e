//! Configuration commands.

use crate::config::HarvestConfig;

/// Print the effective configuration (file, then environment) as TOML.
pub fn cmd_config_show(config: &HarvestConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}
