//! Configuration view and validation commands: `devagent config`.

use anyhow::{Context, Result};
use std::path::Path;

use devagent::config::{AgentToml, DEFAULT_CONFIG_FILE};

use super::super::ConfigCommands;

fn source_description(explicit: Option<&Path>) -> String {
    match explicit {
        Some(path) => path.display().to_string(),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => DEFAULT_CONFIG_FILE.to_string(),
        None => "built-in defaults".to_string(),
    }
}

pub fn cmd_config(
    config: &AgentToml,
    explicit: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!("# Source: {} (with environment overrides)", source_description(explicit));
            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            print!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }
    Ok(())
}
