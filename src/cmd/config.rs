//! `branchyard config`.

use anyhow::{Result, bail};
use std::path::Path;

use branchyard::config::{CONFIG_FILE_NAME, Overrides, YardConfig};

use super::super::ConfigCommands;
use super::load_config;

pub fn cmd_config(
    project_dir: &Path,
    config_path: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let config = load_config(project_dir, config_path, Overrides::default())?;
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let config = YardConfig::load_or_default(config_path, project_dir)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init { force }) => {
            let path = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| project_dir.join(CONFIG_FILE_NAME));
            if path.exists() && !force {
                bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            std::fs::write(&path, YardConfig::default().to_toml()?)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}
