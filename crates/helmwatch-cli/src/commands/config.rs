//! Config command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::cli::{ConfigAction, EndpointArgs, OutputFormat};
use crate::config::{Config, default_config_path};
use crate::format::format_json;
use crate::util::write_output;

pub fn cmd_config(
    action: &ConfigAction,
    path: Option<&Path>,
    endpoints: &EndpointArgs,
    format: OutputFormat,
) -> Result<()> {
    let file: PathBuf = path.map_or_else(default_config_path, Path::to_path_buf);

    match action {
        ConfigAction::Path => write_output(&format!("{}\n", file.display())),
        ConfigAction::Show => {
            let config = effective_config(path, endpoints)?;
            let content = match format {
                OutputFormat::Json => format_json(&config)?,
                OutputFormat::Text => {
                    toml::to_string_pretty(&config).context("Failed to serialize config")?
                }
            };
            write_output(&content)
        }
        ConfigAction::Validate => {
            let config = effective_config(path, endpoints)?;
            config.validate()?;
            write_output(&format!("Configuration OK ({})\n", file.display()))
        }
        ConfigAction::Init { force } => {
            if file.exists() && !force {
                bail!(
                    "Config file already exists: {}\nUse --force to overwrite it.",
                    file.display()
                );
            }
            Config::default().save(&file)?;
            write_output(&format!("Wrote default configuration to {}\n", file.display()))
        }
    }
}

/// The file (or defaults) with command-line overrides applied.
fn effective_config(path: Option<&Path>, endpoints: &EndpointArgs) -> Result<Config> {
    let mut config = Config::load_from(path)?;
    config.apply_overrides(endpoints);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let endpoints = EndpointArgs::default();

        cmd_config(
            &ConfigAction::Init { force: false },
            Some(&path),
            &endpoints,
            OutputFormat::Text,
        )
        .unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        let again = cmd_config(
            &ConfigAction::Init { force: false },
            Some(&path),
            &endpoints,
            OutputFormat::Text,
        );
        assert!(again.is_err());

        cmd_config(
            &ConfigAction::Init { force: true },
            Some(&path),
            &endpoints,
            OutputFormat::Text,
        )
        .unwrap();
    }

    #[test]
    fn test_validate_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        Config::default().save(&path).unwrap();

        let endpoints = EndpointArgs {
            base_url: None,
            push_url: Some("http://not-a-websocket".to_string()),
        };
        let result = cmd_config(
            &ConfigAction::Validate,
            Some(&path),
            &endpoints,
            OutputFormat::Text,
        );
        assert!(result.unwrap_err().to_string().contains("push.url"));
    }
}
