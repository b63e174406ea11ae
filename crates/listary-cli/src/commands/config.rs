//! Config command handlers

use anyhow::{Context, Result};

use listary_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "remote_db": config.remote_db_path(),
                    "user_id": config.user_id,
                    "refetch_debounce_ms": config.refetch_debounce_ms,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:            {}", config.data_dir.display());
            println!(
                "  remote_db:           {}",
                config.remote_db_path().display()
            );
            println!(
                "  user_id:             {}",
                config.user_id.as_deref().unwrap_or("(signed out)")
            );
            println!("  refetch_debounce_ms: {}", config.refetch_debounce_ms);
            println!(
                "  log_file:            {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;

    let value = if value == "none" { String::new() } else { value };
    config.set(&key, &value)?;
    config.save().context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}
