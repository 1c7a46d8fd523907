//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use offsync_core::Config;

use crate::output::{Output, OutputFormat};

const VALID_KEYS: &str = "data_dir, server_url, health_path, upload_path, poll_interval_secs, \
                          request_timeout_secs, lease_ttl_secs, background_sync, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("Failed to serialize config")?
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:             {}", config.data_dir.display());
            println!(
                "  server_url:           {}",
                config.server_url.as_deref().unwrap_or("(not set)")
            );
            println!("  health_path:          {}", config.health_path);
            println!("  upload_path:          {}", config.upload_path);
            println!("  poll_interval_secs:   {}", config.poll_interval_secs);
            println!("  request_timeout_secs: {}", config.request_timeout_secs);
            println!("  lease_ttl_secs:       {}", config.lease_ttl_secs);
            println!("  background_sync:      {}", config.background_sync);
            println!(
                "  log_file:             {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "server_url" => {
            config.server_url = optional(value).map(|url| url.trim_end_matches('/').to_string());
        }
        "health_path" => {
            config.health_path = path_value(value);
        }
        "upload_path" => {
            config.upload_path = path_value(value);
        }
        "poll_interval_secs" => {
            config.poll_interval_secs = seconds(key, value)?;
        }
        "request_timeout_secs" => {
            config.request_timeout_secs = seconds(key, value)?;
        }
        "lease_ttl_secs" => {
            config.lease_ttl_secs = seconds(key, value)?;
        }
        "background_sync" => {
            config.background_sync = value
                .parse()
                .context("Invalid value for background_sync. Use 'true' or 'false'.")?;
        }
        "log_file" => {
            config.log_file = optional(value).map(PathBuf::from);
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    Ok(())
}

fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn path_value(value: &str) -> String {
    if value.starts_with('/') {
        value.to_string()
    } else {
        format!("/{}", value)
    }
}

fn seconds(key: &str, value: &str) -> Result<u64> {
    let secs: u64 = value
        .parse()
        .with_context(|| format!("Invalid value for {}. Use a whole number of seconds.", key))?;
    if secs == 0 {
        bail!("{} must be at least 1", key);
    }
    Ok(secs)
}
