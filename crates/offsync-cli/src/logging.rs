//! Logging setup
//!
//! Silent unless OFFSYNC_LOG is set (e.g. `OFFSYNC_LOG=debug`). Logs go to
//! `config.log_file` when configured, otherwise to stderr. `watch` always
//! logs connectivity changes at info level.

use std::fs::OpenOptions;

use tracing::info;
use tracing_subscriber::EnvFilter;

use offsync_core::Config;

/// Environment variable holding the log level or filter directives
const LOG_ENV: &str = "OFFSYNC_LOG";

pub fn init(config: &Config, long_running: bool) {
    let level = match std::env::var(LOG_ENV) {
        Ok(level) => level,
        Err(_) if long_running => "info".to_string(),
        Err(_) => return,
    };

    let env_filter = if level.contains('=') {
        EnvFilter::new(level)
    } else {
        EnvFilter::new(format!("offsync_core={},offsync={}", level, level))
    };

    if let Some(ref log_path) = config.log_file {
        let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
                return;
            }
        };

        // Ignore error if already initialized
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(log_file)
            .try_init();
        info!("Logging initialized to {:?}", log_path);
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}
