//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use offsync_core::{
    DrainReport, OptimisticEntity, QueuedAsset, QueuedOperation, RemoteResponse, SyncEvent,
};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print queued operations
    pub fn print_operations(&self, operations: &[QueuedOperation]) {
        match self.format {
            OutputFormat::Human => {
                if operations.is_empty() {
                    println!("Queue is empty.");
                    return;
                }
                for op in operations {
                    println!(
                        "{:>6} | {:<10} | {:<6} | {} | {}",
                        op.id,
                        op.status.as_str(),
                        op.method.as_str(),
                        truncate(&op.target_path, 40),
                        op.enqueued_at.format("%Y-%m-%d %H:%M")
                    );
                    if let Some(ref error) = op.last_error {
                        println!(
                            "       last error (attempt {}): {}",
                            op.attempts,
                            truncate_line(error, 60)
                        );
                    }
                }
                println!("\n{} operation(s)", operations.len());
            }
            OutputFormat::Json => {
                let json: Vec<_> = operations
                    .iter()
                    .map(|op| {
                        serde_json::json!({
                            "id": op.id,
                            "status": op.status,
                            "method": op.method,
                            "target_path": op.target_path,
                            "kind": op.kind,
                            "payload": op.payload_json(),
                            "enqueued_at": op.enqueued_at,
                            "last_attempt_at": op.last_attempt_at,
                            "attempts": op.attempts,
                            "last_error": op.last_error,
                            "entity_ref": op.entity_ref
                        })
                    })
                    .collect();
                println!("{}", pretty(&json));
            }
            OutputFormat::Quiet => {
                for op in operations {
                    println!("{}", op.id);
                }
            }
        }
    }

    /// Print queued assets (without their content)
    pub fn print_assets(&self, assets: &[QueuedAsset]) {
        match self.format {
            OutputFormat::Human => {
                if assets.is_empty() {
                    println!("No assets waiting for upload.");
                    return;
                }
                for asset in assets {
                    println!(
                        "{} | {} | {} | {} bytes | {} attempt(s)",
                        asset.id,
                        truncate(&asset.name, 30),
                        asset.mime_type,
                        asset.size_bytes,
                        asset.attempts
                    );
                }
                println!("\n{} asset(s)", assets.len());
            }
            OutputFormat::Json => {
                let json: Vec<_> = assets
                    .iter()
                    .map(|asset| {
                        serde_json::json!({
                            "id": asset.id,
                            "name": asset.name,
                            "mime_type": asset.mime_type,
                            "size_bytes": asset.size_bytes,
                            "enqueued_at": asset.enqueued_at,
                            "attempts": asset.attempts,
                            "last_error": asset.last_error
                        })
                    })
                    .collect();
                println!("{}", pretty(&json));
            }
            OutputFormat::Quiet => {
                for asset in assets {
                    println!("{}", asset.id);
                }
            }
        }
    }

    /// Print cached entities
    pub fn print_entities(&self, entities: &[OptimisticEntity]) {
        match self.format {
            OutputFormat::Human => {
                if entities.is_empty() {
                    println!("No entities found.");
                    return;
                }
                for entity in entities {
                    println!(
                        "{:<12} | {:<10} | {:<7} | {}",
                        truncate(&entity.id, 12),
                        truncate(&entity.kind, 10),
                        entity.sync_status.as_str(),
                        truncate(&entity.payload.to_string(), 50)
                    );
                }
                println!("\n{} entit(y/ies)", entities.len());
            }
            OutputFormat::Json => {
                let views: Vec<_> = entities.iter().map(|e| e.to_view()).collect();
                println!("{}", pretty(&views));
            }
            OutputFormat::Quiet => {
                for entity in entities {
                    println!("{}", entity.id);
                }
            }
        }
    }

    /// Print a remote (or synthetic) response
    pub fn print_response(&self, response: &RemoteResponse) {
        let body = response.body_json();
        match self.format {
            OutputFormat::Human => {
                let queued = body
                    .as_ref()
                    .and_then(|b| b.get("queued"))
                    .and_then(|q| q.as_bool())
                    .unwrap_or(false);
                let label = if queued { " (queued, will sync later)" } else { "" };
                println!("Status: {}{}", response.status, label);
                match body {
                    Some(ref json) => println!("{}", pretty(json)),
                    None if !response.body.is_empty() => println!("{}", response.body_excerpt()),
                    None => {}
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "status": response.status,
                        "body": body.unwrap_or_else(|| response.body_excerpt().into())
                    })
                );
            }
            OutputFormat::Quiet => {
                println!("{}", response.status);
            }
        }
    }

    /// Print the counters of a drain pass
    pub fn print_report(&self, report: &DrainReport) {
        match self.format {
            OutputFormat::Human => {
                let mark = if report.aborted { "⚠" } else { "✓" };
                println!(
                    "{} Synced {}, failed {}, rejected {}",
                    mark, report.synced, report.failed, report.rejected
                );
                if report.assets_uploaded + report.assets_failed > 0 {
                    println!(
                        "  Assets: {} uploaded, {} failed",
                        report.assets_uploaded, report.assets_failed
                    );
                }
                if report.recovered > 0 {
                    println!("  Recovered {} interrupted operation(s)", report.recovered);
                }
                if report.aborted {
                    println!("  Stopped early: the server became unreachable");
                }
            }
            OutputFormat::Json => {
                println!("{}", pretty(report));
            }
            OutputFormat::Quiet => {
                println!("{}", report.synced);
            }
        }
    }

    /// Print one engine event as a single line
    pub fn print_event(&self, event: &SyncEvent) {
        match self.format {
            OutputFormat::Human => println!("{}", describe_event(event)),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "event": describe_event(event) }));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn describe_event(event: &SyncEvent) -> String {
    match event {
        SyncEvent::SyncSuccess(op) => {
            format!("synced    #{} {} {}", op.id, op.method, op.target_path)
        }
        SyncEvent::SyncFailed {
            operation,
            error,
            rejected,
        } => format!(
            "{}  #{} {} {}: {}",
            if *rejected { "rejected" } else { "failed  " },
            operation.id,
            operation.method,
            operation.target_path,
            truncate_line(error, 60)
        ),
        SyncEvent::SyncCompleted(count) => format!("completed {} operation(s) delivered", count),
        SyncEvent::AssetResolved {
            temp_id,
            remote_ref,
        } => format!("uploaded  {} -> {}", temp_id, remote_ref),
        SyncEvent::AssetFailed { asset_id, error } => {
            format!("upload failed {}: {}", asset_id, truncate_line(error, 60))
        }
        SyncEvent::EntityRemapped { temp_id, server_id } => {
            format!("remapped  {} -> {}", temp_id, server_id)
        }
        SyncEvent::ConnectivityChanged(state) => {
            if state.is_online {
                "online".to_string()
            } else {
                "offline".to_string()
            }
        }
    }
}

fn pretty<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::ConnectivityState;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ñññññññññññ", 5), "ññ...");
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("single line", 20), "single line");
        assert_eq!(truncate_line("line one\nline two", 20), "line one");
    }

    #[test]
    fn test_describe_event() {
        assert_eq!(
            describe_event(&SyncEvent::EntityRemapped {
                temp_id: "temp_1".into(),
                server_id: "42".into()
            }),
            "remapped  temp_1 -> 42"
        );
        assert_eq!(
            describe_event(&SyncEvent::ConnectivityChanged(ConnectivityState::new(false))),
            "offline"
        );
    }
}
