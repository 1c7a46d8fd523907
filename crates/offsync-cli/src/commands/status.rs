//! Status command handler

use anyhow::Result;

use offsync_core::Config;

use crate::context::AppContext;
use crate::output::{Output, OutputFormat};

/// Show connectivity, queue and lease state
pub async fn show(config: Config, output: &Output) -> Result<()> {
    let ctx = AppContext::open(config, false).await?;
    let engine = &ctx.engine;

    let online = ctx.monitor.is_online();
    let counts = engine.queue().counts()?;
    let assets = engine.assets().len()?;
    let entities = engine.overlay().list(None)?;
    let unsynced = entities.iter().filter(|e| e.is_pending()).count();
    let lease = engine.lease().current()?;
    let lease_live = lease
        .as_ref()
        .map(|l| l.is_live_at(chrono::Utc::now()))
        .unwrap_or(false);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "server_url": ctx.config.server_url,
                    "online": online,
                    "database": ctx.config.database_path(),
                    "queue": counts,
                    "assets_pending": assets,
                    "entities": {
                        "total": entities.len(),
                        "pending": unsynced
                    },
                    "lease": lease.filter(|_| lease_live).map(|l| serde_json::json!({
                        "owner": l.owner,
                        "expires_at": l.expires_at
                    }))
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", counts.total());
        }
        OutputFormat::Human => {
            println!("offsync Status");
            println!("==============");
            println!();
            println!("Connectivity:");
            match ctx.config.server_url {
                Some(ref url) => {
                    println!("  Server: {}", url);
                    println!("  State:  {}", if online { "online" } else { "offline" });
                }
                None => println!("  Server: (not set)"),
            }
            println!();
            println!("Queue:");
            println!("  Pending:    {}", counts.pending);
            println!("  Processing: {}", counts.processing);
            println!("  Failed:     {}", counts.failed);
            println!("  Rejected:   {}", counts.rejected);
            println!("  Assets:     {}", assets);
            println!();
            println!("Entities:");
            println!("  Cached:   {}", entities.len());
            println!("  Unsynced: {}", unsynced);
            if let Some(lease) = lease.filter(|_| lease_live) {
                println!();
                println!(
                    "Drain in progress (owner {}, until {})",
                    lease.owner,
                    lease.expires_at.format("%H:%M:%S")
                );
            }
            println!();
            println!("Storage: {}", ctx.config.database_path().display());
        }
    }

    Ok(())
}
