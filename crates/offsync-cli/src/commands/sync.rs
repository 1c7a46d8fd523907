//! Sync command handler

use anyhow::{bail, Result};

use offsync_core::{Config, DrainOutcome};

use crate::context::AppContext;
use crate::output::Output;

/// Run one drain pass against the configured server
pub async fn sync(config: Config, output: &Output) -> Result<()> {
    if config.server_url.is_none() {
        bail!(
            "Server URL not configured. Set it with:\n  \
             offsync config set server_url https://your-server"
        );
    }

    let ctx = AppContext::open(config, false).await?;
    if !ctx.monitor.is_online() {
        bail!(
            "Server {} is not reachable; queued work stays until it is",
            ctx.config.server_url.as_deref().unwrap_or_default()
        );
    }

    let (subscription, mut events) = ctx.engine.events().channel();
    let outcome = ctx.engine.drain().await?;
    ctx.engine.unsubscribe(subscription);

    while let Ok(event) = events.try_recv() {
        output.print_event(&event);
    }

    match outcome {
        DrainOutcome::Completed(report) => output.print_report(&report),
        DrainOutcome::LeaseHeld => {
            output.message("Another process is already syncing; try again later.")
        }
        DrainOutcome::Coalesced => output.message("A sync is already running."),
        DrainOutcome::Offline => output.message("Offline; nothing was sent."),
    }

    Ok(())
}
