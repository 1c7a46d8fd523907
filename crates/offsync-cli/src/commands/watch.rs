//! Watch command handler
//!
//! Keeps a context alive: polls the server, drains on every reconnect and
//! prints engine events until interrupted.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{info, warn};

use offsync_core::{Config, DrainOutcome, TokioBackgroundExecutor};

use crate::context::AppContext;
use crate::output::Output;

pub async fn watch(config: Config, output: &Output) -> Result<()> {
    if config.server_url.is_none() {
        bail!(
            "Server URL not configured. Set it with:\n  \
             offsync config set server_url https://your-server"
        );
    }

    let ctx = AppContext::open(config, false).await?;
    let (subscription, mut events) = ctx.engine.events().channel();

    let polling = ctx.monitor.start_polling(ctx.config.poll_interval());
    let background = if ctx.config.background_sync {
        let executor =
            TokioBackgroundExecutor::new(ctx.config.poll_interval(), Some(Arc::clone(&ctx.monitor)));
        if ctx.engine.register_background(&executor) {
            info!("Background drain registered");
        }
        Some(executor)
    } else {
        None
    };

    output.message(&format!(
        "Watching {} ({}). Press Ctrl-C to stop.",
        ctx.config.server_url.as_deref().unwrap_or_default(),
        if ctx.monitor.is_online() { "online" } else { "offline" }
    ));

    // Deliver whatever is already queued
    if ctx.monitor.is_online() {
        if let DrainOutcome::Completed(report) = ctx.engine.drain().await? {
            output.print_report(&report);
        }
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => output.print_event(&event),
                None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Could not listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    ctx.engine.unsubscribe(subscription);
    ctx.engine.detach();
    polling.stop();
    if let Some(executor) = background {
        executor.shutdown();
    }
    output.message("Stopped.");

    Ok(())
}
