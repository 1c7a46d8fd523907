//! Submit command handler

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;

use offsync_core::{Config, DrainOutcome, Method, SubmitOptions};

use crate::context::AppContext;
use crate::output::Output;

pub struct SubmitArgs {
    pub method: String,
    pub path: String,
    pub data: Option<String>,
    pub kind: Option<String>,
    pub optimistic: bool,
    pub offline: bool,
}

/// Send a write through the mutation facade
pub async fn submit(config: Config, args: SubmitArgs, output: &Output) -> Result<()> {
    let method: Method = args.method.parse().map_err(|e: String| anyhow!(e))?;
    let payload = match args.data {
        Some(ref data) => parse_payload(data)?,
        None => Value::Null,
    };

    let ctx = AppContext::open(config, args.offline).await?;

    // Earlier queued writes go first, otherwise this one would overtake them
    if ctx.monitor.is_online() && ctx.engine.has_pending_work()? {
        match ctx.engine.drain().await? {
            DrainOutcome::Completed(report) if report.aborted => {
                output.message("Server became unreachable while syncing earlier writes.");
            }
            DrainOutcome::LeaseHeld => {
                output.message("Another process is syncing; this write will be queued behind it.");
            }
            _ => {}
        }
        if ctx.engine.has_pending_work()? {
            ctx.monitor.platform_signal(false).await;
        }
    }

    let mut options = match args.kind {
        Some(kind) => SubmitOptions::kind(kind),
        None => SubmitOptions::default(),
    };
    if !args.optimistic {
        options = options.without_optimistic();
    }

    let response = ctx
        .facade
        .submit(&args.path, method, &payload, options)
        .await?;
    output.print_response(&response);

    Ok(())
}

/// Inline JSON, or `@file` to read it from disk
fn parse_payload(data: &str) -> Result<Value> {
    let text = match data.strip_prefix('@') {
        Some(file) => std::fs::read_to_string(Path::new(file))
            .with_context(|| format!("Failed to read payload file: {}", file))?,
        None => data.to_string(),
    };
    serde_json::from_str(&text).context("Payload is not valid JSON")
}
