//! Queue command handlers

use anyhow::{Context, Result};

use offsync_core::{Config, DurableStore, OperationQueue};

use crate::context::open_for_inspection;
use crate::output::Output;

/// List every queued operation
pub fn list(config: &Config, output: &Output) -> Result<()> {
    let queue = OperationQueue::new(open_for_inspection(config)?);
    let operations = queue.list_all().context("Failed to read queue")?;
    output.print_operations(&operations);
    Ok(())
}

/// List operations the server refused
pub fn rejected(config: &Config, output: &Output) -> Result<()> {
    let queue = OperationQueue::new(open_for_inspection(config)?);
    let operations = queue.list_rejected().context("Failed to read queue")?;
    if operations.is_empty() && !output.is_json() {
        output.message("No rejected operations.");
        return Ok(());
    }
    output.print_operations(&operations);
    Ok(())
}

/// Put a failed or rejected operation back on the retry path
pub fn retry(config: &Config, id: u64, output: &Output) -> Result<()> {
    let queue = writable_queue(config)?;
    queue.retry(id)?;
    output.success(&format!("Operation {} will be retried on the next sync", id));
    Ok(())
}

/// Drop an operation without sending it
pub fn discard(config: &Config, id: u64, output: &Output) -> Result<()> {
    let queue = writable_queue(config)?;
    queue.discard(id)?;
    output.success(&format!("Discarded operation {}", id));
    Ok(())
}

fn writable_queue(config: &Config) -> Result<OperationQueue> {
    let store = DurableStore::open(config).with_context(|| {
        format!("Failed to open database: {:?}", config.database_path())
    })?;
    Ok(OperationQueue::new(std::sync::Arc::new(store)))
}
