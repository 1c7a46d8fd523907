//! Entities command handler

use anyhow::{Context, Result};

use offsync_core::{Config, Notifier, OptimisticOverlay};

use crate::context::open_for_inspection;
use crate::output::Output;

/// List locally cached entities, optimistic and synced
pub fn list(config: &Config, kind: Option<String>, output: &Output) -> Result<()> {
    let overlay = OptimisticOverlay::new(open_for_inspection(config)?, Notifier::new());
    let entities = overlay
        .list(kind.as_deref())
        .context("Failed to read entities")?;
    output.print_entities(&entities);
    Ok(())
}
