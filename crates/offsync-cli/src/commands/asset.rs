//! Asset command handlers

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use offsync_core::{AssetQueue, Config};

use crate::context::{open_for_inspection, AppContext};
use crate::output::{Output, OutputFormat};

/// Queue a file for upload on the next sync
pub async fn add(
    config: Config,
    file: PathBuf,
    mime: Option<String>,
    output: &Output,
) -> Result<()> {
    let content =
        std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());
    let mime = mime.unwrap_or_else(|| guess_mime(&file).to_string());

    let ctx = AppContext::open(config, true).await?;
    let id = ctx.facade.submit_asset(&name, &mime, content)?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({"id": id, "name": name, "mime_type": mime})
            );
        }
        OutputFormat::Quiet => println!("{}", id),
        OutputFormat::Human => {
            println!("✓ Queued {} as {}", name, id);
            println!("  Reference it in payloads as \"{}\"; it is replaced on upload.", id);
        }
    }

    Ok(())
}

/// List assets waiting for upload
pub fn list(config: &Config, output: &Output) -> Result<()> {
    let assets = AssetQueue::new(open_for_inspection(config)?)
        .list_pending()
        .context("Failed to read asset queue")?;
    output.print_assets(&assets);
    Ok(())
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}
