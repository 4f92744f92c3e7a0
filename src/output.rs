use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use tracing::info;

use crate::model::BookRecord;

/// Dump `books` as a pretty JSON array to `path`, creating parent directories.
pub async fn write_json(books: &[BookRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(books).context("failed to serialize books")?;
    fs::write(path, json)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), books = books.len(), "wrote books to file");
    Ok(())
}

/// Read back a dump written by [`write_json`].
pub async fn read_json(path: &Path) -> Result<Vec<BookRecord>> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid books file {}", path.display()))
}
