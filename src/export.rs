//! Dataset export: one image file per result (two for pairs) plus a sidecar
//! caption `.txt`, all named by the zero-padded sequence id. A single bad
//! item is skipped and counted, not fatal.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use thiserror::Error;
use tracing::{info, warn};

use crate::events::RunObserver;
use crate::results::{ResultItem, ResultKind};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("nothing to export")]
    Empty,
    #[error("failed to create export directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub dir: PathBuf,
    /// Items fully written.
    pub exported: usize,
    /// Items skipped after a download or write failure.
    pub failed: usize,
    /// Files on disk, images and sidecars together.
    pub files: usize,
}

/// `lora_dataset_<UTC timestamp>` in the current directory.
pub fn default_export_dir() -> PathBuf {
    PathBuf::from(format!(
        "lora_dataset_{}",
        chrono::Utc::now().format("%Y%m%d_%H%M%S")
    ))
}

pub async fn export_dataset(
    items: &[ResultItem],
    out_dir: &Path,
    observer: &RunObserver,
) -> Result<ExportSummary, ExportError> {
    if items.is_empty() {
        return Err(ExportError::Empty);
    }

    tokio::fs::create_dir_all(out_dir)
        .await
        .map_err(|source| ExportError::CreateDir {
            path: out_dir.to_path_buf(),
            source,
        })?;

    let http = reqwest::Client::new();
    let mut summary = ExportSummary {
        dir: out_dir.to_path_buf(),
        exported: 0,
        failed: 0,
        files: 0,
    };

    for item in items {
        match write_item(&http, out_dir, item).await {
            Ok(files) => {
                summary.exported += 1;
                summary.files += files;
            }
            Err(e) => {
                warn!(id = %item.id, "export failed: {e:#}");
                observer.error(format!("Failed to export #{}: {e:#}", item.id));
                summary.failed += 1;
            }
        }
    }

    info!(
        dir = %out_dir.display(),
        exported = summary.exported,
        failed = summary.failed,
        "dataset export finished"
    );
    Ok(summary)
}

async fn write_item(
    http: &reqwest::Client,
    dir: &Path,
    item: &ResultItem,
) -> anyhow::Result<usize> {
    let images = match &item.kind {
        ResultKind::Pair {
            start_url, end_url, ..
        } => {
            save_image(http, &dir.join(format!("{}_start.png", item.id)), start_url).await?;
            save_image(http, &dir.join(format!("{}_end.png", item.id)), end_url).await?;
            2
        }
        ResultKind::Image { url, .. } => {
            save_image(http, &dir.join(format!("{}.png", item.id)), url).await?;
            1
        }
    };

    tokio::fs::write(dir.join(format!("{}.txt", item.id)), &item.text)
        .await
        .context("failed to write caption file")?;

    Ok(images + 1)
}

async fn save_image(http: &reqwest::Client, path: &Path, url: &str) -> anyhow::Result<()> {
    let resp = http
        .get(url)
        .send()
        .await
        .context("failed to download image")?;
    if !resp.status().is_success() {
        bail!("image download failed with HTTP {}", resp.status());
    }
    let bytes = resp.bytes().await.context("failed to read image bytes")?;

    tokio::fs::write(path, &bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
