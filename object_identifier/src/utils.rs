//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use reqwest::Client;

/// Directory for downloaded models, e.g. `~/.cache/object_identifier` on Linux.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("object_identifier")
}

/// Download a file from a URL to a given filepath.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Make sure a file exists locally, downloading it from `url` if it is missing.
pub async fn ensure_file(client: &Client, url: &str, filepath: &Path) -> Result<()> {
    if filepath.exists() {
        log::debug!("Using cached {}", filepath.display());
        return Ok(());
    }

    if let Some(parent) = filepath.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    log::info!("Downloading {} to {}", url, filepath.display());

    // Download next to the target first so that an interrupted download is not mistaken for a
    // complete file on the next start.
    let partial = filepath.with_extension("part");
    download_file(client, url, &partial)
        .await
        .with_context(|| format!("failed to download {url}"))?;
    std::fs::rename(&partial, filepath)?;

    Ok(())
}

#[cfg(test)]
mod test {

    use super::*;

    #[tokio::test]
    async fn existing_file_is_not_downloaded() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let filepath = dir.path().join("model.onnx");
        std::fs::write(&filepath, b"cached")?;

        // The URL is never requested for files which are already present
        ensure_file(&Client::new(), "http://127.0.0.1:9/model.onnx", &filepath).await?;
        assert_eq!(std::fs::read(&filepath)?, b"cached");

        Ok(())
    }

    #[tokio::test]
    async fn failed_download_leaves_no_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let filepath = dir.path().join("models").join("model.onnx");

        let result = ensure_file(&Client::new(), "http://127.0.0.1:9/model.onnx", &filepath).await;
        assert!(result.is_err());
        assert!(!filepath.exists());

        Ok(())
    }
}
