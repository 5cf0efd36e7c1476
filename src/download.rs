//! HTTP downloads with progress tracking and checksum verification

use crate::error::Result;
use anyhow::{Context, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Whether `source` should be fetched over HTTP rather than read from disk
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// SHA256 checksum verification
pub async fn verify_checksum(file_path: &Path, expected: &str) -> Result<bool> {
    use sha2::{Digest, Sha256};
    use tokio::io::AsyncReadExt;

    let mut file = fs::File::open(file_path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let checksum = format!("{:x}", hasher.finalize());
    debug!("sha256 {} = {}", file_path.display(), checksum);

    Ok(checksum.eq_ignore_ascii_case(expected.trim()))
}

/// Download `url` to `output_path`, showing a progress bar labelled `label`
pub async fn download_file(url: &str, output_path: &Path, label: &str) -> Result<PathBuf> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            .map_err(|e| anyhow!("Invalid progress template: {}", e))?
            .progress_chars("#>-"),
    );
    pb.set_message(format!("⬇ {}", label));

    debug!("Downloading {} -> {}", url, output_path.display());
    let client = reqwest::Client::new();
    let mut response = client
        .get(url)
        .send()
        .await
        .context("Failed to send request")?
        .error_for_status()?;

    if let Some(total) = response.content_length() {
        pb.set_length(total);
    }

    let mut file = fs::File::create(output_path)
        .await
        .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;
    let mut downloaded: u64 = 0;

    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }

    file.flush().await?;
    pb.finish_with_message(format!("✓ {}", label));

    Ok(output_path.to_path_buf())
}

/// Resolve `source` to a local file, downloading into `dest_dir` if it is a URL.
///
/// When `sha256` is given the file is verified and removed on mismatch.
pub async fn fetch(source: &str, dest_dir: &Path, sha256: Option<&str>) -> Result<PathBuf> {
    let path = if is_url(source) {
        let file_name = source
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| anyhow!("Cannot derive a file name from URL: {}", source))?;
        let file_name = file_name.split('?').next().unwrap_or(file_name);
        download_file(source, &dest_dir.join(file_name), file_name).await?
    } else {
        let path = PathBuf::from(source);
        if !path.is_file() {
            return Err(anyhow!("Archive not found: {}", path.display()).into());
        }
        path
    };

    if let Some(expected) = sha256 {
        if !verify_checksum(&path, expected).await? {
            if is_url(source) {
                fs::remove_file(&path).await?;
            }
            return Err(anyhow!("Checksum verification failed for {}", path.display()).into());
        }
    }

    Ok(path)
}
