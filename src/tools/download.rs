//! HTTP access to the tools feed and artifact downloads

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::feed::ToolFeed;

/// Connection timeout: time to establish the TCP connection.
///
/// There is no overall request timeout; artifacts can be large.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client shared by feed checks and downloads
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("rvpatch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

/// Fetch the tools feed.
///
/// Returns the parsed feed and the raw body, which is kept as a snapshot.
pub async fn fetch_feed(client: &HttpClient, url: &str) -> Result<(ToolFeed, String)> {
    let response = client
        .inner()
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch tools feed from {}", truncate_url(url)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Tools feed returned HTTP {} - {}", status.as_u16(), truncate_error(&body));
    }

    let body = response.text().await.context("Failed to read tools feed")?;
    let feed: ToolFeed = serde_json::from_str(&body).context("Failed to parse tools feed JSON")?;
    debug!("Tools feed lists {} artifacts", feed.tools.len());

    Ok((feed, body))
}

/// Download `url` to `output_path`.
///
/// Data is streamed into a `.part` file next to the destination and renamed
/// into place only when complete, so a failed download never leaves a file
/// that would later be resolved as a tool.
pub async fn download_file(client: &HttpClient, url: &str, output_path: &Path) -> Result<u64> {
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let part_path = part_path(output_path);
    let result = stream_to(client, url, &part_path).await;

    match result {
        Ok(bytes) => {
            tokio::fs::rename(&part_path, output_path)
                .await
                .with_context(|| format!("Failed to move download to {}", output_path.display()))?;
            Ok(bytes)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part_path).await;
            Err(e)
        }
    }
}

async fn stream_to(client: &HttpClient, url: &str, path: &Path) -> Result<u64> {
    let response = client
        .inner()
        .get(url)
        .send()
        .await
        .with_context(|| format!("Connection failed: {}", truncate_url(url)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("HTTP {} - {}", status.as_u16(), truncate_error(&body));
    }

    let pb = match response.content_length() {
        Some(len) => {
            let pb = ProgressBar::new(len);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} | {msg}")
                    .unwrap()
                    .progress_chars("=>-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };
    pb.set_message(
        path.file_name()
            .map(|n| n.to_string_lossy().trim_end_matches(".part").to_string())
            .unwrap_or_default(),
    );

    let mut file = File::create(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Error reading download stream")?;
        file.write_all(&chunk).await.context("Error writing to file")?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }
    file.flush().await.context("Failed to flush file")?;

    pb.finish_and_clear();
    Ok(downloaded)
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Truncate URL for error messages
fn truncate_url(url: &str) -> String {
    truncate(url, 80)
}

/// Truncate error body for display
fn truncate_error(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "No details".to_string()
    } else {
        truncate(trimmed, 100)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max - 3).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
