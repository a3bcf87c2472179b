// src/fetch/mod.rs
//! Remote retrieval of raw dataset files.

#[cfg(test)]
pub(crate) mod test_server;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt, time::Instant};
use tracing::{debug, info, instrument};

use crate::config::{DatasetDescriptor, HttpConfig};

/// Puts the bytes behind a descriptor's remote location at its raw path.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the number of bytes written.
    async fn fetch(&self, desc: &DatasetDescriptor) -> Result<u64>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.timeout())
            .connect_timeout(cfg.connect_timeout())
            .user_agent(cfg.user_agent.as_str())
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(level = "info", skip(self, desc), fields(dataset = %desc.name))]
    async fn fetch(&self, desc: &DatasetDescriptor) -> Result<u64> {
        let start = Instant::now();
        let bytes = download(&self.client, &desc.url, &desc.raw_path).await?;
        info!(bytes, elapsed = ?start.elapsed(), path = %desc.raw_path.display(), "downloaded");
        Ok(bytes)
    }
}

/// `<dest>.part`, where the body is streamed before the final rename.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Download `url` to `dest`. The destination only changes once the whole
/// body has arrived; on any failure the partial file is removed.
pub async fn download(client: &Client, url: &str, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let part = part_path(dest);

    match stream_to_file(client, url, &part).await {
        Ok(written) => {
            fs::rename(&part, dest)
                .await
                .with_context(|| format!("renaming {} -> {}", part.display(), dest.display()))?;
            Ok(written)
        }
        Err(e) => {
            let _ = fs::remove_file(&part).await;
            Err(e)
        }
    }
}

async fn stream_to_file(client: &Client, url: &str, part: &Path) -> Result<u64> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {}", url))?;
    if resp.status() != StatusCode::OK {
        bail!("GET {} returned {}", url, resp.status());
    }
    let expected = resp.content_length();

    let mut file = fs::File::create(part)
        .await
        .with_context(|| format!("creating {}", part.display()))?;
    let mut body = resp.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.with_context(|| format!("reading body from {}", url))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if let Some(expected) = expected {
        if written != expected {
            bail!("partial transfer: received {} of {} bytes", written, expected);
        }
    }
    debug!(written, "body complete");
    Ok(written)
}
