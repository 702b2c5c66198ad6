//! Shard download over HTTP.
//!
//! Downloads are sequential and blocking from the pipeline's point of view:
//! the source owns a small tokio runtime and drives the streamed transfer
//! with `block_on`, writing chunks straight to the destination file so a
//! multi-GB shard never lives in memory.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use reqwest::Client;
use tokio::runtime::Runtime;

use crate::error::{Result, SurfaceError};
use crate::shards;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where shard files come from.
///
/// The pipeline only ever talks to this trait, so tests can substitute a
/// local fake and prove that ledger-marked shards are never re-fetched.
pub trait ShardSource {
    /// Fetch shard `n` into `dest`. On error the partial file is the
    /// caller's to discard (the pipeline downloads into a scoped temp file).
    fn fetch(&self, shard: u32, dest: &Path) -> Result<()>;
}

/// HTTP source for the public HeiGIT bulk endpoint.
pub struct HttpSource {
    client: Client,
    runtime: Runtime,
    base_url: String,
}

impl HttpSource {
    /// Create a source for the given base URL (no trailing slash).
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SurfaceError::Download {
                url: base_url.to_string(),
                source: e,
            })?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            client,
            runtime,
            base_url: base_url.to_string(),
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SurfaceError::Download {
                url: url.to_string(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(SurfaceError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let bar = match response.content_length() {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(
                    ProgressStyle::with_template(
                        "  {bar:40} {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta})",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
                );
                bar
            }
            None => ProgressBar::new_spinner(),
        };

        let mut file = File::create(dest)?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| SurfaceError::Download {
                url: url.to_string(),
                source: e,
            })?;
            file.write_all(&chunk)?;
            written += chunk.len() as u64;
            bar.set_position(written);
        }
        file.flush()?;
        bar.finish_and_clear();

        debug!("downloaded {} bytes from {}", written, url);
        Ok(())
    }
}

impl ShardSource for HttpSource {
    fn fetch(&self, shard: u32, dest: &Path) -> Result<()> {
        let url = shards::shard_url(&self.base_url, shard);
        info!("downloading {}", url);
        self.runtime.block_on(self.download(&url, dest))
    }
}
