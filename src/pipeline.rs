//! The extract/merge/resume pipeline.
//!
//! Shards are processed strictly one at a time: consult the ledger,
//! download into a scoped temp file, stream prediction rows into the store
//! in atomic batches, then mark the shard complete. A download or
//! extraction failure only loses that shard; the run keeps going and the
//! unmarked shard is retried by the next invocation. The temp file is
//! removed on every path because it is a `NamedTempFile` dropped at the end
//! of the shard's scope.

use std::time::Instant;

use log::{error, info, warn};

use crate::error::Result;
use crate::gpkg::{ExtractStats, GpkgShard, DEFAULT_BATCH_SIZE};
use crate::http::ShardSource;
use crate::shards::shard_filename;
use crate::store::SurfaceStore;

/// Pipeline tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Shards to process this run, in order.
    pub shards: Vec<u32>,
    /// Rows per upsert transaction.
    pub batch_size: usize,
}

impl PipelineConfig {
    pub fn new(shards: Vec<u32>) -> Self {
        Self {
            shards,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Counters for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Shards newly merged this run.
    pub processed: u32,
    /// Shards skipped because the ledger already had them.
    pub skipped: u32,
    /// Shards that failed to download or extract (left retryable).
    pub failed: u32,
    pub rows_scanned: u64,
    pub rows_extracted: u64,
}

/// Process every requested shard, then rebuild the spatial index if
/// anything new was merged.
pub fn run(
    store: &mut SurfaceStore,
    source: &dyn ShardSource,
    config: &PipelineConfig,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let total = config.shards.len();

    for (idx, &shard) in config.shards.iter().enumerate() {
        let filename = shard_filename(shard);

        if store.is_processed(shard)? {
            info!(
                "[{}/{}] {} already processed, skipping",
                idx + 1,
                total,
                filename
            );
            summary.skipped += 1;
            continue;
        }

        info!("[{}/{}] processing {}", idx + 1, total, filename);
        let started = Instant::now();

        match process_shard(store, source, shard, config.batch_size) {
            Ok(stats) => {
                summary.processed += 1;
                summary.rows_scanned += stats.rows_scanned;
                summary.rows_extracted += stats.rows_extracted;
                if stats.rows_scanned == 0 {
                    warn!("  {} has an empty feature table", filename);
                }
                info!(
                    "  scanned {} rows, extracted {} predictions ({}) in {:.1?}",
                    stats.rows_scanned,
                    stats.rows_extracted,
                    percent(stats),
                    started.elapsed()
                );
            }
            Err(e) => {
                // Shard stays unmarked and is retried on the next run.
                summary.failed += 1;
                error!("  failed on {}: {}", filename, e);
            }
        }
    }

    if summary.processed > 0 {
        store.rebuild_spatial_index()?;
    }

    Ok(summary)
}

/// Download, extract and ledger-mark a single shard. The temp file is
/// deleted on drop whether this succeeds or fails.
fn process_shard(
    store: &mut SurfaceStore,
    source: &dyn ShardSource,
    shard: u32,
    batch_size: usize,
) -> Result<ExtractStats> {
    let tmp = tempfile::Builder::new()
        .prefix(&format!("heigit_shard_{}_", shard))
        .suffix(".gpkg")
        .tempfile()?;

    source.fetch(shard, tmp.path())?;
    info!(
        "  downloaded ({}), extracting predictions",
        format_size(std::fs::metadata(tmp.path())?.len())
    );

    let gpkg = GpkgShard::open(tmp.path())?;
    let stats = gpkg.extract_predictions(batch_size, |batch| store.upsert_batch(batch))?;

    // Marked only after every batch above has committed. A crash before
    // this line leaves the shard unmarked; retrying it is idempotent.
    store.mark_processed(shard)?;
    Ok(stats)
}

/// ML-prediction share of a shard, guarded against empty shards.
fn percent(stats: ExtractStats) -> String {
    if stats.rows_scanned == 0 {
        return "n/a".to_string();
    }
    format!(
        "{:.1}%",
        stats.rows_extracted as f64 * 100.0 / stats.rows_scanned as f64
    )
}

/// Human-readable byte count.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}
