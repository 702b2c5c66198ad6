use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use log::info;

use surface_extract::pipeline::{self, format_size};
use surface_extract::{shards, HttpSource, PipelineConfig, Result, SurfaceStore};

#[derive(Parser)]
#[command(name = "surface-extract")]
#[command(
    about = "Download HeiGIT road surface shards and extract ML predictions into SQLite",
    long_about = "Downloads the HeiGIT road surface classification shards and extracts \
                  the rows with ML surface predictions into a compact SQLite database \
                  with an rtree spatial index.\n\n\
                  One shard number downloads that shard; two numbers download the \
                  inclusive range; omit both to download all 40 shards. Already-merged \
                  shards are skipped, so interrupted runs can simply be re-invoked."
)]
struct Cli {
    /// Shard number(s) to download (0-39)
    #[arg(value_name = "SHARD", num_args = 0..=2)]
    shards: Vec<u32>,

    /// Output directory
    #[arg(long, default_value = "data/surface")]
    out: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    // Validate selectors before touching the network or the database.
    let shard_list = shards::resolve_range(&cli.shards)?;

    std::fs::create_dir_all(&cli.out)?;
    let db_path = cli.out.join("heigit-surface.sqlite");

    let mut store = SurfaceStore::open(&db_path)?;
    let source = HttpSource::new(shards::BASE_URL)?;
    let config = PipelineConfig::new(shard_list);

    let started = Instant::now();
    let summary = pipeline::run(&mut store, &source, &config)?;
    let unique_ways = store.record_count()?;

    let db_size = std::fs::metadata(&db_path)
        .map(|m| format_size(m.len()))
        .unwrap_or_else(|_| "n/a".to_string());

    info!("done in {:.1} minutes", started.elapsed().as_secs_f64() / 60.0);
    info!("  shards processed this run: {}", summary.processed);
    info!("  shards skipped (already done): {}", summary.skipped);
    info!("  shards failed (retryable): {}", summary.failed);
    info!("  total rows scanned: {}", summary.rows_scanned);
    info!("  ML predictions extracted: {}", summary.rows_extracted);
    info!("  unique ways in {}: {} ({})", db_path.display(), unique_ways, db_size);

    Ok(())
}
