//! # surface-extract
//!
//! Consolidates the HeiGIT road surface classification dataset (~100GB
//! across 40 GeoPackage shards) into a single compact SQLite database of
//! ML-predicted surface types (paved/unpaved) keyed by OSM way ID.
//!
//! Most shard rows (~87%) carry no ML prediction and just echo OSM surface
//! tags; only the predicted rows are extracted. The output database keeps a
//! resume ledger of fully-merged shards, so a long multi-shard run can be
//! killed and re-invoked safely, and ends with an rtree spatial index for
//! bbox queries by downstream consumers.
//!
//! ## Quick start
//!
//! ```no_run
//! use surface_extract::{shards, HttpSource, PipelineConfig, SurfaceStore};
//!
//! let mut store = SurfaceStore::open("heigit-surface.sqlite".as_ref()).unwrap();
//! let source = HttpSource::new(shards::BASE_URL).unwrap();
//! let config = PipelineConfig::new(shards::resolve_range(&[0, 5]).unwrap());
//! let summary = surface_extract::pipeline::run(&mut store, &source, &config).unwrap();
//! println!("merged {} shards", summary.processed);
//! ```

// Unified error handling
pub mod error;
pub use error::{Result, SurfaceError};

// Shard catalog and range resolution
pub mod shards;

// GeoPackage shard reader
pub mod gpkg;
pub use gpkg::{ExtractStats, GpkgShard, SurfaceRecord, DEFAULT_BATCH_SIZE};

// Consolidated output store (records, ledger, rtree)
pub mod store;
pub use store::SurfaceStore;

// Shard download
pub mod http;
pub use http::{HttpSource, ShardSource};

// Sequential extract/merge/resume pipeline
pub mod pipeline;
pub use pipeline::{PipelineConfig, RunSummary};
