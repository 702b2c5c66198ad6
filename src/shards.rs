//! Shard catalog for the HeiGIT road surface dataset.
//!
//! The US dataset is published as 40 uniformly-named GeoPackage files on an
//! unauthenticated bulk endpoint. This module maps shard numbers to names
//! and URLs and resolves command-line selectors into a concrete shard list.

use crate::error::{Result, SurfaceError};

/// Number of shards in the published dataset.
pub const NUM_SHARDS: u32 = 40;

/// Base URL serving the shard files.
pub const BASE_URL: &str =
    "https://warm.storage.heigit.org/heigit-hdx-public/mapillary_road_surface_missing_countries";

/// File name of shard `n`.
pub fn shard_filename(n: u32) -> String {
    format!("heigit_usa_roadsurface_lines_{}.gpkg", n)
}

/// Full download URL of shard `n`.
pub fn shard_url(base_url: &str, n: u32) -> String {
    format!("{}/{}", base_url, shard_filename(n))
}

fn check_bounds(n: u32) -> Result<u32> {
    if n >= NUM_SHARDS {
        return Err(SurfaceError::InvalidShard(format!(
            "shard number must be 0-{}, got {}",
            NUM_SHARDS - 1,
            n
        )));
    }
    Ok(n)
}

/// Resolve positional selectors into the list of shards to process.
///
/// No selectors means the full shard set. One selector means that shard
/// only. Two selectors mean an inclusive range; a reversed range is
/// rejected rather than silently resolving to nothing.
pub fn resolve_range(selectors: &[u32]) -> Result<Vec<u32>> {
    match selectors {
        [] => Ok((0..NUM_SHARDS).collect()),
        [n] => Ok(vec![check_bounds(*n)?]),
        [lo, hi] => {
            let lo = check_bounds(*lo)?;
            let hi = check_bounds(*hi)?;
            if lo > hi {
                return Err(SurfaceError::InvalidShard(format!(
                    "range start {} is greater than range end {}",
                    lo, hi
                )));
            }
            Ok((lo..=hi).collect())
        }
        _ => Err(SurfaceError::InvalidShard(
            "provide at most two shard numbers (start and end of range)".to_string(),
        )),
    }
}
