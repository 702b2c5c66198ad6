//! GeoPackage shard reader.
//!
//! A GeoPackage is a SQLite file with a catalog (`gpkg_contents`,
//! `gpkg_geometry_columns`) describing its feature tables. Shards name
//! their feature table inconsistently, so the table and its rtree index are
//! discovered from the catalog rather than hard-coded.
//!
//! Extraction selects only rows carrying an ML surface prediction
//! (`pred_class IS NOT NULL`); the remaining ~87% of rows merely echo OSM
//! surface tags and are skipped. Results are streamed to a sink in
//! fixed-size batches so peak memory stays bounded on multi-GB shards.

use std::path::{Path, PathBuf};

use log::debug;
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::error::{Result, SurfaceError};

/// Default number of rows handed to the sink at a time.
pub const DEFAULT_BATCH_SIZE: usize = 50_000;

/// One extracted prediction row.
///
/// `n_predictions` is the count of Mapillary images backing the prediction
/// and acts as the confidence proxy during merges. The centroid is the
/// midpoint of the feature's rtree bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceRecord {
    pub osm_id: i64,
    /// 0.0 = paved, 1.0 = unpaved.
    pub pred_label: f64,
    pub n_predictions: Option<f64>,
    pub centroid_lat: Option<f64>,
    pub centroid_lng: Option<f64>,
}

/// Per-shard extraction counters for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    /// Total rows in the shard's feature table.
    pub rows_scanned: u64,
    /// Rows carrying an ML prediction.
    pub rows_extracted: u64,
}

/// Read-only handle on a downloaded shard file.
pub struct GpkgShard {
    conn: Connection,
    path: PathBuf,
}

impl GpkgShard {
    /// Open a shard file read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Discover the feature table and its rtree index table from the
    /// GeoPackage catalog.
    pub fn discover(&self) -> Result<(String, String)> {
        let table: Option<String> = self
            .conn
            .query_row(
                "SELECT table_name FROM gpkg_contents WHERE data_type = 'features' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let table = table.ok_or_else(|| SurfaceError::MissingFeatureTable {
            path: self.path.clone(),
        })?;

        let geom_column: Option<String> = self
            .conn
            .query_row(
                "SELECT column_name FROM gpkg_geometry_columns WHERE table_name = ?1",
                [&table],
                |row| row.get(0),
            )
            .optional()?;

        let geom_column = geom_column.ok_or_else(|| SurfaceError::MissingGeometryColumn {
            table: table.clone(),
            path: self.path.clone(),
        })?;

        let rtree_table = format!("rtree_{}_{}", table, geom_column);
        debug!(
            "discovered feature table '{}' with index '{}' in {}",
            table,
            rtree_table,
            self.path.display()
        );
        Ok((table, rtree_table))
    }

    /// Stream all prediction rows to `sink` in batches of `batch_size`.
    ///
    /// Each batch the sink sees is complete and non-empty; the final batch
    /// may be short. Returns the scanned/extracted counters.
    pub fn extract_predictions<F>(&self, batch_size: usize, mut sink: F) -> Result<ExtractStats>
    where
        F: FnMut(&[SurfaceRecord]) -> Result<()>,
    {
        let (table, rtree_table) = self.discover()?;

        let rows_scanned: u64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{}\"", table),
            [],
            |row| row.get(0),
        )?;

        let sql = format!(
            r#"
            SELECT
                f.osm_id,
                f.pred_label,
                f.n_of_predictions_used,
                (r.miny + r.maxy) / 2.0 AS centroid_lat,
                (r.minx + r.maxx) / 2.0 AS centroid_lng
            FROM "{}" f
            JOIN "{}" r ON r.id = f.fid
            WHERE f.pred_class IS NOT NULL
            "#,
            table, rtree_table
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(SurfaceRecord {
                osm_id: row.get(0)?,
                pred_label: row.get(1)?,
                n_predictions: row.get(2)?,
                centroid_lat: row.get(3)?,
                centroid_lng: row.get(4)?,
            })
        })?;

        let mut batch: Vec<SurfaceRecord> = Vec::with_capacity(batch_size);
        let mut rows_extracted: u64 = 0;

        for record in rows {
            batch.push(record?);
            if batch.len() >= batch_size {
                sink(&batch)?;
                rows_extracted += batch.len() as u64;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            sink(&batch)?;
            rows_extracted += batch.len() as u64;
        }

        Ok(ExtractStats {
            rows_scanned,
            rows_extracted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Build a minimal GeoPackage-shaped SQLite file for testing.
    fn write_shard(path: &Path, rows: &[(i64, Option<&str>, f64, f64, f64, f64)]) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE gpkg_contents (table_name TEXT, data_type TEXT);
            CREATE TABLE gpkg_geometry_columns (table_name TEXT, column_name TEXT);
            INSERT INTO gpkg_contents VALUES ('road_lines', 'features');
            INSERT INTO gpkg_geometry_columns VALUES ('road_lines', 'geom');
            CREATE TABLE road_lines (
                fid INTEGER PRIMARY KEY,
                osm_id INTEGER,
                pred_class TEXT,
                pred_label REAL,
                n_of_predictions_used REAL
            );
            CREATE TABLE rtree_road_lines_geom (
                id INTEGER PRIMARY KEY,
                minx REAL, maxx REAL, miny REAL, maxy REAL
            );
            "#,
        )
        .unwrap();

        for (fid, (osm_id, pred_class, pred_label, n_preds, lng, lat)) in
            rows.iter().enumerate()
        {
            let fid = fid as i64 + 1;
            conn.execute(
                "INSERT INTO road_lines VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![fid, osm_id, pred_class, pred_label, n_preds],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO rtree_road_lines_geom VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![fid, lng - 0.01, lng + 0.01, lat - 0.01, lat + 0.01],
            )
            .unwrap();
        }
    }

    #[test]
    fn test_discovers_table_and_index() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shard.gpkg");
        write_shard(&path, &[]);

        let shard = GpkgShard::open(&path).unwrap();
        let (table, rtree) = shard.discover().unwrap();
        assert_eq!(table, "road_lines");
        assert_eq!(rtree, "rtree_road_lines_geom");
    }

    #[test]
    fn test_missing_feature_table() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.gpkg");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE gpkg_contents (table_name TEXT, data_type TEXT);
             CREATE TABLE gpkg_geometry_columns (table_name TEXT, column_name TEXT);",
        )
        .unwrap();
        drop(conn);

        let shard = GpkgShard::open(&path).unwrap();
        assert!(matches!(
            shard.discover(),
            Err(SurfaceError::MissingFeatureTable { .. })
        ));
    }

    #[test]
    fn test_missing_geometry_column() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nogeom.gpkg");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE gpkg_contents (table_name TEXT, data_type TEXT);
             CREATE TABLE gpkg_geometry_columns (table_name TEXT, column_name TEXT);
             INSERT INTO gpkg_contents VALUES ('roads', 'features');",
        )
        .unwrap();
        drop(conn);

        let shard = GpkgShard::open(&path).unwrap();
        match shard.discover() {
            Err(SurfaceError::MissingGeometryColumn { table, .. }) => {
                assert_eq!(table, "roads")
            }
            other => panic!("expected MissingGeometryColumn, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_extracts_only_predicted_rows() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shard.gpkg");
        write_shard(
            &path,
            &[
                (100, Some("paved"), 0.0, 5.0, -71.0, 42.0),
                (101, None, 0.0, 0.0, -71.1, 42.1),
                (102, Some("unpaved"), 1.0, 2.0, -71.2, 42.2),
            ],
        );

        let shard = GpkgShard::open(&path).unwrap();
        let mut extracted = Vec::new();
        let stats = shard
            .extract_predictions(DEFAULT_BATCH_SIZE, |batch| {
                extracted.extend_from_slice(batch);
                Ok(())
            })
            .unwrap();

        assert_eq!(stats.rows_scanned, 3);
        assert_eq!(stats.rows_extracted, 2);
        assert_eq!(extracted.len(), 2);

        let paved = extracted.iter().find(|r| r.osm_id == 100).unwrap();
        assert_eq!(paved.pred_label, 0.0);
        assert_eq!(paved.n_predictions, Some(5.0));
        // Centroid is the bbox midpoint.
        assert!((paved.centroid_lat.unwrap() - 42.0).abs() < 1e-9);
        assert!((paved.centroid_lng.unwrap() - (-71.0)).abs() < 1e-9);

        assert!(!extracted.iter().any(|r| r.osm_id == 101));
    }

    #[test]
    fn test_batches_are_bounded() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("shard.gpkg");
        let rows: Vec<_> = (0..7)
            .map(|i| (1000 + i, Some("paved"), 0.0, 1.0, -70.0, 40.0))
            .collect();
        write_shard(&path, &rows);

        let shard = GpkgShard::open(&path).unwrap();
        let mut batch_sizes = Vec::new();
        let stats = shard
            .extract_predictions(3, |batch| {
                batch_sizes.push(batch.len());
                Ok(())
            })
            .unwrap();

        assert_eq!(stats.rows_extracted, 7);
        assert_eq!(batch_sizes, vec![3, 3, 1]);
    }
}
