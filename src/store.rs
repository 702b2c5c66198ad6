//! Consolidated surface prediction store.
//!
//! A single SQLite file holding three tables:
//!
//! - `surface`: one row per OSM way ID with the ML prediction, the
//!   confidence proxy (`n_predictions`) and a centroid coordinate.
//! - `metadata`: key/value pairs; `processed_file_{n}` entries form the
//!   resume ledger of fully-merged shards.
//! - `surface_rtree`: derived rtree of degenerate point boxes, rebuilt
//!   from scratch after each run that merged new shards.
//!
//! The store is the only shared mutable resource in the pipeline and is
//! passed in by the caller, so tests can substitute an in-memory database.

use std::path::Path;

use log::info;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::gpkg::SurfaceRecord;
use crate::shards::shard_filename;

/// Handle on the consolidated output database.
pub struct SurfaceStore {
    conn: Connection,
}

impl SurfaceStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS surface (
                osm_id INTEGER PRIMARY KEY,
                pred_label REAL NOT NULL,
                n_predictions REAL,
                centroid_lat REAL,
                centroid_lng REAL
            );

            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
    }

    // ========================================================================
    // Merge / upsert
    // ========================================================================

    /// Upsert a batch of extracted records in a single transaction.
    ///
    /// Conflict rule: the incoming row replaces the stored prediction,
    /// confidence and centroid only when its `n_predictions` is strictly
    /// greater (more Mapillary images backing the prediction). Ties and
    /// regressions keep the stored row. Each assignment reads the
    /// pre-update row, so mixed better/worse duplicates inside one batch
    /// converge to the same state regardless of ordering.
    pub fn upsert_batch(&mut self, records: &[SurfaceRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                r#"
                INSERT INTO surface (osm_id, pred_label, n_predictions, centroid_lat, centroid_lng)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(osm_id) DO UPDATE SET
                    pred_label = CASE WHEN excluded.n_predictions > surface.n_predictions
                                      THEN excluded.pred_label ELSE surface.pred_label END,
                    n_predictions = CASE WHEN excluded.n_predictions > surface.n_predictions
                                         THEN excluded.n_predictions ELSE surface.n_predictions END,
                    centroid_lat = CASE WHEN excluded.n_predictions > surface.n_predictions
                                        THEN excluded.centroid_lat ELSE surface.centroid_lat END,
                    centroid_lng = CASE WHEN excluded.n_predictions > surface.n_predictions
                                        THEN excluded.centroid_lng ELSE surface.centroid_lng END
                "#,
            )?;
            for r in records {
                stmt.execute(params![
                    r.osm_id,
                    r.pred_label,
                    r.n_predictions,
                    r.centroid_lat,
                    r.centroid_lng,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // ========================================================================
    // Resume ledger
    // ========================================================================

    /// Whether shard `n` has already been fully merged.
    pub fn is_processed(&self, shard: u32) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                [format!("processed_file_{}", shard)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Mark shard `n` as fully merged. Called only after all of the shard's
    /// batches have committed; re-marking is harmless.
    pub fn mark_processed(&mut self, shard: u32) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![format!("processed_file_{}", shard), shard_filename(shard)],
        )?;
        Ok(())
    }

    /// File names of all shards recorded in the ledger.
    pub fn processed_shards(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT value FROM metadata WHERE key LIKE 'processed_file_%' ORDER BY value")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    // ========================================================================
    // Spatial index
    // ========================================================================

    /// Drop and rebuild the rtree index from the current record set.
    ///
    /// Records without a centroid are excluded. This is a pure function of
    /// the `surface` table and safe to re-run at any time; it is never
    /// updated row-by-row.
    pub fn rebuild_spatial_index(&mut self) -> Result<()> {
        info!("rebuilding rtree spatial index");
        self.conn.execute_batch(
            r#"
            DROP TABLE IF EXISTS surface_rtree;
            CREATE VIRTUAL TABLE surface_rtree USING rtree(
                id,
                min_lng, max_lng,
                min_lat, max_lat
            );
            INSERT INTO surface_rtree (id, min_lng, max_lng, min_lat, max_lat)
            SELECT rowid, centroid_lng, centroid_lng, centroid_lat, centroid_lat
            FROM surface
            WHERE centroid_lat IS NOT NULL AND centroid_lng IS NOT NULL;
            "#,
        )?;
        Ok(())
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Number of unique ways in the store.
    pub fn record_count(&self) -> Result<u64> {
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM surface", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Look up a single record by OSM way ID.
    pub fn get(&self, osm_id: i64) -> Result<Option<SurfaceRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT osm_id, pred_label, n_predictions, centroid_lat, centroid_lng
                 FROM surface WHERE osm_id = ?1",
                [osm_id],
                |row| {
                    Ok(SurfaceRecord {
                        osm_id: row.get(0)?,
                        pred_label: row.get(1)?,
                        n_predictions: row.get(2)?,
                        centroid_lat: row.get(3)?,
                        centroid_lng: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    /// OSM way IDs whose indexed centroid intersects the given bbox.
    pub fn query_bbox(
        &self,
        min_lng: f64,
        max_lng: f64,
        min_lat: f64,
        max_lat: f64,
    ) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.osm_id
             FROM surface_rtree r
             JOIN surface s ON s.rowid = r.id
             WHERE r.min_lng <= ?2 AND r.max_lng >= ?1
               AND r.min_lat <= ?4 AND r.max_lat >= ?3
             ORDER BY s.osm_id",
        )?;
        let ids = stmt
            .query_map(params![min_lng, max_lng, min_lat, max_lat], |row| {
                row.get(0)
            })?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    /// Number of entries in the rtree index (0 if it has not been built).
    pub fn spatial_index_len(&self) -> Result<u64> {
        let exists: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'surface_rtree'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(0);
        }
        let count: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM surface_rtree", [], |row| row.get(0))?;
        Ok(count)
    }
}
