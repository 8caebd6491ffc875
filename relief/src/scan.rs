//! Startup reconciliation of the tile directory against the persisted index.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::index::TileIndex;
use crate::tile::{Tile, TileFormat};

/// Reconcile the persisted tile index with the contents of the tile
/// directory and return the resulting catalog.
///
/// Tiles already in the index keep their catalog position and are not
/// reopened; their geometry comes from the persisted entry. Index entries
/// whose file has disappeared are dropped. Files on disk but not in the index
/// are opened in lexicographic filename order and appended, so a given
/// directory state always produces the same catalog order. A new tile that
/// fails to open is logged and skipped rather than failing the scan.
///
/// The reconciled index is written back before returning; a failed write is
/// logged and otherwise ignored, since the catalog can be rebuilt from the
/// directory on the next start.
pub(crate) fn reconcile(
    tile_dir: &Path,
    index_path: &Path,
    cache_ttl_ms: i64,
) -> Result<Vec<Arc<Tile>>> {
    let started = Instant::now();
    let index = TileIndex::load(index_path);

    let mut on_disk = BTreeSet::new();
    for entry in fs::read_dir(tile_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if TileFormat::from_filename(name).is_some() {
            on_disk.insert(name.to_string());
        }
    }

    let mut tiles = Vec::with_capacity(on_disk.len());
    for record in index.iter() {
        if on_disk.remove(&record.filename) {
            tiles.push(Arc::new(Tile::from_record(record.clone())));
        } else {
            debug!(file = %record.filename, "dropping index entry for missing tile");
        }
    }

    for filename in on_disk {
        match Tile::open(tile_dir, &filename) {
            Ok(tile) => {
                // With caching disabled, do not leave the scan's handle open.
                if cache_ttl_ms <= 0 {
                    tile.close();
                }
                tiles.push(Arc::new(tile));
            }
            Err(e) => warn!(file = %filename, error = %e, "skipping unreadable tile"),
        }
    }

    let reconciled: TileIndex = tiles.iter().map(|t| t.record().clone()).collect();
    if let Err(e) = reconciled.save(index_path) {
        warn!(index = %index_path.display(), error = %e, "failed to persist tile index");
    }

    info!(
        tiles = tiles.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "loaded elevation tiles"
    );
    Ok(tiles)
}
