//! Elevation service: catalog ownership, background initialisation, lookups
//! and catalog maintenance.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread;

use tracing::{debug, info, warn};

use crate::error::{ElevationError, Result};
use crate::index::TileIndex;
use crate::record::TileRecord;
use crate::scan;
use crate::tile::Tile;
use crate::transform;

const DEFAULT_CACHE_TTL_MS: i64 = 60_000;
const DEFAULT_INDEX_FILENAME: &str = "tile-index.json";

/// Resolved service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory scanned for elevation tiles.
    pub tile_dir: PathBuf,
    /// Location of the persisted tile index.
    pub index_path: PathBuf,
    /// Optional search path for datum-shift support files.
    pub datum_dir: Option<PathBuf>,
    /// How long an unused dataset handle stays open. Zero or less disables
    /// caching: handles are closed as soon as each lookup finishes.
    pub cache_ttl_ms: i64,
}

/// Builder for [`ElevationService`].
///
/// ```no_run
/// use relief::ElevationService;
///
/// let service = ElevationService::builder()
///     .tile_dir("/var/lib/relief/tiles")
///     .cache_ttl_ms(30_000)
///     .build()?;
/// # Ok::<(), relief::ElevationError>(())
/// ```
#[derive(Debug, Default, Clone)]
pub struct ElevationServiceBuilder {
    tile_dir: Option<PathBuf>,
    index_path: Option<PathBuf>,
    datum_dir: Option<PathBuf>,
    cache_ttl_ms: Option<i64>,
}

impl ElevationServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the builder from `RELIEF_TILE_DIR`, `RELIEF_INDEX_PATH`,
    /// `RELIEF_DATUM_DIR` and `RELIEF_CACHE_TTL_MS`. Unset variables leave
    /// the corresponding field untouched.
    pub fn from_env() -> Self {
        let mut builder = Self::new();
        if let Ok(dir) = std::env::var("RELIEF_TILE_DIR") {
            builder.tile_dir = Some(PathBuf::from(dir));
        }
        if let Ok(path) = std::env::var("RELIEF_INDEX_PATH") {
            builder.index_path = Some(PathBuf::from(path));
        }
        if let Ok(dir) = std::env::var("RELIEF_DATUM_DIR") {
            builder.datum_dir = Some(PathBuf::from(dir));
        }
        if let Ok(ttl) = std::env::var("RELIEF_CACHE_TTL_MS") {
            match ttl.parse() {
                Ok(ms) => builder.cache_ttl_ms = Some(ms),
                Err(_) => warn!(value = %ttl, "ignoring unparseable RELIEF_CACHE_TTL_MS"),
            }
        }
        builder
    }

    /// Directory scanned for elevation tiles. Required.
    pub fn tile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tile_dir = Some(dir.into());
        self
    }

    /// Where to persist the tile index. Defaults to `tile-index.json` inside
    /// the tile directory.
    pub fn index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    /// Search path for datum-shift support files.
    pub fn datum_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.datum_dir = Some(dir.into());
        self
    }

    /// Dataset handle idle TTL in milliseconds. Defaults to 60 seconds; zero
    /// or less disables handle caching.
    pub fn cache_ttl_ms(mut self, ttl: i64) -> Self {
        self.cache_ttl_ms = Some(ttl);
        self
    }

    /// Resolve the configuration and start the service.
    pub fn build(self) -> Result<ElevationService> {
        let tile_dir = self.tile_dir.ok_or_else(|| {
            ElevationError::Initialization("tile directory not configured".to_string())
        })?;
        let index_path = self
            .index_path
            .unwrap_or_else(|| tile_dir.join(DEFAULT_INDEX_FILENAME));
        Ok(ElevationService::new(ServiceConfig {
            tile_dir,
            index_path,
            datum_dir: self.datum_dir,
            cache_ttl_ms: self.cache_ttl_ms.unwrap_or(DEFAULT_CACHE_TTL_MS),
        }))
    }
}

enum InitState {
    Pending,
    Ready,
    Failed(String),
}

/// Gate that startup blocks behind: the init thread completes it exactly
/// once, and every public operation waits on it before touching the catalog.
struct InitGate {
    state: Mutex<InitState>,
    ready: Condvar,
}

impl InitGate {
    fn new() -> Self {
        Self {
            state: Mutex::new(InitState::Pending),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, result: std::result::Result<(), String>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = match result {
            Ok(()) => InitState::Ready,
            Err(message) => InitState::Failed(message),
        };
        self.ready.notify_all();
    }

    /// Block until initialisation finishes. A failed init is re-raised to
    /// every waiter, now and later.
    fn wait(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match &*state {
                InitState::Pending => {
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                InitState::Ready => return Ok(()),
                InitState::Failed(message) => {
                    return Err(ElevationError::Initialization(message.clone()))
                }
            }
        }
    }
}

struct ServiceInner {
    config: ServiceConfig,
    tiles: RwLock<Vec<Arc<Tile>>>,
    gate: InitGate,
}

impl ServiceInner {
    fn read_tiles(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Tile>>> {
        self.tiles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tiles(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Tile>>> {
        self.tiles.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Thread-safe elevation lookup service over a directory of raster tiles.
///
/// Construction returns immediately; the tile directory is scanned on a
/// background thread and every lookup or maintenance call blocks until the
/// scan finishes. Cloning is cheap and shares the catalog.
#[derive(Clone)]
pub struct ElevationService {
    inner: Arc<ServiceInner>,
}

impl ElevationService {
    pub fn builder() -> ElevationServiceBuilder {
        ElevationServiceBuilder::new()
    }

    /// Start the service. The directory scan runs on a background thread;
    /// see [`ElevationService::wait_until_ready`].
    pub fn new(config: ServiceConfig) -> Self {
        let inner = Arc::new(ServiceInner {
            config,
            tiles: RwLock::new(Vec::new()),
            gate: InitGate::new(),
        });

        let worker = Arc::clone(&inner);
        let spawned = thread::Builder::new()
            .name("relief-init".to_string())
            .spawn(move || {
                let result = initialise(&worker);
                if let Err(message) = &result {
                    warn!(error = %message, "elevation service initialisation failed");
                }
                worker.gate.complete(result);
            });
        if let Err(e) = spawned {
            inner
                .gate
                .complete(Err(format!("failed to spawn init thread: {e}")));
        }

        Self { inner }
    }

    /// Block until the startup scan has finished, re-raising its error if it
    /// failed.
    pub fn wait_until_ready(&self) -> Result<()> {
        self.inner.gate.wait()
    }

    /// Elevation in metres at a WGS84 point.
    ///
    /// The catalog is scanned front to back and the first tile whose bounding
    /// box contains the point answers; `Ok(None)` means no tile covers the
    /// point or the covering tile holds no data there. Finishes with a cache
    /// sweep whether or not the lookup succeeded.
    pub fn get_elevation(&self, longitude: f64, latitude: f64) -> Result<Option<f64>> {
        self.inner.gate.wait()?;

        // Take the matching tile out from under the catalog lock; sampling
        // can block on raster IO and must not hold it.
        let tile = {
            let tiles = self.inner.read_tiles();
            tiles
                .iter()
                .find(|t| t.record().contains(longitude, latitude))
                .cloned()
        };

        let result = match tile {
            Some(tile) => tile.sample(&self.inner.config.tile_dir, longitude, latitude),
            None => {
                debug!(longitude, latitude, "no tile covers point");
                Ok(None)
            }
        };

        self.sweep();
        result
    }

    /// Open `filename` from the tile directory and add it to the catalog.
    /// A tile with the same filename is replaced in place, keeping its
    /// catalog position; otherwise the new tile is appended. The index is
    /// persisted before returning.
    pub fn add_tile(&self, filename: &str) -> Result<()> {
        self.inner.gate.wait()?;

        let tile = match Tile::open(&self.inner.config.tile_dir, filename) {
            Ok(tile) => Arc::new(tile),
            Err(e) => {
                warn!(file = filename, error = %e, "failed to add elevation tile");
                return Err(e);
            }
        };
        if self.inner.config.cache_ttl_ms <= 0 {
            tile.close();
        }

        {
            let mut tiles = self.inner.write_tiles();
            match tiles.iter().position(|t| t.record().filename == filename) {
                Some(i) => {
                    tiles[i].close();
                    tiles[i] = tile;
                }
                None => tiles.push(tile),
            }
        }

        self.persist_index();
        info!(file = filename, "added elevation tile");
        Ok(())
    }

    /// Remove `filename` from the catalog, close its handle and delete the
    /// file from the tile directory. A file already gone from disk is not an
    /// error; the catalog entry is still removed and the index persisted.
    pub fn delete_tile(&self, filename: &str) -> Result<()> {
        self.inner.gate.wait()?;

        {
            let mut tiles = self.inner.write_tiles();
            if let Some(i) = tiles.iter().position(|t| t.record().filename == filename) {
                tiles[i].close();
                tiles.remove(i);
            }
        }

        // The catalog entry is already gone; persist the index before
        // reporting a file-removal failure so the two stay in step.
        let removed = match fs::remove_file(self.inner.config.tile_dir.join(filename)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(file = filename, error = %e, "failed to delete tile file");
                Err(e)
            }
        };
        self.persist_index();
        removed?;

        info!(file = filename, "deleted elevation tile");
        Ok(())
    }

    /// Number of tiles in the catalog.
    pub fn tile_count(&self) -> usize {
        self.inner.read_tiles().len()
    }

    /// Number of tiles with an open dataset handle.
    pub fn open_tile_count(&self) -> usize {
        self.inner.read_tiles().iter().filter(|t| t.is_open()).count()
    }

    /// Snapshot of the catalog entries in lookup order.
    pub fn records(&self) -> Vec<TileRecord> {
        self.inner
            .read_tiles()
            .iter()
            .map(|t| t.record().clone())
            .collect()
    }

    /// Close dataset handles that have outlived the configured TTL.
    fn sweep(&self) {
        let ttl = self.inner.config.cache_ttl_ms;
        let tiles = self.inner.read_tiles();
        let closed = tiles.iter().filter(|t| t.close_if_idle(ttl)).count();
        if closed > 0 {
            debug!(closed, "closed idle tile handles");
        }
    }

    fn persist_index(&self) {
        let index: TileIndex = self
            .inner
            .read_tiles()
            .iter()
            .map(|t| t.record().clone())
            .collect();
        if let Err(e) = index.save(&self.inner.config.index_path) {
            warn!(index = %self.inner.config.index_path.display(), error = %e, "failed to persist tile index");
        }
    }
}

fn initialise(inner: &ServiceInner) -> std::result::Result<(), String> {
    if let Some(dir) = &inner.config.datum_dir {
        transform::set_datum_search_path(dir);
    }
    let tiles = scan::reconcile(
        &inner.config.tile_dir,
        &inner.config.index_path,
        inner.config.cache_ttl_ms,
    )
    .map_err(|e| e.to_string())?;
    *inner.write_tiles() = tiles;
    Ok(())
}
