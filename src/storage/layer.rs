use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::error::StorageError;
use super::piece::PieceStatus;
use crate::config::StorageConfig;

const STATUS_SUFFIX: &str = "-status";

/// Cache admission for completed layers.
///
/// Implemented by the LRU that owns the cache directory's budget. `add`
/// decides whether the layer may enter the cache; if admitted, it invokes
/// `promote` to install the file at its cache path before accounting for it.
pub trait LayerCache: Send + Sync {
    /// Offers `key` to the cache at `cache_path`. Returns whether the entry
    /// was admitted; `promote` must have run iff it was.
    fn add(
        &self,
        key: &str,
        cache_path: &Path,
        promote: &mut dyn FnMut() -> std::io::Result<()>,
    ) -> std::io::Result<bool>;

    /// Looks up the cached path for `key`.
    fn get(&self, key: &str) -> Option<PathBuf>;
}

/// The cache key for a layer: the base name of its file.
pub fn layer_key(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|base| base.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

struct LayerState {
    pieces: Vec<PieceStatus>,
}

impl LayerState {
    fn is_complete(&self) -> bool {
        self.pieces.iter().all(|&status| status == PieceStatus::Done)
    }
}

/// On-disk state for in-progress and completed layer downloads.
///
/// Each open layer has a sparse download file and a `-status` sidecar of one
/// byte per piece. When every piece is done the layer becomes eligible for
/// promotion: a rename into the cache directory gated by [`LayerCache`]
/// admission. All piece state is serialized by the manager's lock.
pub struct LayerManager {
    config: StorageConfig,
    cache: Arc<dyn LayerCache>,
    layers: Mutex<HashMap<String, LayerState>>,
}

impl LayerManager {
    pub fn new(config: StorageConfig, cache: Arc<dyn LayerCache>) -> Self {
        Self {
            config,
            cache,
            layers: Mutex::new(HashMap::new()),
        }
    }

    /// The layer's in-progress download path.
    pub fn download_path(&self, name: &str) -> PathBuf {
        self.config.download_dir.join(layer_key(name))
    }

    /// The layer's piece status sidecar path.
    pub fn piece_status_path(&self, name: &str) -> PathBuf {
        let mut path = self.download_path(name).into_os_string();
        path.push(STATUS_SUFFIX);
        PathBuf::from(path)
    }

    /// The layer's installed cache path.
    pub fn cache_path(&self, name: &str) -> PathBuf {
        self.config.cache_dir.join(layer_key(name))
    }

    /// Creates a sparse download file for a new layer.
    ///
    /// Ensures the download directory exists, persists an all-clean status
    /// sidecar, and truncates the download file to its final size.
    pub async fn create_empty_layer_file(
        &self,
        name: &str,
        length: u64,
        num_pieces: usize,
    ) -> Result<(), StorageError> {
        let mut layers = self.layers.lock().await;

        tokio::fs::create_dir_all(&self.config.download_dir).await?;

        let status = vec![PieceStatus::Clean.as_byte(); num_pieces];
        tokio::fs::write(self.piece_status_path(name), &status).await?;

        let file = File::create(self.download_path(name)).await?;
        file.set_len(length).await?;

        layers.insert(
            name.to_string(),
            LayerState {
                pieces: vec![PieceStatus::Clean; num_pieces],
            },
        );

        tracing::debug!(
            name,
            length,
            num_pieces,
            "created empty layer file in download directory",
        );
        Ok(())
    }

    /// Loads a layer's piece state from its status sidecar.
    ///
    /// The sidecar's size dictates the piece count. Returns the number of
    /// pieces loaded. Called once per layer at restart.
    pub async fn load_from_disk(&self, name: &str) -> Result<usize, StorageError> {
        let mut layers = self.layers.lock().await;

        let status = tokio::fs::read(self.piece_status_path(name)).await?;
        let pieces = status
            .iter()
            .map(|&byte| PieceStatus::try_from(byte))
            .collect::<Result<Vec<_>, _>>()?;

        let num_pieces = pieces.len();
        layers.insert(name.to_string(), LayerState { pieces });
        Ok(num_pieces)
    }

    /// Reads a piece's in-memory status.
    pub async fn piece_status(&self, name: &str, index: usize) -> Result<PieceStatus, StorageError> {
        let layers = self.layers.lock().await;
        let state = layers
            .get(name)
            .ok_or_else(|| StorageError::LayerNotFound(name.to_string()))?;
        state
            .pieces
            .get(index)
            .copied()
            .ok_or(StorageError::InvalidPieceIndex(index))
    }

    /// Updates a piece's status in memory and in the sidecar.
    ///
    /// A `Done` piece never regresses. The sidecar byte is persisted before
    /// the call returns, so callers may advertise the piece afterwards.
    pub async fn mark_piece(
        &self,
        name: &str,
        index: usize,
        status: PieceStatus,
    ) -> Result<(), StorageError> {
        let mut layers = self.layers.lock().await;
        let state = layers
            .get_mut(name)
            .ok_or_else(|| StorageError::LayerNotFound(name.to_string()))?;
        let current = *state
            .pieces
            .get(index)
            .ok_or(StorageError::InvalidPieceIndex(index))?;

        if current == PieceStatus::Done && status != PieceStatus::Done {
            return Err(StorageError::StatusRegression {
                index,
                from: current,
                to: status,
            });
        }

        let mut file = OpenOptions::new()
            .write(true)
            .open(self.piece_status_path(name))
            .await?;
        file.seek(SeekFrom::Start(index as u64)).await?;
        file.write_all(&[status.as_byte()]).await?;
        file.flush().await?;

        state.pieces[index] = status;
        Ok(())
    }

    /// Promotes the layer into the cache if every piece is done.
    ///
    /// Holds the manager lock across the scan and the admission attempt. On
    /// admission the download file is renamed to its cache path and the
    /// sidecar is removed; rejection leaves on-disk state unchanged.
    pub async fn try_cache_layer(&self, name: &str) -> Result<(), StorageError> {
        let mut layers = self.layers.lock().await;
        self.try_cache_locked(&mut layers, name)
    }

    /// Closes a layer: best-effort promotion, then removal from the open set.
    pub async fn close_layer(&self, name: &str) -> Result<(), StorageError> {
        let mut layers = self.layers.lock().await;
        if let Err(err) = self.try_cache_locked(&mut layers, name) {
            tracing::debug!(name, %err, "layer not cached on close");
        }
        layers.remove(name);
        Ok(())
    }

    /// Returns true if the layer has an in-progress download file.
    pub async fn is_downloading(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.download_path(name))
            .await
            .unwrap_or(false)
    }

    /// Returns the cached path if the layer has been promoted.
    pub fn is_downloaded(&self, name: &str) -> Option<PathBuf> {
        self.cache.get(&layer_key(name))
    }

    fn try_cache_locked(
        &self,
        layers: &mut HashMap<String, LayerState>,
        name: &str,
    ) -> Result<(), StorageError> {
        let state = layers
            .get(name)
            .ok_or_else(|| StorageError::LayerNotFound(name.to_string()))?;
        if !state.is_complete() {
            return Err(StorageError::DownloadNotComplete(name.to_string()));
        }

        let download_path = self.download_path(name);
        let status_path = self.piece_status_path(name);
        let cache_path = self.cache_path(name);

        let mut promote = || -> std::io::Result<()> {
            std::fs::create_dir_all(&self.config.cache_dir)?;
            std::fs::rename(&download_path, &cache_path)?;
            let _ = std::fs::remove_file(&status_path);
            Ok(())
        };

        let admitted = self.cache.add(&layer_key(name), &cache_path, &mut promote)?;
        if !admitted {
            return Err(StorageError::CacheRejected(name.to_string()));
        }
        Ok(())
    }
}
