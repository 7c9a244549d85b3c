//! Atomic file materialization and duplicate detection.
//!
//! One [`StorageManager`] owns one output directory per target. Content lands
//! as `<shortcode>.jpg` via a temp-then-rename protocol, so a concurrent
//! duplicate check only ever observes "absent" or "present with full bytes".
//! The in-memory shortcode index is seeded from a directory scan at
//! construction and is authoritative for the duration of the run.

mod metadata;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::catalog::MediaNode;
use crate::error::{ErrorKind, ScrapeError};

pub use metadata::{PhotoMetadata, UserMetadata};

/// File extension for materialized content.
const PHOTO_EXT: &str = "jpg";

/// Name of the aggregate artifact.
const METADATA_FILE: &str = "metadata.json";

/// Storage manager for one target's output directory.
#[derive(Debug)]
pub struct StorageManager {
    output_dir: PathBuf,
    state: RwLock<StorageState>,
}

#[derive(Debug)]
struct StorageState {
    /// Shortcodes known to exist on disk.
    index: HashSet<String>,
    /// Aggregate accumulator; `None` until initialized.
    metadata: Option<UserMetadata>,
    /// Successful saves this run (pre-existing files not counted).
    saved_this_run: u64,
}

impl StorageManager {
    /// Creates the output directory `<base>/<handle>_photos` (idempotent) and
    /// seeds the index from the `*.jpg` files already present.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error when the directory cannot be created or
    /// scanned.
    #[instrument(skip(base_dir), fields(base = %base_dir.display()))]
    pub fn new(base_dir: &Path, handle: &str) -> Result<Self, ScrapeError> {
        let output_dir = base_dir.join(format!("{handle}_photos"));
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            ScrapeError::new(
                ErrorKind::Unknown,
                format!("failed to create {}: {e}", output_dir.display()),
            )
        })?;

        let mut index = HashSet::new();
        let entries = std::fs::read_dir(&output_dir).map_err(|e| {
            ScrapeError::new(
                ErrorKind::Unknown,
                format!("failed to scan {}: {e}", output_dir.display()),
            )
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == PHOTO_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    index.insert(stem.to_string());
                }
            }
        }

        debug!(
            output_dir = %output_dir.display(),
            existing = index.len(),
            "storage manager initialized"
        );

        Ok(Self {
            output_dir,
            state: RwLock::new(StorageState {
                index,
                metadata: None,
                saved_this_run: 0,
            }),
        })
    }

    /// Returns the target's output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Returns whether content for `shortcode` exists on disk.
    ///
    /// Consults the index first; on a miss, stats the file and lifts a
    /// positive result into the index.
    pub async fn is_downloaded(&self, shortcode: &str) -> bool {
        if self.state.read().await.index.contains(shortcode) {
            return true;
        }
        let path = self.photo_path(shortcode);
        if tokio::fs::metadata(&path).await.is_ok() {
            self.state.write().await.index.insert(shortcode.to_string());
            return true;
        }
        false
    }

    /// Writes content bytes for `shortcode` atomically, returning the
    /// materialized filename.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error on any filesystem failure; the temporary
    /// file is removed before returning.
    pub async fn save_photo(&self, bytes: &[u8], shortcode: &str) -> Result<String, ScrapeError> {
        let mut state = self.state.write().await;
        let filename = self.write_atomic(bytes, shortcode).await?;
        state.index.insert(shortcode.to_string());
        state.saved_this_run += 1;
        Ok(filename)
    }

    /// As [`save_photo`](Self::save_photo), additionally appending a
    /// [`PhotoMetadata`] record derived from `node` and the byte size.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error on any filesystem failure.
    pub async fn save_photo_with_metadata(
        &self,
        bytes: &[u8],
        shortcode: &str,
        node: &MediaNode,
    ) -> Result<String, ScrapeError> {
        let mut state = self.state.write().await;
        let filename = self.write_atomic(bytes, shortcode).await?;
        state.index.insert(shortcode.to_string());
        state.saved_this_run += 1;
        if let Some(metadata) = state.metadata.as_mut() {
            metadata
                .photos
                .push(PhotoMetadata::from_node(node, bytes.len() as u64));
        }
        Ok(filename)
    }

    /// Starts the aggregate accumulator for this session.
    pub async fn initialize_user_metadata(&self, handle: &str, user_id: &str, declared_count: u64) {
        let mut state = self.state.write().await;
        state.metadata = Some(UserMetadata::new(handle, user_id, declared_count));
    }

    /// Writes `metadata.json` atomically. A session that never initialized
    /// the accumulator writes nothing.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error on any filesystem failure.
    pub async fn save_user_metadata(&self) -> Result<(), ScrapeError> {
        let state = self.state.read().await;
        let Some(metadata) = state.metadata.as_ref() else {
            debug!("no user metadata accumulated, skipping artifact");
            return Ok(());
        };

        let body = serde_json::to_vec_pretty(metadata)?;
        let path = self.output_dir.join(METADATA_FILE);
        write_file_atomic(&path, &body).await?;
        info!(
            path = %path.display(),
            photos = metadata.photos.len(),
            "metadata artifact written"
        );
        Ok(())
    }

    /// Returns a snapshot of the aggregate accumulator.
    pub async fn user_metadata(&self) -> Option<UserMetadata> {
        self.state.read().await.metadata.clone()
    }

    /// Returns the number of successful saves this run.
    pub async fn downloaded_count(&self) -> u64 {
        self.state.read().await.saved_this_run
    }

    fn photo_path(&self, shortcode: &str) -> PathBuf {
        self.output_dir.join(format!("{shortcode}.{PHOTO_EXT}"))
    }

    async fn write_atomic(&self, bytes: &[u8], shortcode: &str) -> Result<String, ScrapeError> {
        let filename = format!("{shortcode}.{PHOTO_EXT}");
        let path = self.output_dir.join(&filename);
        write_file_atomic(&path, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "photo saved");
        Ok(filename)
    }
}

/// Writes `bytes` to `path` via `<path>.tmp` + fsync + rename. The temporary
/// file is removed on any failure.
pub(crate) async fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), ScrapeError> {
    let tmp_path = {
        let mut os = path.as_os_str().to_owned();
        os.push(".tmp");
        PathBuf::from(os)
    };

    let result = async {
        let mut file = tokio::fs::File::create(&tmp_path).await.map_err(|e| {
            ScrapeError::new(
                ErrorKind::Unknown,
                format!("failed to create {}: {e}", tmp_path.display()),
            )
        })?;
        file.write_all(bytes).await.map_err(|e| {
            ScrapeError::new(
                ErrorKind::Unknown,
                format!("failed to write {}: {e}", tmp_path.display()),
            )
        })?;
        file.sync_all().await.map_err(|e| {
            ScrapeError::new(
                ErrorKind::Unknown,
                format!("failed to sync {}: {e}", tmp_path.display()),
            )
        })?;
        drop(file);
        tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
            ScrapeError::new(
                ErrorKind::Unknown,
                format!(
                    "failed to rename {} to {}: {e}",
                    tmp_path.display(),
                    path.display()
                ),
            )
        })
    }
    .await;

    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(&tmp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %tmp_path.display(), error = %e, "failed to remove temp file");
            }
        }
    }
    result
}
