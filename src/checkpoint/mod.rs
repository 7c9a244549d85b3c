//! Durable per-target resume state.
//!
//! One JSON file per target under the user-data directory. Every save goes
//! through a temp-then-rename protocol inside a single critical section, so a
//! reader never observes a partially written checkpoint. The file is deleted
//! only on clean session completion.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::error::{ErrorKind, ScrapeError};
use crate::storage::write_file_atomic;

/// Current checkpoint schema version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Application directory under the user-data root.
const APP_DIR: &str = "igscraper";

/// Subdirectory holding checkpoint files.
const CHECKPOINTS_DIR: &str = "checkpoints";

/// Resume record for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Target handle.
    pub username: String,
    /// Resolved provider user ID.
    pub user_id: String,
    /// Index of the last fully submitted page.
    pub last_processed_page: u32,
    /// Cursor returned by the last processed page; empty before the first.
    pub end_cursor: String,
    /// Downloaded shortcode → on-disk filename.
    pub downloaded_photos: BTreeMap<String, String>,
    /// Jobs submitted across all runs of this session.
    pub total_queued: u64,
    /// Downloads recorded across all runs of this session.
    pub total_downloaded: u64,
    /// When the checkpoint was created.
    pub created_at: DateTime<Utc>,
    /// Last save time; monotonic non-decreasing.
    pub updated_at: DateTime<Utc>,
    /// Schema version.
    pub version: u32,
}

impl Checkpoint {
    /// Creates a fresh checkpoint for a resolved target.
    #[must_use]
    pub fn new(username: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            username: username.into(),
            user_id: user_id.into(),
            last_processed_page: 0,
            end_cursor: String::new(),
            downloaded_photos: BTreeMap::new(),
            total_queued: 0,
            total_downloaded: 0,
            created_at: now,
            updated_at: now,
            version: CHECKPOINT_VERSION,
        }
    }

    /// Returns whether `shortcode` is recorded as downloaded.
    #[must_use]
    pub fn contains(&self, shortcode: &str) -> bool {
        self.downloaded_photos.contains_key(shortcode)
    }

    /// Returns the continuation cursor, if one was recorded.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        if self.end_cursor.is_empty() {
            None
        } else {
            Some(&self.end_cursor)
        }
    }
}

/// Summary of the stored state, for embedding layers.
#[derive(Debug, Clone)]
pub struct CheckpointInfo {
    /// Location of the checkpoint file.
    pub path: PathBuf,
    /// Target handle.
    pub username: String,
    /// Pages fully submitted so far.
    pub last_processed_page: u32,
    /// Downloads recorded so far.
    pub total_downloaded: u64,
    /// Last save time.
    pub updated_at: DateTime<Utc>,
}

/// Store for one target's checkpoint file.
///
/// All writes are serialized through an internal critical section; callers on
/// different tasks may share the store behind an `Arc`.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CheckpointStore {
    /// Creates a store rooted at the platform user-data directory.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error when no user-data directory can be
    /// determined.
    pub fn new(handle: &str) -> Result<Self, ScrapeError> {
        Ok(Self::with_base_dir(&default_data_dir()?, handle))
    }

    /// Creates a store rooted at an explicit user-data directory.
    #[must_use]
    pub fn with_base_dir(base_dir: &Path, handle: &str) -> Self {
        let path = base_dir
            .join(APP_DIR)
            .join(CHECKPOINTS_DIR)
            .join(format!("{handle}.checkpoint.json"));
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the checkpoint file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns whether a checkpoint file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Creates, saves, and returns a fresh checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error when the save fails.
    #[instrument(skip(self))]
    pub async fn create(&self, handle: &str, user_id: &str) -> Result<Checkpoint, ScrapeError> {
        let mut checkpoint = Checkpoint::new(handle, user_id);
        self.save(&mut checkpoint).await?;
        info!(handle, user_id, path = %self.path.display(), "checkpoint created");
        Ok(checkpoint)
    }

    /// Loads the stored checkpoint, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns a `Parsing` error for malformed JSON or an unknown newer
    /// schema version.
    pub async fn load(&self) -> Result<Option<Checkpoint>, ScrapeError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ScrapeError::new(
                    ErrorKind::Unknown,
                    format!("failed to read {}: {e}", self.path.display()),
                ));
            }
        };

        let checkpoint: Checkpoint = serde_json::from_slice(&bytes).map_err(|e| {
            ScrapeError::parsing(format!(
                "malformed checkpoint {}: {e}",
                self.path.display()
            ))
        })?;

        if checkpoint.version > CHECKPOINT_VERSION {
            return Err(ScrapeError::parsing(format!(
                "checkpoint {} has unsupported schema version {} (supported: {})",
                self.path.display(),
                checkpoint.version,
                CHECKPOINT_VERSION
            )));
        }

        debug!(
            path = %self.path.display(),
            page = checkpoint.last_processed_page,
            downloaded = checkpoint.downloaded_photos.len(),
            "checkpoint loaded"
        );
        Ok(Some(checkpoint))
    }

    /// Saves the checkpoint atomically, stamping `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error on any filesystem failure.
    pub async fn save(&self, checkpoint: &mut Checkpoint) -> Result<(), ScrapeError> {
        let _guard = self.write_lock.lock().await;

        // Wall clocks can step backwards; updated_at must not.
        checkpoint.updated_at = Utc::now().max(checkpoint.updated_at);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ScrapeError::new(
                    ErrorKind::Unknown,
                    format!("failed to create {}: {e}", parent.display()),
                )
            })?;
        }

        let body = serde_json::to_vec_pretty(&checkpoint)?;
        write_file_atomic(&self.path, &body).await
    }

    /// Records page progress and saves.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error when the save fails.
    pub async fn update_progress(
        &self,
        checkpoint: &mut Checkpoint,
        cursor: Option<&str>,
        page: u32,
    ) -> Result<(), ScrapeError> {
        checkpoint.end_cursor = cursor.unwrap_or_default().to_string();
        checkpoint.last_processed_page = page;
        self.save(checkpoint).await
    }

    /// Records one completed download and saves.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error when the save fails.
    pub async fn record_download(
        &self,
        checkpoint: &mut Checkpoint,
        shortcode: &str,
        filename: &str,
    ) -> Result<(), ScrapeError> {
        if checkpoint
            .downloaded_photos
            .insert(shortcode.to_string(), filename.to_string())
            .is_none()
        {
            checkpoint.total_downloaded += 1;
        }
        self.save(checkpoint).await
    }

    /// Deletes the checkpoint file. Absence is not an error.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error on any other filesystem failure.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn delete(&self) -> Result<(), ScrapeError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("checkpoint deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ScrapeError::new(
                ErrorKind::Unknown,
                format!("failed to delete {}: {e}", self.path.display()),
            )),
        }
    }

    /// Copies the checkpoint to a sibling `.backup` file.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error when the copy fails.
    pub async fn backup(&self) -> Result<PathBuf, ScrapeError> {
        let _guard = self.write_lock.lock().await;
        let backup_path = {
            let mut os = self.path.as_os_str().to_owned();
            os.push(".backup");
            PathBuf::from(os)
        };
        tokio::fs::copy(&self.path, &backup_path).await.map_err(|e| {
            ScrapeError::new(
                ErrorKind::Unknown,
                format!("failed to back up {}: {e}", self.path.display()),
            )
        })?;
        debug!(path = %backup_path.display(), "checkpoint backed up");
        Ok(backup_path)
    }

    /// Returns a summary of the stored state, `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns a `Parsing` error for malformed stored state.
    pub async fn info(&self) -> Result<Option<CheckpointInfo>, ScrapeError> {
        Ok(self.load().await?.map(|cp| CheckpointInfo {
            path: self.path.clone(),
            username: cp.username,
            last_processed_page: cp.last_processed_page,
            total_downloaded: cp.total_downloaded,
            updated_at: cp.updated_at,
        }))
    }
}

/// Resolves the platform user-data root.
fn default_data_dir() -> Result<PathBuf, ScrapeError> {
    resolve_data_dir(
        std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
        std::env::var_os("APPDATA").map(PathBuf::from),
    )
}

fn resolve_data_dir(
    xdg_data_home: Option<PathBuf>,
    home: Option<PathBuf>,
    app_data: Option<PathBuf>,
) -> Result<PathBuf, ScrapeError> {
    if let Some(xdg) = xdg_data_home {
        return Ok(xdg);
    }
    if let Some(home) = home {
        if cfg!(target_os = "macos") {
            return Ok(home.join("Library").join("Application Support"));
        }
        return Ok(home.join(".local").join("share"));
    }
    if let Some(app_data) = app_data {
        return Ok(app_data);
    }
    Err(ScrapeError::new(
        ErrorKind::Unknown,
        "unable to determine user-data directory (set XDG_DATA_HOME or HOME)",
    ))
}
