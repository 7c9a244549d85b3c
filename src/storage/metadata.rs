//! Aggregate metadata artifact types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Location, MediaNode, Owner};

/// Per-photo record appended as each download succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoMetadata {
    /// Provider media ID.
    pub id: String,
    /// Content key.
    pub shortcode: String,
    /// Source URL.
    pub url: String,
    /// Width in pixels, 0 when undeclared.
    pub width: u32,
    /// Height in pixels, 0 when undeclared.
    pub height: u32,
    /// Always false; videos never reach storage.
    pub is_video: bool,
    /// Observed byte size on disk.
    pub file_size: u64,
    /// When the item was posted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub taken_at: Option<DateTime<Utc>>,
    /// When the download completed.
    pub downloaded_at: DateTime<Utc>,
    /// Caption text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Like count at fetch time.
    pub likes_count: u64,
    /// Comment count at fetch time.
    pub comments_count: u64,
    /// Attached location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Posting account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    /// Handles of tagged accounts.
    pub tagged_users: Vec<String>,
}

impl PhotoMetadata {
    /// Derives a record from a timeline node and the observed byte size.
    #[must_use]
    pub fn from_node(node: &MediaNode, file_size: u64) -> Self {
        Self {
            id: node.id.clone(),
            shortcode: node.shortcode.clone(),
            url: node.display_url.clone(),
            width: node.dimensions.map_or(0, |d| d.width),
            height: node.dimensions.map_or(0, |d| d.height),
            is_video: false,
            file_size,
            taken_at: node.taken_at,
            downloaded_at: Utc::now(),
            caption: node.caption.clone(),
            likes_count: node.likes_count,
            comments_count: node.comments_count,
            location: node.location.clone(),
            owner: node.owner.clone(),
            tagged_users: node.tagged_users.clone(),
        }
    }
}

/// Aggregate artifact written once per clean run as `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMetadata {
    /// Target handle.
    pub username: String,
    /// Resolved provider user ID.
    pub user_id: String,
    /// Declared total photo count at session start.
    pub total_photos: u64,
    /// When the session started.
    pub download_started_at: DateTime<Utc>,
    /// Records in download-completion order.
    pub photos: Vec<PhotoMetadata>,
}

impl UserMetadata {
    /// Creates an empty accumulator for a session.
    #[must_use]
    pub fn new(username: impl Into<String>, user_id: impl Into<String>, total_photos: u64) -> Self {
        Self {
            username: username.into(),
            user_id: user_id.into(),
            total_photos,
            download_started_at: Utc::now(),
            photos: Vec::new(),
        }
    }
}
