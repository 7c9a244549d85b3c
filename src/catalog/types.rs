//! Timeline data model and provider wire-format decoding.
//!
//! The provider speaks a GraphQL-flavored edge/node envelope; the raw wire
//! structs stay private to this module and convert into the flat
//! [`MediaNode`]/[`MediaPage`] model the rest of the pipeline consumes.
//! Enrichment fields decode leniently: anything absent becomes `None`/zero
//! rather than failing the page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pixel dimensions of a media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Height in pixels.
    pub height: u32,
    /// Width in pixels.
    pub width: u32,
}

/// Named location attached to a media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Provider location ID.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Posting account reference attached to a media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Provider user ID.
    pub id: String,
    /// Account handle.
    pub username: String,
}

/// One item in a target's timeline.
///
/// The shortcode is the canonical deduplication key throughout the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaNode {
    /// Stable provider ID.
    pub id: String,
    /// URL-safe alphanumeric content key.
    pub shortcode: String,
    /// Direct URL to the content bytes.
    pub display_url: String,
    /// Videos are skipped by this pipeline.
    pub is_video: bool,
    /// Pixel dimensions, when declared.
    pub dimensions: Option<Dimensions>,
    /// Caption text, when present.
    pub caption: Option<String>,
    /// Like count, 0 when not declared.
    pub likes_count: u64,
    /// Comment count, 0 when not declared.
    pub comments_count: u64,
    /// When the item was posted.
    pub taken_at: Option<DateTime<Utc>>,
    /// Attached location, when present.
    pub location: Option<Location>,
    /// Posting account, when declared.
    pub owner: Option<Owner>,
    /// Handles of tagged accounts.
    pub tagged_users: Vec<String>,
}

/// Continuation state of a timeline window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// No further pages.
    Terminal,
    /// Opaque token for the next window.
    Next(String),
}

impl PageCursor {
    /// Returns the continuation token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Terminal => None,
            Self::Next(token) => Some(token),
        }
    }
}

/// A batch of timeline nodes plus its continuation cursor.
#[derive(Debug, Clone)]
pub struct MediaPage {
    /// Nodes in this window, provider order.
    pub nodes: Vec<MediaNode>,
    /// Continuation state.
    pub cursor: PageCursor,
}

/// Result of a profile lookup: identity plus the initial timeline window.
#[derive(Debug, Clone)]
pub struct Profile {
    /// Resolved provider user ID.
    pub user_id: String,
    /// Declared total media count.
    pub media_count: u64,
    /// First timeline window, including its cursor.
    pub first_page: MediaPage,
}

// ==================== Wire format ====================

#[derive(Debug, Deserialize)]
pub(super) struct ProfileEnvelope {
    #[serde(default)]
    pub requires_to_login: bool,
    pub data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
pub(super) struct PageEnvelope {
    #[serde(default)]
    pub requires_to_login: bool,
    pub data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
pub(super) struct EnvelopeData {
    pub user: Option<WireUser>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireUser {
    #[serde(default)]
    pub id: String,
    pub edge_owner_to_timeline_media: Option<WireTimeline>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireTimeline {
    #[serde(default)]
    pub count: u64,
    pub page_info: WirePageInfo,
    #[serde(default)]
    pub edges: Vec<WireEdge>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WirePageInfo {
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireEdge {
    pub node: WireNode,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireNode {
    pub id: String,
    pub shortcode: String,
    pub display_url: String,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub edge_media_to_caption: Option<WireCaptionEdges>,
    #[serde(default)]
    pub edge_media_preview_like: Option<WireCount>,
    #[serde(default)]
    pub edge_media_to_comment: Option<WireCount>,
    #[serde(default)]
    pub taken_at_timestamp: Option<i64>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub edge_media_to_tagged_user: Option<WireTaggedEdges>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireCount {
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireCaptionEdges {
    #[serde(default)]
    pub edges: Vec<WireCaptionEdge>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireCaptionEdge {
    pub node: WireCaptionNode,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireCaptionNode {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireTaggedEdges {
    #[serde(default)]
    pub edges: Vec<WireTaggedEdge>,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireTaggedEdge {
    pub node: WireTaggedNode,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireTaggedNode {
    pub user: WireTaggedUser,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireTaggedUser {
    pub username: String,
}

impl From<WireNode> for MediaNode {
    fn from(wire: WireNode) -> Self {
        let caption = wire
            .edge_media_to_caption
            .and_then(|c| c.edges.into_iter().next())
            .map(|e| e.node.text);
        let tagged_users = wire
            .edge_media_to_tagged_user
            .map(|t| t.edges.into_iter().map(|e| e.node.user.username).collect())
            .unwrap_or_default();
        let taken_at = wire
            .taken_at_timestamp
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0));

        Self {
            id: wire.id,
            shortcode: wire.shortcode,
            display_url: wire.display_url,
            is_video: wire.is_video,
            dimensions: wire.dimensions,
            caption,
            likes_count: wire.edge_media_preview_like.map_or(0, |c| c.count),
            comments_count: wire.edge_media_to_comment.map_or(0, |c| c.count),
            taken_at,
            location: wire.location,
            owner: wire.owner,
            tagged_users,
        }
    }
}

impl From<WireTimeline> for MediaPage {
    fn from(wire: WireTimeline) -> Self {
        let cursor = if wire.page_info.has_next_page {
            wire.page_info
                .end_cursor
                .map_or(PageCursor::Terminal, PageCursor::Next)
        } else {
            PageCursor::Terminal
        };
        Self {
            nodes: wire.edges.into_iter().map(|e| e.node.into()).collect(),
            cursor,
        }
    }
}
