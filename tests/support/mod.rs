//! Shared helpers for integration tests: a mock provider vocabulary and a
//! test-tuned session configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use igscraper_core::{Backoff, Config, LimiterConfig, ProviderEndpoints};

/// Builds one timeline node pointing its content URL at the mock server.
#[must_use]
pub fn node_json(server_uri: &str, shortcode: &str, is_video: bool) -> serde_json::Value {
    serde_json::json!({
        "id": format!("id-{shortcode}"),
        "shortcode": shortcode,
        "display_url": format!("{server_uri}/photos/{shortcode}.jpg"),
        "is_video": is_video,
        "dimensions": {"height": 1080, "width": 1080},
        "edge_media_preview_like": {"count": 5},
        "edge_media_to_comment": {"count": 1},
        "taken_at_timestamp": 1_700_000_000,
    })
}

/// Builds the edge/node timeline envelope shared by both response kinds.
#[must_use]
pub fn timeline_json(nodes: &[serde_json::Value], next_cursor: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "count": nodes.len(),
        "page_info": {
            "has_next_page": next_cursor.is_some(),
            "end_cursor": next_cursor,
        },
        "edges": nodes
            .iter()
            .map(|node| serde_json::json!({"node": node}))
            .collect::<Vec<_>>(),
    })
}

/// Builds a profile lookup response body.
#[must_use]
pub fn profile_body(user_id: &str, timeline: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "requires_to_login": false,
        "data": {"user": {
            "id": user_id,
            "edge_owner_to_timeline_media": timeline,
        }},
        "status": "ok"
    })
}

/// Builds a timeline page response body.
#[must_use]
pub fn page_body(user_id: &str, timeline: serde_json::Value) -> serde_json::Value {
    // Same envelope; the page fetch simply omits the profile-only fields.
    profile_body(user_id, timeline)
}

/// Session configuration pointed at the mock server, with fast retries and an
/// effectively open rate limit.
#[must_use]
pub fn test_config(server_uri: &str, base: &Path) -> Config {
    Config {
        workers: 5,
        limiter: LimiterConfig::TokenBucket {
            capacity: 10_000,
            period: Duration::from_secs(60),
        },
        retry_max_attempts: 3,
        backoff: Backoff::constant(Duration::from_millis(20)),
        connect_timeout: Duration::from_secs(5),
        request_timeout: Duration::from_secs(60),
        page_retry_limit: 2,
        page_retry_delay: Duration::from_millis(50),
        output_base_dir: base.join("out"),
        data_dir: Some(base.join("data")),
        endpoints: ProviderEndpoints::with_base_url(server_uri),
        headers: std::collections::HashMap::new(),
    }
}

/// Where the checkpoint file for `handle` lands under the test data dir.
#[must_use]
pub fn checkpoint_path(base: &Path, handle: &str) -> PathBuf {
    base.join("data")
        .join("igscraper")
        .join("checkpoints")
        .join(format!("{handle}.checkpoint.json"))
}

/// The output directory for `handle` under the test base dir.
#[must_use]
pub fn photos_dir(base: &Path, handle: &str) -> PathBuf {
    base.join("out").join(format!("{handle}_photos"))
}
