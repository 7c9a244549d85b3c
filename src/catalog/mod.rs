//! Catalog lookups against the media provider.
//!
//! Two request kinds: a profile lookup resolving a handle to a provider user
//! ID plus the initial timeline window, and a cursor-driven page fetch. URL
//! shapes, the query-hash token, and the page size are provider-specific
//! constants kept together in [`ProviderEndpoints`]; tests point the base URL
//! at a mock server.

mod types;

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::ScrapeError;
use crate::http::HttpClient;

pub use types::{Dimensions, Location, MediaNode, MediaPage, Owner, PageCursor, Profile};

use types::{PageEnvelope, ProfileEnvelope};

/// Default provider origin.
const DEFAULT_BASE_URL: &str = "https://i.instagram.com";

/// Query-hash token for timeline page fetches. Provider-defined constant.
const TIMELINE_QUERY_HASH: &str = "e769aa130647d2354c40ea6a439bfc08";

/// Default nodes requested per page.
const DEFAULT_PAGE_SIZE: u32 = 50;

/// Provider URL construction. Opaque to the rest of the pipeline.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    base_url: String,
    page_size: u32,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ProviderEndpoints {
    /// Endpoints rooted at a non-default origin (mock servers, proxies).
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }

    /// Overrides the per-page node count.
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    fn profile_url(&self, handle: &str) -> String {
        format!(
            "{}/api/v1/users/web_profile_info/?username={}",
            self.base_url,
            urlencoding::encode(handle)
        )
    }

    fn page_url(&self, user_id: &str, cursor: Option<&str>) -> String {
        let variables = match cursor {
            Some(cursor) => serde_json::json!({
                "id": user_id,
                "first": self.page_size,
                "after": cursor,
            }),
            None => serde_json::json!({
                "id": user_id,
                "first": self.page_size,
            }),
        };
        format!(
            "{}/graphql/query/?query_hash={}&variables={}",
            self.base_url,
            TIMELINE_QUERY_HASH,
            urlencoding::encode(&variables.to_string())
        )
    }
}

/// Client for the two catalog operations.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    http: Arc<HttpClient>,
    endpoints: ProviderEndpoints,
}

impl CatalogClient {
    /// Creates a catalog client over a shared HTTP client.
    #[must_use]
    pub fn new(http: Arc<HttpClient>, endpoints: ProviderEndpoints) -> Self {
        Self { http, endpoints }
    }

    /// Resolves a handle to its provider identity and first timeline window.
    ///
    /// # Errors
    ///
    /// `Auth` when the response requires login, `NotFound` when the profile
    /// does not exist, plus the HTTP client's canonical kinds.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_profile(&self, handle: &str) -> Result<Profile, ScrapeError> {
        let url = self.endpoints.profile_url(handle);
        let envelope: ProfileEnvelope = self.http.get_json(&url).await?;

        if envelope.requires_to_login {
            return Err(ScrapeError::auth(format!(
                "profile lookup for {handle} requires login"
            )));
        }

        let user = envelope
            .data
            .and_then(|d| d.user)
            .ok_or_else(|| ScrapeError::from_status(404, format!("profile {handle} not found")))?;
        let timeline = user.edge_owner_to_timeline_media.ok_or_else(|| {
            ScrapeError::parsing(format!("profile response for {handle} has no timeline"))
        })?;

        let profile = Profile {
            user_id: user.id,
            media_count: timeline.count,
            first_page: timeline.into(),
        };
        debug!(
            handle,
            user_id = %profile.user_id,
            declared_count = profile.media_count,
            first_window = profile.first_page.nodes.len(),
            "profile resolved"
        );
        Ok(profile)
    }

    /// Fetches the next timeline window for a resolved user.
    ///
    /// # Errors
    ///
    /// `Auth` when the response requires login, `Parsing` when the envelope
    /// is missing its timeline, plus the HTTP client's canonical kinds.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_page(
        &self,
        user_id: &str,
        cursor: Option<&str>,
    ) -> Result<MediaPage, ScrapeError> {
        let url = self.endpoints.page_url(user_id, cursor);
        let envelope: PageEnvelope = self.http.get_json(&url).await?;

        if envelope.requires_to_login {
            return Err(ScrapeError::auth(format!(
                "page fetch for user {user_id} requires login"
            )));
        }

        let timeline = envelope
            .data
            .and_then(|d| d.user)
            .and_then(|u| u.edge_owner_to_timeline_media)
            .ok_or_else(|| {
                ScrapeError::parsing(format!("page response for user {user_id} has no timeline"))
            })?;

        let page: MediaPage = timeline.into();
        debug!(
            user_id,
            nodes = page.nodes.len(),
            has_next = page.cursor.token().is_some(),
            "page fetched"
        );
        Ok(page)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::ErrorKind;

    fn catalog_for(server: &MockServer) -> CatalogClient {
        let http = Arc::new(
            HttpClient::with_timeouts(
                CancellationToken::new(),
                Duration::from_secs(5),
                Duration::from_secs(5),
                1,
            )
            .unwrap(),
        );
        CatalogClient::new(http, ProviderEndpoints::with_base_url(server.uri()))
    }

    fn profile_body(user_id: &str, shortcodes: &[&str], next: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "requires_to_login": false,
            "data": {"user": {
                "id": user_id,
                "edge_owner_to_timeline_media": {
                    "count": shortcodes.len(),
                    "page_info": {
                        "has_next_page": next.is_some(),
                        "end_cursor": next,
                    },
                    "edges": shortcodes.iter().map(|sc| serde_json::json!({
                        "node": {
                            "id": format!("id-{sc}"),
                            "shortcode": sc,
                            "display_url": format!("https://cdn.example/{sc}.jpg"),
                            "is_video": false,
                        }
                    })).collect::<Vec<_>>(),
                }
            }},
            "status": "ok"
        })
    }

    #[tokio::test]
    async fn test_fetch_profile_resolves_identity_and_first_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/users/web_profile_info/"))
            .and(query_param("username", "alice"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(profile_body("777", &["A", "B"], Some("p2"))),
            )
            .mount(&server)
            .await;

        let profile = catalog_for(&server).fetch_profile("alice").await.unwrap();
        assert_eq!(profile.user_id, "777");
        assert_eq!(profile.media_count, 2);
        assert_eq!(profile.first_page.nodes.len(), 2);
        assert_eq!(
            profile.first_page.cursor,
            PageCursor::Next("p2".to_string())
        );
    }

    #[tokio::test]
    async fn test_fetch_profile_requires_login_is_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "requires_to_login": true
            })))
            .mount(&server)
            .await;

        let err = catalog_for(&server).fetch_profile("alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_fetch_profile_missing_user_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "requires_to_login": false,
                "data": {"user": null}
            })))
            .mount(&server)
            .await;

        let err = catalog_for(&server).fetch_profile("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_fetch_page_follows_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/graphql/query/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(profile_body("777", &["C"], None)),
            )
            .mount(&server)
            .await;

        let page = catalog_for(&server)
            .fetch_page("777", Some("p2"))
            .await
            .unwrap();
        assert_eq!(page.nodes.len(), 1);
        assert_eq!(page.cursor, PageCursor::Terminal);
    }

    #[tokio::test]
    async fn test_page_url_encodes_cursor_variables() {
        let endpoints = ProviderEndpoints::with_base_url("https://example.test");
        let url = endpoints.page_url("42", Some("cur sor"));
        assert!(url.starts_with("https://example.test/graphql/query/?query_hash="));
        assert!(url.contains("variables="));
        // The raw JSON must be percent-encoded.
        assert!(!url.contains('{'));
        assert!(!url.contains(' '));
    }
}
