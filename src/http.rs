//! Typed-error HTTP façade over `reqwest`.
//!
//! The client exposes exactly what the pipeline needs: JSON GETs for the
//! catalog, byte GETs for media content, and a caller-settable header map for
//! opaque session material. Status codes map onto the canonical
//! [`ErrorKind`](crate::error::ErrorKind) taxonomy; retryable failures are
//! re-attempted internally with error-kind-dispatched backoff.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::ScrapeError;
use crate::retry::{Backoff, Retrier};

/// Default connect timeout in seconds.
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default whole-request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Default User-Agent; the embedding layer usually overrides it through the
/// header map alongside its session material.
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// HTTP client for catalog lookups and content downloads.
///
/// Designed to be created once per session and shared behind an `Arc`; the
/// underlying `reqwest::Client` pools connections.
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    headers: RwLock<HashMap<String, String>>,
    retrier: Retrier,
    cancel: CancellationToken,
}

impl HttpClient {
    /// Creates a client with default timeouts and retry tuning.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error if the underlying client cannot be built.
    pub fn new(cancel: CancellationToken) -> Result<Self, ScrapeError> {
        Self::with_timeouts(
            cancel,
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
            3,
        )
    }

    /// Creates a client with explicit timeouts and retry attempt ceiling,
    /// using the default error-kind-dispatched backoff.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error if the underlying client cannot be built.
    pub fn with_timeouts(
        cancel: CancellationToken,
        connect_timeout: Duration,
        request_timeout: Duration,
        max_attempts: u32,
    ) -> Result<Self, ScrapeError> {
        Self::with_config(
            cancel,
            connect_timeout,
            request_timeout,
            max_attempts,
            Backoff::by_error_kind(),
        )
    }

    /// Creates a client with explicit timeouts and retry tuning.
    ///
    /// # Errors
    ///
    /// Returns an `Unknown` error if the underlying client cannot be built.
    #[instrument(level = "debug", skip(cancel, backoff))]
    pub fn with_config(
        cancel: CancellationToken,
        connect_timeout: Duration,
        request_timeout: Duration,
        max_attempts: u32,
        backoff: Backoff,
    ) -> Result<Self, ScrapeError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .gzip(true)
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|e| {
                ScrapeError::new(
                    crate::error::ErrorKind::Unknown,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        Ok(Self {
            client,
            headers: RwLock::new(HashMap::new()),
            retrier: Retrier::new(max_attempts, backoff, cancel.clone()),
            cancel,
        })
    }

    /// Sets one request header, replacing any previous value.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.headers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(name.into(), value.into());
    }

    /// Replaces the whole header map.
    pub fn set_headers(&self, headers: HashMap<String, String>) {
        *self
            .headers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = headers;
    }

    /// Performs a single GET, mapping transport failures and error statuses
    /// onto the canonical taxonomy. No retries at this layer.
    ///
    /// # Errors
    ///
    /// Returns a `ScrapeError` classified from the failure.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn get(&self, url: &str) -> Result<reqwest::Response, ScrapeError> {
        let started = Instant::now();
        debug!(method = "GET", url = %url, "dispatching request");

        let mut request = self.client.get(url);
        {
            let headers = self
                .headers
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            for (name, value) in headers.iter() {
                request = request.header(name, value);
            }
        }

        // An in-flight request is abandoned when the session is cancelled.
        let send_result = tokio::select! {
            () = self.cancel.cancelled() => {
                return Err(ScrapeError::canceled(format!("GET {url} cancelled")));
            }
            result = request.send() => result,
        };

        let response = send_result.map_err(|e| {
            let err = ScrapeError::network(format!("GET {url} failed: {e}"));
            warn!(
                method = "GET",
                url = %url,
                elapsed_ms = started.elapsed().as_millis(),
                error = %err,
                "request failed"
            );
            err
        })?;

        let status = response.status().as_u16();
        let elapsed_ms = started.elapsed().as_millis();
        if response.status().is_success() {
            debug!(method = "GET", url = %url, status, elapsed_ms, "request complete");
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(std::string::ToString::to_string);
        let err =
            ScrapeError::from_status(status, format!("GET {url}")).with_retry_after(retry_after);
        warn!(method = "GET", url = %url, status, elapsed_ms, kind = %err.kind(), "request failed");
        Err(err)
    }

    /// Fetches a URL and decodes the JSON body, retrying retryable failures.
    ///
    /// # Errors
    ///
    /// Returns a `Parsing` error when the body does not decode, or the
    /// classified HTTP error after retries are exhausted.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ScrapeError> {
        self.retrier
            .run(|| async {
                let response = self.get(url).await?;
                response.json::<T>().await.map_err(|e| {
                    ScrapeError::parsing(format!("failed to decode JSON from {url}: {e}"))
                })
            })
            .await
    }

    /// Fetches a URL's full body as bytes, retrying retryable failures.
    ///
    /// # Errors
    ///
    /// Returns the classified HTTP error after retries are exhausted, or a
    /// `Network` error when the body stream breaks mid-transfer.
    pub async fn download_bytes(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
        self.retrier
            .run(|| async {
                let response = self.get(url).await?;
                let bytes = response.bytes().await.map_err(|e| {
                    ScrapeError::network(format!("body read from {url} failed: {e}"))
                })?;
                Ok(bytes.to_vec())
            })
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::ErrorKind;

    fn test_client() -> HttpClient {
        HttpClient::with_timeouts(
            CancellationToken::new(),
            Duration::from_secs(5),
            Duration::from_secs(5),
            1,
        )
        .unwrap()
    }

    #[derive(Debug, serde::Deserialize)]
    struct Payload {
        value: u32,
    }

    #[tokio::test]
    async fn test_get_json_decodes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "value": 17
            })))
            .mount(&server)
            .await;

        let client = test_client();
        let payload: Payload = client.get_json(&format!("{}/data", server.uri())).await.unwrap();
        assert_eq!(payload.value, 17);
    }

    #[tokio::test]
    async fn test_get_json_malformed_body_is_parsing_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = test_client();
        let result: Result<Payload, _> = client.get_json(&format!("{}/data", server.uri())).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Parsing);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (429, ErrorKind::RateLimit),
            (401, ErrorKind::Auth),
            (404, ErrorKind::NotFound),
            (500, ErrorKind::ServerError),
            (503, ErrorKind::ServerError),
            (403, ErrorKind::Unknown),
        ];
        for (status, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let client = test_client();
            let err = client.get(&server.uri()).await.unwrap_err();
            assert_eq!(err.kind(), expected, "status {status}");
            assert_eq!(err.status(), status);
        }
    }

    #[tokio::test]
    async fn test_rate_limit_error_captures_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let client = test_client();
        let err = client.get(&server.uri()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.retry_after(), Some("7"));
    }

    #[tokio::test]
    async fn test_headers_attached_to_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("X-Session-Id", "abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".as_slice()))
            .mount(&server)
            .await;

        let client = test_client();
        client.set_header("X-Session-Id", "abc123");
        let body = client.download_bytes(&server.uri()).await.unwrap();
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_download_bytes_retries_server_errors() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct FlakyResponder(AtomicU32);
        impl wiremock::Respond for FlakyResponder {
            fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
                if self.0.fetch_add(1, Ordering::SeqCst) < 2 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_bytes(b"payload".as_slice())
                }
            }
        }

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(FlakyResponder(AtomicU32::new(0)))
            .mount(&server)
            .await;

        let client = HttpClient::with_config(
            CancellationToken::new(),
            Duration::from_secs(5),
            Duration::from_secs(5),
            3,
            Backoff::constant(Duration::from_millis(10)),
        )
        .unwrap();
        let body = client.download_bytes(&server.uri()).await.unwrap();
        assert_eq!(body, b"payload");
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let client = test_client();
        // Port 9 (discard) is almost certainly closed.
        let err = client.get("http://127.0.0.1:9/x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert_eq!(err.status(), 0);
    }
}
