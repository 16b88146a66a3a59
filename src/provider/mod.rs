//! Provider adapters: one per external API family.
//!
//! The set of providers is closed, so adapters are the variants of
//! [`Adapter`] rather than trait objects. Registration picks a variant by
//! probing [`Adapter::recognizes`] in a fixed order; refresh picks it by the
//! source's stored [`SourceType`].

pub mod feedly;
pub mod vimeo;
pub mod youtube;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::redirect::Policy;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::storage::{Source, SourceType};
use crate::util::{validate_api_base, UrlValidationError};

pub use feedly::FeedlyClient;
pub use vimeo::VimeoClient;
pub use youtube::YouTubeClient;

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while talking to a provider API.
///
/// Messages never include request URLs, since some providers take their
/// credentials as a query parameter.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body was not the expected JSON shape
    #[error("Parse error: {0}")]
    Parse(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// No credentials configured for this provider
    #[error("No credentials configured for {0}")]
    MissingCredentials(SourceType),
    /// The provider has no channel or feed behind the given URL
    #[error("Not found: {0}")]
    NotFound(String),
    /// A configured API base URL is unusable
    #[error("Invalid API base URL: {0}")]
    InvalidBaseUrl(#[from] UrlValidationError),
}

impl ProviderError {
    fn network(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ProviderError::Timeout;
        }
        ProviderError::Network(err.without_url())
    }
}

// ============================================================================
// Adapter Output
// ============================================================================

/// One item as the provider describes it, before normalization.
///
/// Markup fields hold the provider's native text (HTML for feeds, plain text
/// with entities for video descriptions).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawItem {
    /// Provider-assigned identifier, used verbatim as the content ID
    pub id: String,
    pub title: String,
    pub summary_markup: String,
    pub body_markup: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Best available thumbnail, already chosen among size variants
    pub thumbnail_url: Option<String>,
    pub link: Option<String>,
    pub author: Option<String>,
}

/// Descriptive fields of a channel or feed, used when creating a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMetadata {
    pub title: String,
    pub description: String,
    pub icon_url: String,
    pub cover_url: String,
    pub website_url: String,
    pub lang: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

// ============================================================================
// HTTP
// ============================================================================

/// Limit redirects to 3 hops and reject loops.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            to = %url.host_str().unwrap_or("unknown"),
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// Shared HTTP plumbing: one connection pool, a per-request timeout and a
/// response size cap.
#[derive(Clone)]
pub struct Http {
    client: reqwest::Client,
    timeout: Duration,
}

impl Http {
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .redirect(create_redirect_policy())
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(timeout)
            .user_agent(concat!("scribe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ProviderError::network)?;
        Ok(Self { client, timeout })
    }

    pub(crate) fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.client.get(url)
    }

    /// Send `request` and decode a JSON body.
    ///
    /// No retries: a failed request is reported to the caller as is.
    pub(crate) async fn json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ProviderError> {
        let bytes = tokio::time::timeout(self.timeout, async {
            let response = request.send().await.map_err(ProviderError::network)?;
            let status = response.status();
            if !status.is_success() {
                return Err(ProviderError::HttpStatus(status.as_u16()));
            }
            read_limited_bytes(response, MAX_RESPONSE_SIZE).await
        })
        .await
        .map_err(|_| ProviderError::Timeout)??;

        serde_json::from_slice(&bytes).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ProviderError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ProviderError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ProviderError::network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ProviderError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

/// `{base}/{path}` with `path` appended as-is.
pub(crate) fn endpoint(base: &Url, path: &str) -> Result<Url, ProviderError> {
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| ProviderError::Parse(format!("bad endpoint {}: {}", path, e)))
}

/// `{base}/{prefix}/{segment}` with `segment` percent-encoded as one path segment.
pub(crate) fn endpoint_with_segment(
    base: &Url,
    prefix: &str,
    segment: &str,
) -> Result<Url, ProviderError> {
    let mut url = endpoint(base, prefix)?;
    url.path_segments_mut()
        .map_err(|_| ProviderError::Parse("API base URL cannot hold a path".to_string()))?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}

/// Host without a leading `www.` or `m.`
pub(crate) fn bare_host(url: &Url) -> Option<&str> {
    url.host_str().map(|h| {
        h.strip_prefix("www.")
            .or_else(|| h.strip_prefix("m."))
            .unwrap_or(h)
    })
}

// ============================================================================
// Adapter
// ============================================================================

/// One provider's capability set.
pub enum Adapter {
    Youtube(YouTubeClient),
    Vimeo(VimeoClient),
    Feedly(FeedlyClient),
}

impl Adapter {
    pub fn source_type(&self) -> SourceType {
        match self {
            Adapter::Youtube(_) => SourceType::Youtube,
            Adapter::Vimeo(_) => SourceType::Vimeo,
            Adapter::Feedly(_) => SourceType::Rss,
        }
    }

    /// Whether this provider can handle a free-form source URL.
    pub fn recognizes(&self, url: &Url) -> bool {
        match self {
            Adapter::Youtube(c) => c.recognizes(url),
            Adapter::Vimeo(c) => c.recognizes(url),
            Adapter::Feedly(c) => c.recognizes(url),
        }
    }

    /// Map a source URL to the provider's own identifier.
    ///
    /// Returns `ProviderError::NotFound` when the provider has nothing there.
    pub async fn resolve_external_id(&self, url: &Url) -> Result<String, ProviderError> {
        match self {
            Adapter::Youtube(c) => c.resolve_external_id(url).await,
            Adapter::Vimeo(c) => c.resolve_external_id(url).await,
            Adapter::Feedly(c) => c.resolve_external_id(url).await,
        }
    }

    /// Newest items of `source`, newest first, bounded by the configured page size.
    pub async fn fetch_items(&self, source: &Source) -> Result<Vec<RawItem>, ProviderError> {
        match self {
            Adapter::Youtube(c) => c.fetch_items(&source.source_id).await,
            Adapter::Vimeo(c) => c.fetch_items(&source.source_id).await,
            Adapter::Feedly(c) => c.fetch_items(&source.source_id).await,
        }
    }

    /// Channel or feed metadata for the source behind `url`, already resolved
    /// to `external_id`.
    pub async fn fetch_channel_metadata(
        &self,
        url: &Url,
        external_id: &str,
    ) -> Result<ChannelMetadata, ProviderError> {
        match self {
            Adapter::Youtube(c) => c.fetch_channel_metadata(external_id).await,
            Adapter::Vimeo(c) => c.fetch_channel_metadata(external_id).await,
            Adapter::Feedly(c) => c.fetch_channel_metadata(url, external_id).await,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// All adapters, built once from configuration.
pub struct Providers {
    youtube: Adapter,
    vimeo: Adapter,
    feedly: Adapter,
}

impl Providers {
    /// Build every adapter from `config`.
    ///
    /// Missing credentials are not an error here; the affected provider fails
    /// its own requests with `ProviderError::MissingCredentials`.
    pub fn new(config: &Config) -> Result<Self, ProviderError> {
        let http = Http::new(config.refresh.request_timeout())?;
        let max_items = config.refresh.max_items();

        Ok(Self {
            youtube: Adapter::Youtube(YouTubeClient::new(
                http.clone(),
                validate_api_base(&config.youtube.base_url)?,
                config.youtube.api_key.clone(),
                max_items,
            )),
            vimeo: Adapter::Vimeo(VimeoClient::new(
                http.clone(),
                validate_api_base(&config.vimeo.base_url)?,
                config.vimeo.access_token.clone(),
                max_items,
            )),
            feedly: Adapter::Feedly(FeedlyClient::new(
                http,
                validate_api_base(&config.feedly.base_url)?,
                config.feedly.access_token.clone(),
                max_items,
            )),
        })
    }

    pub fn for_type(&self, kind: SourceType) -> &Adapter {
        match kind {
            SourceType::Youtube => &self.youtube,
            SourceType::Vimeo => &self.vimeo,
            SourceType::Rss => &self.feedly,
        }
    }

    /// First adapter that recognizes `url`, probing video providers before
    /// the generic feed provider.
    pub fn recognize(&self, url: &Url) -> Option<&Adapter> {
        [&self.youtube, &self.vimeo, &self.feedly]
            .into_iter()
            .find(|adapter| adapter.recognizes(url))
    }

    pub fn feedly(&self) -> Option<&FeedlyClient> {
        match &self.feedly {
            Adapter::Feedly(client) => Some(client),
            _ => None,
        }
    }
}
