//! YouTube Data API v3 adapter.
//!
//! Sources are channels; items come from the `search` endpoint ordered by
//! date, which pages with `nextPageToken` and returns at most 50 results per
//! page.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use super::{bare_host, endpoint, ChannelMetadata, Http, ProviderError, RawItem};
use crate::storage::SourceType;

/// Largest `maxResults` the search endpoint accepts.
const MAX_PAGE_SIZE: usize = 50;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
    standard: Option<Thumbnail>,
    maxres: Option<Thumbnail>,
}

impl Thumbnails {
    /// Largest variant present: maxres, standard, high, medium, default.
    fn best(&self) -> Option<&str> {
        [
            &self.maxres,
            &self.standard,
            &self.high,
            &self.medium,
            &self.default,
        ]
        .into_iter()
        .flatten()
        .map(|t| t.url.as_str())
        .find(|url| !url.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SearchId {
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct VideoSnippet {
    published_at: Option<DateTime<Utc>>,
    title: String,
    description: String,
    channel_title: String,
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    id: SearchId,
    #[serde(default)]
    snippet: VideoSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<SearchResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ChannelSnippet {
    title: String,
    description: String,
    custom_url: Option<String>,
    published_at: Option<DateTime<Utc>>,
    default_language: Option<String>,
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct BrandingImage {
    banner_external_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BrandingSettings {
    image: BrandingImage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Channel {
    id: String,
    #[serde(default)]
    snippet: ChannelSnippet,
    #[serde(default)]
    branding_settings: BrandingSettings,
}

#[derive(Debug, Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<Channel>,
}

// ============================================================================
// URL Shapes
// ============================================================================

/// Channel reference extracted from a youtube.com URL.
#[derive(Debug, PartialEq, Eq)]
enum ChannelRef<'a> {
    Id(&'a str),
    Handle(&'a str),
    Username(&'a str),
}

fn channel_ref(url: &Url) -> Option<ChannelRef<'_>> {
    if bare_host(url) != Some("youtube.com") {
        return None;
    }
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let first = segments.next()?;

    if let Some(handle) = first.strip_prefix('@') {
        return (!handle.is_empty()).then_some(ChannelRef::Handle(first));
    }
    match (first, segments.next()) {
        ("channel", Some(id)) if id.starts_with("UC") => Some(ChannelRef::Id(id)),
        ("user", Some(name)) => Some(ChannelRef::Username(name)),
        _ => None,
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct YouTubeClient {
    http: Http,
    base: Url,
    api_key: Option<SecretString>,
    max_items: usize,
}

impl YouTubeClient {
    pub fn new(http: Http, base: Url, api_key: Option<String>, max_items: usize) -> Self {
        Self {
            http,
            base,
            api_key: api_key.map(SecretString::from),
            max_items,
        }
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret())
            .ok_or(ProviderError::MissingCredentials(SourceType::Youtube))
    }

    /// `{base}/{path}` with the API key and `params` as query string.
    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, ProviderError> {
        let mut url = endpoint(&self.base, path)?;
        url.query_pairs_mut()
            .extend_pairs(params)
            .append_pair("key", self.api_key()?);
        Ok(url)
    }

    pub fn recognizes(&self, url: &Url) -> bool {
        channel_ref(url).is_some()
    }

    pub async fn resolve_external_id(&self, url: &Url) -> Result<String, ProviderError> {
        let lookup = match channel_ref(url) {
            Some(ChannelRef::Id(id)) => return Ok(id.to_string()),
            Some(ChannelRef::Handle(handle)) => ("forHandle", handle),
            Some(ChannelRef::Username(name)) => ("forUsername", name),
            None => return Err(ProviderError::NotFound(url.to_string())),
        };

        let url_for_lookup = self.url("channels", &[("part", "id"), lookup])?;
        let response: ChannelListResponse = self.http.json(self.http.get(url_for_lookup)).await?;
        response
            .items
            .into_iter()
            .next()
            .map(|channel| channel.id)
            .ok_or_else(|| ProviderError::NotFound(url.to_string()))
    }

    /// Newest videos of channel `channel_id`, newest first.
    pub async fn fetch_items(&self, channel_id: &str) -> Result<Vec<RawItem>, ProviderError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page_size = (self.max_items - items.len()).min(MAX_PAGE_SIZE).to_string();
            let mut params = vec![
                ("channelId", channel_id),
                ("part", "snippet"),
                ("order", "date"),
                ("type", "video"),
                ("maxResults", page_size.as_str()),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }

            let url = self.url("search", &params)?;
            let page: SearchResponse = self.http.json(self.http.get(url)).await?;
            let received = page.items.len();

            items.extend(page.items.into_iter().filter_map(|result| {
                let video_id = result.id.video_id.filter(|id| !id.is_empty())?;
                let snippet = result.snippet;
                Some(RawItem {
                    link: Some(format!("https://www.youtube.com/watch?v={}", video_id)),
                    id: video_id,
                    title: snippet.title,
                    summary_markup: snippet.description,
                    body_markup: None,
                    published_at: snippet.published_at,
                    thumbnail_url: snippet.thumbnails.best().map(str::to_string),
                    author: Some(snippet.channel_title).filter(|a| !a.is_empty()),
                })
            }));

            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if items.len() >= self.max_items || received == 0 || page_token.is_none() {
                break;
            }
        }

        items.truncate(self.max_items);
        tracing::debug!(channel_id, count = items.len(), "Fetched YouTube videos");
        Ok(items)
    }

    pub async fn fetch_channel_metadata(
        &self,
        channel_id: &str,
    ) -> Result<ChannelMetadata, ProviderError> {
        let url = self.url(
            "channels",
            &[("part", "snippet,brandingSettings"), ("id", channel_id)],
        )?;
        let response: ChannelListResponse = self.http.json(self.http.get(url)).await?;
        let channel = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::NotFound(channel_id.to_string()))?;

        let website_url = match channel.snippet.custom_url.as_deref() {
            Some(custom) if !custom.is_empty() => format!("https://www.youtube.com/{}", custom),
            _ => format!("https://www.youtube.com/channel/{}", channel.id),
        };

        Ok(ChannelMetadata {
            title: channel.snippet.title,
            description: channel.snippet.description,
            icon_url: channel.snippet.thumbnails.best().unwrap_or_default().to_string(),
            cover_url: channel
                .branding_settings
                .image
                .banner_external_url
                .unwrap_or_default(),
            website_url,
            lang: channel.snippet.default_language,
            published_at: channel.snippet.published_at,
        })
    }
}
