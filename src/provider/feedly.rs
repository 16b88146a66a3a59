//! Feedly cloud API adapter.
//!
//! Every http(s) URL can be a feed source: its Feedly stream ID is
//! `feed/{url}`. Besides per-feed streams this client lists the feeds of a
//! subscription collection, which drives feed sync.

use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use super::{endpoint, endpoint_with_segment, ChannelMetadata, Http, ProviderError, RawItem};
use crate::storage::SourceType;

/// Largest `count` the streams endpoint accepts.
const MAX_PAGE_SIZE: usize = 100;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TextBlock {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Link {
    href: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Visual {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Entry {
    id: String,
    title: Option<String>,
    /// Epoch milliseconds
    published: Option<i64>,
    author: Option<String>,
    canonical_url: Option<String>,
    alternate: Vec<Link>,
    summary: Option<TextBlock>,
    content: Option<TextBlock>,
    visual: Option<Visual>,
    thumbnail: Vec<Visual>,
}

impl Entry {
    fn thumbnail_url(&self) -> Option<String> {
        self.visual
            .as_ref()
            .map(|v| v.url.as_str())
            .filter(|url| !url.is_empty() && *url != "none")
            .or_else(|| self.thumbnail.first().map(|t| t.url.as_str()))
            .filter(|url| !url.is_empty())
            .map(str::to_string)
    }

    fn link(&self) -> Option<String> {
        self.canonical_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.alternate.first().map(|l| l.href.as_str()))
            .filter(|u| !u.is_empty())
            .map(str::to_string)
    }

    fn into_raw(self) -> RawItem {
        RawItem {
            thumbnail_url: self.thumbnail_url(),
            link: self.link(),
            published_at: self.published.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            id: self.id,
            title: self.title.unwrap_or_default(),
            summary_markup: self.summary.map(|s| s.content).unwrap_or_default(),
            body_markup: self.content.map(|c| c.content).filter(|c| !c.is_empty()),
            author: self.author.filter(|a| !a.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamPage {
    #[serde(default)]
    items: Vec<Entry>,
    #[serde(default)]
    continuation: Option<String>,
}

/// A feed as Feedly describes it, both in `/v3/feeds` and inside collections.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedInfo {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub website: Option<String>,
    pub icon_url: Option<String>,
    pub visual_url: Option<String>,
    pub cover_url: Option<String>,
    pub language: Option<String>,
    /// Epoch milliseconds of the newest entry
    pub updated: Option<i64>,
}

impl FeedInfo {
    pub fn cover(&self) -> String {
        self.cover_url
            .clone()
            .or_else(|| self.visual_url.clone())
            .unwrap_or_default()
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }
}

#[derive(Debug, Deserialize)]
struct Collection {
    #[serde(default)]
    feeds: Vec<FeedInfo>,
}

// ============================================================================
// Client
// ============================================================================

pub struct FeedlyClient {
    http: Http,
    base: Url,
    token: Option<SecretString>,
    max_items: usize,
}

impl FeedlyClient {
    pub fn new(http: Http, base: Url, token: Option<String>, max_items: usize) -> Self {
        Self {
            http,
            base,
            token: token.map(SecretString::from),
            max_items,
        }
    }

    fn request(&self, url: Url) -> Result<reqwest::RequestBuilder, ProviderError> {
        let token = self
            .token
            .as_ref()
            .ok_or(ProviderError::MissingCredentials(SourceType::Rss))?;
        Ok(self
            .http
            .get(url)
            .header("Authorization", format!("Bearer {}", token.expose_secret())))
    }

    /// Any http(s) URL is a candidate feed.
    pub fn recognizes(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
    }

    pub async fn resolve_external_id(&self, url: &Url) -> Result<String, ProviderError> {
        if !self.recognizes(url) {
            return Err(ProviderError::NotFound(url.to_string()));
        }
        Ok(format!("feed/{}", url))
    }

    /// Newest entries of stream `stream_id`, newest first.
    pub async fn fetch_items(&self, stream_id: &str) -> Result<Vec<RawItem>, ProviderError> {
        let mut items = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let count = (self.max_items - items.len()).min(MAX_PAGE_SIZE).to_string();
            let mut url = endpoint(&self.base, "v3/streams/contents")?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("streamId", stream_id).append_pair("count", &count);
                if let Some(token) = continuation.as_deref() {
                    query.append_pair("continuation", token);
                }
            }

            let page: StreamPage = self.http.json(self.request(url)?).await?;
            let received = page.items.len();
            items.extend(
                page.items
                    .into_iter()
                    .filter(|entry| !entry.id.is_empty())
                    .map(Entry::into_raw),
            );

            continuation = page.continuation.filter(|c| !c.is_empty());
            if items.len() >= self.max_items || received == 0 || continuation.is_none() {
                break;
            }
        }

        items.truncate(self.max_items);
        tracing::debug!(stream_id, count = items.len(), "Fetched Feedly entries");
        Ok(items)
    }

    pub async fn fetch_feed(&self, feed_id: &str) -> Result<FeedInfo, ProviderError> {
        let url = endpoint_with_segment(&self.base, "v3/feeds", feed_id)?;
        match self.http.json(self.request(url)?).await {
            Err(ProviderError::HttpStatus(404)) => Err(ProviderError::NotFound(feed_id.to_string())),
            other => other,
        }
    }

    pub async fn fetch_channel_metadata(
        &self,
        url: &Url,
        feed_id: &str,
    ) -> Result<ChannelMetadata, ProviderError> {
        let feed = self.fetch_feed(feed_id).await?;
        Ok(ChannelMetadata {
            cover_url: feed.cover(),
            published_at: feed.updated_at(),
            title: if feed.title.is_empty() {
                url.host_str().unwrap_or_default().to_string()
            } else {
                feed.title
            },
            description: feed.description.unwrap_or_default(),
            icon_url: feed.icon_url.unwrap_or_default(),
            website_url: feed.website.unwrap_or_else(|| url.to_string()),
            lang: feed.language,
        })
    }

    /// Feeds of subscription collection `category_id`, in Feedly's order.
    pub async fn fetch_collection(&self, category_id: &str) -> Result<Vec<FeedInfo>, ProviderError> {
        let url = endpoint_with_segment(&self.base, "v3/collections", category_id)?;
        let collections: Vec<Collection> = match self.http.json(self.request(url)?).await {
            Err(ProviderError::HttpStatus(404)) => {
                return Err(ProviderError::NotFound(category_id.to_string()))
            }
            other => other?,
        };
        let feeds: Vec<FeedInfo> = collections
            .into_iter()
            .flat_map(|c| c.feeds)
            .filter(|f| !f.id.is_empty())
            .collect();
        tracing::debug!(category_id, count = feeds.len(), "Fetched Feedly collection");
        Ok(feeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer, max_items: usize) -> FeedlyClient {
        FeedlyClient::new(
            Http::new(Duration::from_secs(5)).unwrap(),
            Url::parse(&server.uri()).unwrap(),
            Some("feedly-token".to_string()),
            max_items,
        )
    }

    #[test]
    fn test_entry_thumbnail_fallbacks() {
        let entry: Entry = serde_json::from_value(json!({
            "id": "e1",
            "visual": { "url": "none" },
            "thumbnail": [{ "url": "https://cdn.example.com/t.jpg" }]
        }))
        .unwrap();
        assert_eq!(entry.thumbnail_url().as_deref(), Some("https://cdn.example.com/t.jpg"));

        let entry: Entry = serde_json::from_value(json!({
            "id": "e2",
            "visual": { "url": "https://cdn.example.com/v.jpg" }
        }))
        .unwrap();
        assert_eq!(entry.thumbnail_url().as_deref(), Some("https://cdn.example.com/v.jpg"));

        let entry: Entry = serde_json::from_value(json!({ "id": "e3" })).unwrap();
        assert_eq!(entry.thumbnail_url(), None);
    }

    #[test]
    fn test_entry_into_raw() {
        let entry: Entry = serde_json::from_value(json!({
            "id": "entry-1",
            "title": "Jenkem interview",
            "published": 1_704_067_200_000i64,
            "author": "Staff",
            "alternate": [{ "href": "https://www.jenkemmag.com/interview", "type": "text/html" }],
            "summary": { "content": "<p>Short</p>" },
            "content": { "content": "<p>Long read</p>" }
        }))
        .unwrap();

        let raw = entry.into_raw();
        assert_eq!(raw.id, "entry-1");
        assert_eq!(raw.link.as_deref(), Some("https://www.jenkemmag.com/interview"));
        assert_eq!(raw.summary_markup, "<p>Short</p>");
        assert_eq!(raw.body_markup.as_deref(), Some("<p>Long read</p>"));
        assert_eq!(raw.published_at.unwrap().timestamp(), 1_704_067_200);
    }

    #[tokio::test]
    async fn test_resolve_is_offline() {
        let server = MockServer::start().await;
        let url = Url::parse("https://www.jenkemmag.com/home/feed/").unwrap();
        assert_eq!(
            client(&server, 50).resolve_external_id(&url).await.unwrap(),
            "feed/https://www.jenkemmag.com/home/feed/"
        );
    }

    #[tokio::test]
    async fn test_fetch_items_follows_continuation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/streams/contents"))
            .and(query_param("continuation", "next-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "id": "e3", "title": "Three", "published": 1_700_000_000_000i64 }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/streams/contents"))
            .and(query_param("streamId", "feed/https://blog.example.com/rss"))
            .and(header("Authorization", "Bearer feedly-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "continuation": "next-1",
                "items": [
                    { "id": "e1", "title": "One", "published": 1_700_000_200_000i64 },
                    { "title": "no id" },
                    { "id": "e2", "title": "Two", "published": 1_700_000_100_000i64 }
                ]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let items = client(&server, 50)
            .fetch_items("feed/https://blog.example.com/rss")
            .await
            .unwrap();
        assert_eq!(
            items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>(),
            vec!["e1", "e2", "e3"]
        );
    }

    #[tokio::test]
    async fn test_fetch_collection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v3/collections/.+"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "user/u1/category/skate",
                "label": "skate",
                "feeds": [
                    { "id": "feed/https://a.example.com/rss", "title": "A", "website": "https://a.example.com", "visualUrl": "https://a.example.com/v.png" },
                    { "id": "feed/https://b.example.com/rss", "title": "B", "language": "fr" }
                ]
            }])))
            .mount(&server)
            .await;

        let feeds = client(&server, 50)
            .fetch_collection("user/u1/category/skate")
            .await
            .unwrap();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].title, "A");
        assert_eq!(feeds[0].cover(), "https://a.example.com/v.png");
        assert_eq!(feeds[1].language.as_deref(), Some("fr"));
    }

    #[tokio::test]
    async fn test_fetch_channel_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v3/feeds/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "feed/https://blog.example.com/rss",
                "title": "Example Blog",
                "description": "Skate news",
                "website": "https://blog.example.com",
                "iconUrl": "https://blog.example.com/icon.png",
                "coverUrl": "https://blog.example.com/cover.png",
                "language": "en",
                "updated": 1_700_000_000_000i64
            })))
            .mount(&server)
            .await;

        let url = Url::parse("https://blog.example.com/rss").unwrap();
        let meta = client(&server, 50)
            .fetch_channel_metadata(&url, "feed/https://blog.example.com/rss")
            .await
            .unwrap();
        assert_eq!(meta.title, "Example Blog");
        assert_eq!(meta.icon_url, "https://blog.example.com/icon.png");
        assert_eq!(meta.cover_url, "https://blog.example.com/cover.png");
        assert_eq!(meta.lang.as_deref(), Some("en"));
        assert_eq!(meta.published_at.unwrap().timestamp(), 1_700_000_000);
    }
}
