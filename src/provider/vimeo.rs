//! Vimeo API adapter.
//!
//! Sources are user accounts identified by their numeric user ID. Videos are
//! listed newest first and paged through `paging.next`, a path relative to
//! the API root.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use super::{bare_host, endpoint, endpoint_with_segment, ChannelMetadata, Http, ProviderError, RawItem};
use crate::storage::SourceType;

/// Largest `per_page` the API accepts.
const MAX_PAGE_SIZE: usize = 100;

/// Top-level vimeo.com paths that are site sections, not user profiles.
const RESERVED_PATHS: &[&str] = &[
    "channels", "groups", "categories", "ondemand", "watch", "search", "upload", "features",
    "blog", "help", "about", "jobs", "log_in", "join", "settings", "user",
];

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PictureSize {
    width: u32,
    link: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Pictures {
    sizes: Vec<PictureSize>,
}

impl Pictures {
    /// Widest rendition.
    fn best(&self) -> Option<&str> {
        self.sizes
            .iter()
            .filter(|s| !s.link.is_empty())
            .max_by_key(|s| s.width)
            .map(|s| s.link.as_str())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoUser {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Video {
    uri: String,
    name: String,
    description: Option<String>,
    link: Option<String>,
    release_time: Option<DateTime<Utc>>,
    created_time: Option<DateTime<Utc>>,
    pictures: Option<Pictures>,
    user: Option<VideoUser>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Paging {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoPage {
    #[serde(default)]
    data: Vec<Video>,
    #[serde(default)]
    paging: Paging,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct User {
    uri: String,
    name: String,
    bio: Option<String>,
    link: String,
    created_time: Option<DateTime<Utc>>,
    pictures: Option<Pictures>,
}

/// Numeric tail of a resource URI such as `/videos/123456`.
fn uri_id(uri: &str) -> Option<&str> {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
}

/// Profile slug of a `vimeo.com/{user}` URL.
fn profile_slug(url: &Url) -> Option<&str> {
    if bare_host(url) != Some("vimeo.com") {
        return None;
    }
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    let slug = segments.next()?;
    if segments.next().is_some()
        || slug.bytes().all(|b| b.is_ascii_digit())
        || RESERVED_PATHS.contains(&slug)
    {
        return None;
    }
    Some(slug)
}

// ============================================================================
// Client
// ============================================================================

pub struct VimeoClient {
    http: Http,
    base: Url,
    token: Option<SecretString>,
    max_items: usize,
}

impl VimeoClient {
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
            .ok_or(ProviderError::MissingCredentials(SourceType::Vimeo))?;
        Ok(self
            .http
            .get(url)
            .header("Authorization", format!("bearer {}", token.expose_secret()))
            .header("Accept", "application/vnd.vimeo.*+json;version=3.4"))
    }

    async fn user(&self, slug_or_id: &str) -> Result<User, ProviderError> {
        let url = endpoint_with_segment(&self.base, "users", slug_or_id)?;
        match self.http.json(self.request(url)?).await {
            Err(ProviderError::HttpStatus(404)) => Err(ProviderError::NotFound(slug_or_id.to_string())),
            other => other,
        }
    }

    pub fn recognizes(&self, url: &Url) -> bool {
        profile_slug(url).is_some()
    }

    pub async fn resolve_external_id(&self, url: &Url) -> Result<String, ProviderError> {
        let slug = profile_slug(url).ok_or_else(|| ProviderError::NotFound(url.to_string()))?;
        let user = self.user(slug).await?;
        uri_id(&user.uri)
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Parse(format!("unexpected user uri `{}`", user.uri)))
    }

    /// Newest videos of user `user_id`, newest first.
    pub async fn fetch_items(&self, user_id: &str) -> Result<Vec<RawItem>, ProviderError> {
        let per_page = self.max_items.min(MAX_PAGE_SIZE).to_string();
        let mut url = endpoint_with_segment(&self.base, "users", user_id)?;
        url.path_segments_mut()
            .map_err(|_| ProviderError::Parse("API base URL cannot hold a path".to_string()))?
            .push("videos");
        url.query_pairs_mut()
            .append_pair("sort", "date")
            .append_pair("direction", "desc")
            .append_pair("per_page", &per_page)
            .append_pair("page", "1");

        let mut items = Vec::new();
        loop {
            let page: VideoPage = self.http.json(self.request(url)?).await?;
            let received = page.data.len();

            items.extend(page.data.into_iter().filter_map(|video| {
                let id = uri_id(&video.uri)?.to_string();
                Some(RawItem {
                    link: video
                        .link
                        .filter(|l| !l.is_empty())
                        .or_else(|| Some(format!("https://vimeo.com/{}", id))),
                    id,
                    title: video.name,
                    summary_markup: video.description.unwrap_or_default(),
                    body_markup: None,
                    published_at: video.release_time.or(video.created_time),
                    thumbnail_url: video
                        .pictures
                        .as_ref()
                        .and_then(Pictures::best)
                        .map(str::to_string),
                    author: video.user.map(|u| u.name).filter(|n| !n.is_empty()),
                })
            }));

            // Only relative continuation paths are followed; the token never
            // leaves the configured API host.
            let next = match page.paging.next.as_deref() {
                Some(next) if next.starts_with('/') => next.to_string(),
                _ => break,
            };
            if items.len() >= self.max_items || received == 0 {
                break;
            }
            url = endpoint(&self.base, &next)?;
        }

        items.truncate(self.max_items);
        tracing::debug!(user_id, count = items.len(), "Fetched Vimeo videos");
        Ok(items)
    }

    pub async fn fetch_channel_metadata(&self, user_id: &str) -> Result<ChannelMetadata, ProviderError> {
        let user = self.user(user_id).await?;
        Ok(ChannelMetadata {
            title: user.name,
            description: user.bio.unwrap_or_default(),
            icon_url: user
                .pictures
                .as_ref()
                .and_then(Pictures::best)
                .unwrap_or_default()
                .to_string(),
            cover_url: String::new(),
            website_url: user.link,
            lang: None,
            published_at: user.created_time,
        })
    }
}
