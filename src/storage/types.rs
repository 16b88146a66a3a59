use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Database is locked by another process. Please retry once it finishes.")]
    InstanceLocked,

    /// A write waited out the busy timeout behind other writers
    #[error("Database stayed busy past the lock timeout. Retry the operation.")]
    Busy,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// The source was removed while its refresh was in flight
    #[error("Source {0} no longer exists")]
    SourceGone(i64),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error raised by a query on an open database.
    ///
    /// Lock errors here come from writers sharing the pool as much as from
    /// other processes, so they map to `Busy`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return DatabaseError::Busy;
        }
        DatabaseError::Other(err)
    }

    /// Classify a sqlx error raised while opening the database.
    pub(crate) fn from_open(err: sqlx::Error) -> Self {
        match Self::from_sqlx(err) {
            DatabaseError::Busy => DatabaseError::InstanceLocked,
            other => other,
        }
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// plain messages through sqlx.
pub(crate) fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Provider Tag
// ============================================================================

/// Provider family a source belongs to.
///
/// Stored and serialized as `youtube`, `vimeo` and `rss`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SourceType {
    /// Video channels served by the YouTube Data API
    Youtube,
    /// Vimeo user accounts
    Vimeo,
    /// Article feeds aggregated through Feedly
    Rss,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [SourceType::Youtube, SourceType::Vimeo, SourceType::Rss];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Youtube => "youtube",
            SourceType::Vimeo => "vimeo",
            SourceType::Rss => "rss",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown source type `{0}` (expected youtube, vimeo or rss)")]
pub struct UnknownSourceType(pub String);

impl FromStr for SourceType {
    type Err = UnknownSourceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "youtube" => Ok(SourceType::Youtube),
            "vimeo" => Ok(SourceType::Vimeo),
            "rss" => Ok(SourceType::Rss),
            other => Err(UnknownSourceType(other.to_owned())),
        }
    }
}

// ============================================================================
// Input Types
// ============================================================================

/// A normalized item ready for reconciliation.
///
/// `content_id` is the provider's own identifier and the dedup key.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalItem {
    pub content_id: String,
    pub title: String,
    pub raw_summary: String,
    pub summary: String,
    pub published_at: DateTime<Utc>,
    pub thumbnail_url: String,
    pub content_url: String,
    pub raw_body: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
}

/// A source about to be inserted, from registration or feed sync.
#[derive(Debug, Clone)]
pub struct NewSource {
    pub source_type: SourceType,
    pub source_id: String,
    pub title: String,
    pub short_title: String,
    pub description: String,
    pub icon_url: String,
    pub cover_url: String,
    pub website_url: String,
    pub lang: String,
    pub curated: bool,
    pub published_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Row Types
// ============================================================================

/// Timestamps are stored as unix seconds.
pub(crate) fn from_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SourceRow {
    pub id: i64,
    pub source_type: SourceType,
    pub source_id: String,
    pub sort_order: i64,
    pub title: String,
    pub short_title: String,
    pub description: String,
    pub icon_url: String,
    pub cover_url: String,
    pub website_url: String,
    pub lang: String,
    pub curated: bool,
    pub published_at: Option<i64>,
    pub refreshed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SourceRow {
    pub(crate) fn into_source(self) -> Source {
        Source {
            id: self.id,
            source_type: self.source_type,
            source_id: self.source_id,
            order: self.sort_order,
            title: self.title,
            short_title: self.short_title,
            description: self.description,
            icon_url: self.icon_url,
            cover_url: self.cover_url,
            website_url: self.website_url,
            lang: self.lang,
            curated: self.curated,
            published_at: self.published_at.map(from_timestamp),
            refreshed_at: self.refreshed_at.map(from_timestamp),
            created_at: from_timestamp(self.created_at),
            updated_at: from_timestamp(self.updated_at),
        }
    }
}

/// Column list matching [`SourceRow`], shared by every source query.
pub(crate) const SOURCE_COLUMNS: &str = "id, source_type, source_id, sort_order, title, short_title, \
     description, icon_url, cover_url, website_url, lang, curated, published_at, refreshed_at, \
     created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ContentRow {
    pub id: String,
    pub source_id: i64,
    pub content_id: String,
    pub source_type: SourceType,
    pub published_at: i64,
    pub title: String,
    pub content_url: String,
    pub thumbnail_url: String,
    pub raw_summary: String,
    pub summary: String,
    pub raw_body: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ContentRow {
    pub(crate) fn into_content(self) -> Content {
        Content {
            id: self.id,
            source_id: self.source_id,
            content_id: self.content_id,
            source_type: self.source_type,
            published_at: from_timestamp(self.published_at),
            title: self.title,
            content_url: self.content_url,
            thumbnail_url: self.thumbnail_url,
            raw_summary: self.raw_summary,
            summary: self.summary,
            raw_body: self.raw_body,
            body: self.body,
            author: self.author,
            created_at: from_timestamp(self.created_at),
            updated_at: from_timestamp(self.updated_at),
        }
    }
}

/// Column list matching [`ContentRow`].
pub(crate) const CONTENT_COLUMNS: &str = "id, source_id, content_id, source_type, published_at, \
     title, content_url, thumbnail_url, raw_summary, summary, raw_body, body, author, created_at, \
     updated_at";

// ============================================================================
// Data Structures
// ============================================================================

/// A registered external content origin (channel, feed).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: i64,
    pub source_type: SourceType,
    /// Provider-assigned identifier, unique among live sources
    pub source_id: String,
    /// Display position, assigned monotonically on creation
    pub order: i64,
    pub title: String,
    pub short_title: String,
    pub description: String,
    pub icon_url: String,
    pub cover_url: String,
    pub website_url: String,
    pub lang: String,
    pub curated: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One ingested video or article.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    /// Generated opaque identifier (UUID v4)
    pub id: String,
    /// Internal id of the owning source
    pub source_id: i64,
    /// Provider-assigned identifier; the dedup key
    pub content_id: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub content_url: String,
    pub thumbnail_url: String,
    pub raw_summary: String,
    pub summary: String,
    pub raw_body: Option<String>,
    pub body: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rows written by one reconciliation.
#[derive(Debug, Default)]
pub struct Reconciled {
    pub created: Vec<Content>,
    pub updated: Vec<Content>,
}
