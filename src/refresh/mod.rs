//! Refresh use-cases: refresh by provider type, refresh one source, feed
//! sync and source registration.
//!
//! A [`Refresher`] is built once from the loaded configuration and shared by
//! every call. Multi-source refreshes never fail as a whole because of one
//! source; single-source calls surface their unit's error directly.

pub mod normalize;
pub mod orchestrator;

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::provider::{Adapter, ProviderError, Providers};
use crate::storage::{Content, Database, DatabaseError, NewSource, Source, SourceType};
use crate::util::{strip_control_chars, validate_source_url};

pub use normalize::normalize;
pub use orchestrator::{Orchestrator, RefreshOutcome, UnitState};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum RefreshError {
    /// Provider could not be reached or answered with something unusable
    #[error("Fetch failed: {0}")]
    AdapterFetch(#[from] ProviderError),
    /// No adapter recognizes or can resolve the URL
    #[error("Unsupported source URL: {0}")]
    UnsupportedUrl(String),
    /// A live source already has this external ID
    #[error("Source already registered: {0}")]
    DuplicateSource(String),
    /// The unit's transaction failed and was rolled back
    #[error("Persistence failed: {0}")]
    Persistence(DatabaseError),
    /// Malformed request parameters
    #[error("Invalid request: {0}")]
    Validation(String),
    #[error("Source {0} not found")]
    SourceNotFound(i64),
    /// The unit's task died before reporting a result
    #[error("Refresh aborted")]
    Aborted,
    /// The call's deadline passed before the unit finished
    #[error("Refresh timed out")]
    TimedOut,
}

impl From<DatabaseError> for RefreshError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::SourceGone(id) => RefreshError::SourceNotFound(id),
            other => RefreshError::Persistence(other),
        }
    }
}

// Error maps are reported as `{ "<externalSourceID>": "<message>" }`
impl Serialize for RefreshError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// Request / Response Types
// ============================================================================

/// Result of a multi-source refresh.
#[derive(Debug, Default, Serialize)]
pub struct RefreshReport {
    /// Newly created content across all sources, newest first
    pub items: Vec<Content>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, RefreshError>,
}

/// Parameters for registering a new source.
#[derive(Debug, Clone)]
pub struct RegisterSource {
    pub url: String,
    /// Restrict adapter selection to this provider
    pub source_type: Option<SourceType>,
    pub lang: String,
    pub curated: bool,
}

// ============================================================================
// Refresher
// ============================================================================

pub struct Refresher {
    db: Database,
    providers: Arc<Providers>,
    orchestrator: Orchestrator,
    refresh_timeout: Duration,
    default_lang: String,
    feed_category: Option<String>,
}

impl Refresher {
    pub fn new(db: Database, providers: Providers, config: &Config) -> Self {
        let providers = Arc::new(providers);
        Self {
            orchestrator: Orchestrator::new(
                Arc::clone(&providers),
                db.clone(),
                config.refresh.workers(),
            ),
            db,
            providers,
            refresh_timeout: config.refresh.refresh_timeout(),
            default_lang: config.refresh.default_lang.clone(),
            feed_category: config.feedly.category_id.clone(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Refresh every live source of the given types.
    ///
    /// Fails only when the request itself is unusable or the source list
    /// cannot be read; per-source failures land in `RefreshReport::errors`.
    pub async fn refresh_by_types(&self, types: &[SourceType]) -> Result<RefreshReport, RefreshError> {
        if types.is_empty() {
            return Err(RefreshError::Validation("at least one source type is required".to_string()));
        }

        let sources = self.db.list_sources(types).await?;
        tracing::info!(
            types = ?types,
            sources = sources.len(),
            "Refreshing sources"
        );

        let outcome = self
            .orchestrator
            .refresh_sources(sources, false, self.refresh_timeout)
            .await;

        let mut items: Vec<Content> = outcome.contents.into_values().flatten().collect();
        items.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        Ok(RefreshReport {
            items,
            errors: outcome.errors,
        })
    }

    /// Refresh one source by internal ID, returning the rows created and,
    /// with `force`, the rows overwritten.
    pub async fn refresh_source(&self, id: i64, force: bool) -> Result<Vec<Content>, RefreshError> {
        let source = self
            .db
            .get_source(id)
            .await?
            .ok_or(RefreshError::SourceNotFound(id))?;

        let reconciled = tokio::time::timeout(
            self.refresh_timeout,
            orchestrator::run_unit(&self.providers, &self.db, &source, force),
        )
        .await
        .map_err(|_| RefreshError::TimedOut)??;

        let mut rows = reconciled.created;
        rows.extend(reconciled.updated);
        Ok(rows)
    }

    /// Mirror the configured Feedly collection into the source table.
    ///
    /// Only feeds without a live source are created, in the collection's
    /// order; existing sources are left as they are.
    pub async fn sync_feed(&self) -> Result<Vec<Source>, RefreshError> {
        let category_id = self
            .feed_category
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| RefreshError::Validation("no Feedly category configured".to_string()))?;
        let feedly = self
            .providers
            .feedly()
            .ok_or_else(|| RefreshError::Validation("Feedly adapter unavailable".to_string()))?;

        let feeds = tokio::time::timeout(self.refresh_timeout, feedly.fetch_collection(category_id))
            .await
            .map_err(|_| RefreshError::TimedOut)??;

        let candidates: Vec<NewSource> = feeds
            .into_iter()
            .map(|feed| {
                let title = strip_control_chars(feed.title.trim()).into_owned();
                let title = if title.is_empty() { feed.id.clone() } else { title };
                NewSource {
                    source_type: SourceType::Rss,
                    short_title: title.clone(),
                    title,
                    description: feed.description.clone().unwrap_or_default(),
                    icon_url: feed.icon_url.clone().unwrap_or_default(),
                    cover_url: feed.cover(),
                    website_url: feed.website.clone().unwrap_or_default(),
                    lang: feed
                        .language
                        .clone()
                        .filter(|l| !l.is_empty())
                        .unwrap_or_else(|| self.default_lang.clone()),
                    curated: true,
                    published_at: feed.updated_at(),
                    source_id: feed.id,
                }
            })
            .collect();

        let created = self.db.insert_missing_sources(&candidates).await?;
        tracing::info!(
            category_id,
            listed = candidates.len(),
            created = created.len(),
            "Feed sync finished"
        );
        Ok(created)
    }

    /// Register the source behind a free-form URL.
    pub async fn register_source(&self, request: RegisterSource) -> Result<Source, RefreshError> {
        let lang = request.lang.trim();
        if lang.is_empty() {
            return Err(RefreshError::Validation("language tag is required".to_string()));
        }
        let url = validate_source_url(&request.url)
            .map_err(|e| RefreshError::Validation(e.to_string()))?;

        let adapter: &Adapter = match request.source_type {
            Some(kind) => {
                let adapter = self.providers.for_type(kind);
                if !adapter.recognizes(&url) {
                    return Err(RefreshError::UnsupportedUrl(request.url));
                }
                adapter
            }
            None => self
                .providers
                .recognize(&url)
                .ok_or_else(|| RefreshError::UnsupportedUrl(request.url.clone()))?,
        };

        let external_id = match adapter.resolve_external_id(&url).await {
            Ok(id) => id,
            Err(ProviderError::NotFound(_)) => return Err(RefreshError::UnsupportedUrl(request.url)),
            Err(e) => return Err(e.into()),
        };

        if let Some(existing) = self.db.find_source_by_external_id(&external_id).await? {
            tracing::debug!(source_id = %external_id, id = existing.id, "Source already registered");
            return Err(RefreshError::DuplicateSource(external_id));
        }

        let metadata = match adapter.fetch_channel_metadata(&url, &external_id).await {
            Ok(metadata) => metadata,
            Err(ProviderError::NotFound(_)) => return Err(RefreshError::UnsupportedUrl(request.url)),
            Err(e) => return Err(e.into()),
        };

        let title = strip_control_chars(metadata.title.trim()).into_owned();
        let title = if title.is_empty() { external_id.clone() } else { title };
        let new_source = NewSource {
            source_type: adapter.source_type(),
            source_id: external_id.clone(),
            short_title: title.clone(),
            title,
            description: metadata.description,
            icon_url: metadata.icon_url,
            cover_url: metadata.cover_url,
            website_url: metadata.website_url,
            lang: lang.to_string(),
            curated: request.curated,
            published_at: metadata.published_at,
        };

        // A concurrent registration may have won between the check and here
        let source = self
            .db
            .create_source(&new_source)
            .await?
            .ok_or(RefreshError::DuplicateSource(external_id))?;

        tracing::info!(
            id = source.id,
            source_id = %source.source_id,
            source_type = %source.source_type,
            order = source.order,
            "Source registered"
        );
        Ok(source)
    }
}
