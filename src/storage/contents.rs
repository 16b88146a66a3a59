use sqlx::{QueryBuilder, Sqlite};

use super::schema::Database;
use super::types::{Content, ContentRow, DatabaseError, SourceType, CONTENT_COLUMNS};

impl Database {
    /// Rows per page in [`Database::list_contents`]
    pub const CONTENT_PAGE_SIZE: i64 = 50;

    /// List live content, newest first, one page at a time.
    ///
    /// `page` is 1-based; values below 1 are treated as 1. An empty `types`
    /// slice means every provider type.
    pub async fn list_contents(
        &self,
        types: &[SourceType],
        page: i64,
    ) -> Result<Vec<Content>, DatabaseError> {
        let offset = (page.max(1) - 1) * Self::CONTENT_PAGE_SIZE;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE deleted_at IS NULL"
        ));
        if !types.is_empty() {
            builder.push(" AND source_type IN (");
            let mut separated = builder.separated(", ");
            for kind in types {
                separated.push_bind(*kind);
            }
            separated.push_unseparated(")");
        }
        builder.push(" ORDER BY published_at DESC, created_at DESC LIMIT ");
        builder.push_bind(Self::CONTENT_PAGE_SIZE);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        let rows: Vec<ContentRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(rows.into_iter().map(ContentRow::into_content).collect())
    }

    /// All live content of one source, newest first
    pub async fn contents_for_source(&self, source_id: i64) -> Result<Vec<Content>, DatabaseError> {
        let sql = format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE source_id = ? AND deleted_at IS NULL \
             ORDER BY published_at DESC"
        );
        let rows: Vec<ContentRow> = sqlx::query_as(&sql)
            .bind(source_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(rows.into_iter().map(ContentRow::into_content).collect())
    }

    /// Number of live rows carrying `content_id`. Never exceeds one.
    pub async fn count_live_content(&self, content_id: &str) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM contents WHERE content_id = ? AND deleted_at IS NULL",
        )
        .bind(content_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use crate::storage::{CanonicalItem, Database, NewSource, Source, SourceType};

    async fn source(db: &Database, kind: SourceType, source_id: &str) -> Source {
        db.create_source(&NewSource {
            source_type: kind,
            source_id: source_id.to_string(),
            title: source_id.to_string(),
            short_title: source_id.to_string(),
            description: String::new(),
            icon_url: String::new(),
            cover_url: String::new(),
            website_url: String::new(),
            lang: "en".to_string(),
            curated: false,
            published_at: None,
        })
        .await
        .unwrap()
        .unwrap()
    }

    fn items(prefix: &str, count: i64) -> Vec<CanonicalItem> {
        (0..count)
            .map(|i| CanonicalItem {
                content_id: format!("{}-{}", prefix, i),
                title: format!("{} #{}", prefix, i),
                raw_summary: String::new(),
                summary: String::new(),
                published_at: DateTime::<Utc>::from_timestamp(1_700_000_000 + i, 0).unwrap(),
                thumbnail_url: String::new(),
                content_url: format!("https://example.com/{}/{}", prefix, i),
                raw_body: None,
                body: None,
                author: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_list_contents_pages_newest_first() {
        let db = Database::open(":memory:").await.unwrap();
        let s = source(&db, SourceType::Vimeo, "vimeo-user").await;
        db.reconcile(&s, &items("v", 60), false).await.unwrap();

        let first = db.list_contents(&[], 1).await.unwrap();
        let second = db.list_contents(&[], 2).await.unwrap();
        assert_eq!(first.len(), 50);
        assert_eq!(second.len(), 10);
        assert_eq!(first[0].content_id, "v-59");
        assert_eq!(second[9].content_id, "v-0");
        assert_eq!(db.list_contents(&[], 0).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_list_contents_filters_by_type() {
        let db = Database::open(":memory:").await.unwrap();
        let video = source(&db, SourceType::Youtube, "chA").await;
        let feed = source(&db, SourceType::Rss, "feed/https://blog.example.com/rss").await;
        db.reconcile(&video, &items("yt", 2), false).await.unwrap();
        db.reconcile(&feed, &items("rss", 3), false).await.unwrap();

        let articles = db.list_contents(&[SourceType::Rss], 1).await.unwrap();
        assert_eq!(articles.len(), 3);
        assert!(articles.iter().all(|c| c.source_type == SourceType::Rss));
        assert_eq!(db.contents_for_source(video.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_removed_source_content_hidden() {
        let db = Database::open(":memory:").await.unwrap();
        let s = source(&db, SourceType::Youtube, "chA").await;
        db.reconcile(&s, &items("yt", 2), false).await.unwrap();
        db.delete_source(s.id).await.unwrap();

        assert!(db.list_contents(&[], 1).await.unwrap().is_empty());
        assert_eq!(db.count_live_content("yt-0").await.unwrap(), 0);
    }
}
