use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use super::schema::Database;
use super::types::{DatabaseError, NewSource, Source, SourceRow, SourceType, SOURCE_COLUMNS};

/// Inserts `source` unless a live source already owns its external ID.
///
/// The ordering index is computed inside the statement as the current
/// maximum plus one, so back-to-back calls within one transaction yield a
/// contiguous block. Returns `None` when the external ID is taken.
async fn insert_source_if_absent(
    conn: &mut SqliteConnection,
    source: &NewSource,
    now: i64,
) -> Result<Option<Source>, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO sources (
            source_type, source_id, sort_order, title, short_title, description,
            icon_url, cover_url, website_url, lang, curated, published_at,
            created_at, updated_at
        )
        SELECT ?, ?, (SELECT COALESCE(MAX(sort_order), 0) + 1 FROM sources),
               ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
        WHERE NOT EXISTS (
            SELECT 1 FROM sources WHERE source_id = ? AND deleted_at IS NULL
        )
        RETURNING {SOURCE_COLUMNS}
        "#
    );

    let row: Option<SourceRow> = sqlx::query_as(&sql)
        .bind(source.source_type)
        .bind(&source.source_id)
        .bind(&source.title)
        .bind(&source.short_title)
        .bind(&source.description)
        .bind(&source.icon_url)
        .bind(&source.cover_url)
        .bind(&source.website_url)
        .bind(&source.lang)
        .bind(source.curated)
        .bind(source.published_at.map(|t| t.timestamp()))
        .bind(now)
        .bind(now)
        .bind(&source.source_id)
        .fetch_optional(&mut *conn)
        .await?;

    Ok(row.map(SourceRow::into_source))
}

impl Database {
    // ========================================================================
    // Source Queries
    // ========================================================================

    /// Next ordering index: current maximum over every row ever created, plus one.
    ///
    /// Soft-deleted rows still count, so order values are never reused.
    #[cfg(test)]
    pub(crate) async fn next_order(&self) -> Result<i64, DatabaseError> {
        let (next,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(sort_order), 0) + 1 FROM sources")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(next)
    }

    /// Get a live source by internal ID
    pub async fn get_source(&self, id: i64) -> Result<Option<Source>, DatabaseError> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ? AND deleted_at IS NULL");
        let row: Option<SourceRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(row.map(SourceRow::into_source))
    }

    /// Get the live source registered under a provider-assigned ID
    pub async fn find_source_by_external_id(
        &self,
        source_id: &str,
    ) -> Result<Option<Source>, DatabaseError> {
        let sql = format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE source_id = ? AND deleted_at IS NULL"
        );
        let row: Option<SourceRow> = sqlx::query_as(&sql)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(row.map(SourceRow::into_source))
    }

    /// List live sources in display order.
    ///
    /// An empty `types` slice means every provider type.
    pub async fn list_sources(&self, types: &[SourceType]) -> Result<Vec<Source>, DatabaseError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE deleted_at IS NULL"
        ));
        if !types.is_empty() {
            builder.push(" AND source_type IN (");
            let mut separated = builder.separated(", ");
            for kind in types {
                separated.push_bind(*kind);
            }
            separated.push_unseparated(")");
        }
        builder.push(" ORDER BY sort_order ASC, id ASC");

        let rows: Vec<SourceRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(rows.into_iter().map(SourceRow::into_source).collect())
    }

    // ========================================================================
    // Source Creation
    // ========================================================================

    /// Create one source with the next ordering index.
    ///
    /// Returns `None` if a live source already uses the same external ID.
    pub async fn create_source(&self, source: &NewSource) -> Result<Option<Source>, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let created = insert_source_if_absent(&mut *tx, source, now)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        match &created {
            Some(s) => tracing::info!(
                id = s.id,
                source_id = %s.source_id,
                source_type = %s.source_type,
                order = s.order,
                "Source created"
            ),
            None => tracing::debug!(source_id = %source.source_id, "Source already registered"),
        }
        Ok(created)
    }

    /// Insert every listed source whose external ID is not yet registered.
    ///
    /// Runs in one transaction. Existing sources are never touched, even if
    /// the listing carries different metadata for them. New sources receive
    /// a contiguous block of ordering indices continuing from the current
    /// maximum, in the order they appear in `sources`.
    pub async fn insert_missing_sources(
        &self,
        sources: &[NewSource],
    ) -> Result<Vec<Source>, DatabaseError> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let mut created = Vec::new();

        for source in sources {
            let inserted = insert_source_if_absent(&mut *tx, source, now)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            match inserted {
                Some(s) => created.push(s),
                None => {
                    tracing::debug!(source_id = %source.source_id, "Skipping source already present")
                }
            }
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(created)
    }

    // ========================================================================
    // Source Removal
    // ========================================================================

    /// Soft-delete a source together with all of its live content.
    ///
    /// Returns `false` if no live source has that ID.
    pub async fn delete_source(&self, id: i64) -> Result<bool, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let result = sqlx::query(
            "UPDATE sources SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let contents = sqlx::query(
            "UPDATE contents SET deleted_at = ?, updated_at = ? WHERE source_id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        tracing::info!(id, contents = contents.rows_affected(), "Source removed");
        Ok(true)
    }
}
