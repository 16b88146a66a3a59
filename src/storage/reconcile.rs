use std::collections::{HashMap, HashSet};

use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{
    CanonicalItem, Content, ContentRow, DatabaseError, Reconciled, Source, CONTENT_COLUMNS,
};

/// Content IDs per existence-check statement. Well above any fetch bound, so
/// one reconciliation normally issues a single lookup.
const LOOKUP_CHUNK: usize = 500;

/// Rows per multi-row INSERT.
const INSERT_CHUNK: usize = 50;

/// Mutable display fields of `row` differ from the freshly fetched `item`.
fn display_fields_changed(row: &ContentRow, item: &CanonicalItem) -> bool {
    row.title != item.title
        || row.raw_summary != item.raw_summary
        || row.summary != item.summary
        || row.thumbnail_url != item.thumbnail_url
        || row.content_url != item.content_url
        || row.raw_body != item.raw_body
        || row.body != item.body
        || row.author != item.author
}

impl Database {
    /// Dedup freshly fetched items against the store and persist the delta.
    ///
    /// One transaction covers the whole reconciliation:
    ///
    /// 1. stamp the source's `refreshed_at` (taking the write lock first)
    /// 2. look up every incoming content ID among live rows in one batch
    /// 3. insert unseen items with fresh UUIDs
    /// 4. with `force`, overwrite the display fields of already-stored items
    ///    owned by this source, keeping their ID and `created_at`
    ///
    /// Either all of it commits or none of it does. Dropping the future before
    /// completion rolls the transaction back.
    ///
    /// Duplicate content IDs inside `items` collapse to their first
    /// occurrence. `created` follows the provider's ordering.
    ///
    /// # Errors
    ///
    /// `DatabaseError::SourceGone` if the source was removed meanwhile.
    pub async fn reconcile(
        &self,
        source: &Source,
        items: &[CanonicalItem],
        force: bool,
    ) -> Result<Reconciled, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let touched = sqlx::query(
            "UPDATE sources SET refreshed_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(source.id)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        if touched.rows_affected() == 0 {
            return Err(DatabaseError::SourceGone(source.id));
        }

        let mut seen = HashSet::new();
        let unique: Vec<&CanonicalItem> = items
            .iter()
            .filter(|item| !item.content_id.is_empty())
            .filter(|item| seen.insert(item.content_id.as_str()))
            .collect();
        if unique.len() < items.len() {
            tracing::debug!(
                source_id = %source.source_id,
                dropped = items.len() - unique.len(),
                "Dropped duplicate or empty content IDs from fetch"
            );
        }

        // Explicit existence check: one IN (...) lookup per chunk
        let mut existing: HashMap<String, ContentRow> = HashMap::with_capacity(unique.len());
        for chunk in unique.chunks(LOOKUP_CHUNK) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
                "SELECT {CONTENT_COLUMNS} FROM contents WHERE deleted_at IS NULL AND content_id IN ("
            ));
            let mut separated = builder.separated(", ");
            for item in chunk {
                separated.push_bind(item.content_id.as_str());
            }
            separated.push_unseparated(")");

            let rows: Vec<ContentRow> = builder
                .build_query_as()
                .fetch_all(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            existing.extend(rows.into_iter().map(|row| (row.content_id.clone(), row)));
        }

        let (known, fresh): (Vec<&CanonicalItem>, Vec<&CanonicalItem>) = unique
            .iter()
            .copied()
            .partition(|item| existing.contains_key(&item.content_id));

        // Insert unseen items
        let mut inserted: HashMap<String, ContentRow> = HashMap::with_capacity(fresh.len());
        for chunk in fresh.chunks(INSERT_CHUNK) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT INTO contents (id, source_id, content_id, source_type, published_at, title, \
                 content_url, thumbnail_url, raw_summary, summary, raw_body, body, author, \
                 created_at, updated_at) ",
            );
            builder.push_values(chunk, |mut b, item| {
                b.push_bind(uuid::Uuid::new_v4().to_string())
                    .push_bind(source.id)
                    .push_bind(&item.content_id)
                    .push_bind(source.source_type)
                    .push_bind(item.published_at.timestamp())
                    .push_bind(&item.title)
                    .push_bind(&item.content_url)
                    .push_bind(&item.thumbnail_url)
                    .push_bind(&item.raw_summary)
                    .push_bind(&item.summary)
                    .push_bind(&item.raw_body)
                    .push_bind(&item.body)
                    .push_bind(&item.author)
                    .push_bind(now)
                    .push_bind(now);
            });
            builder.push(format!(" ON CONFLICT DO NOTHING RETURNING {CONTENT_COLUMNS}"));

            let rows: Vec<ContentRow> = builder
                .build_query_as()
                .fetch_all(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
            inserted.extend(rows.into_iter().map(|row| (row.content_id.clone(), row)));
        }

        // RETURNING order is unspecified; report creations in fetch order
        let created: Vec<Content> = fresh
            .iter()
            .filter_map(|item| inserted.remove(&item.content_id))
            .map(ContentRow::into_content)
            .collect();

        let mut updated = Vec::new();
        if force {
            for item in known {
                let Some(row) = existing.get(&item.content_id) else {
                    continue;
                };
                if row.source_id != source.id {
                    tracing::debug!(
                        content_id = %item.content_id,
                        owner = row.source_id,
                        "Content owned by another source, not overwriting"
                    );
                    continue;
                }
                if !display_fields_changed(row, item) {
                    continue;
                }

                let row: ContentRow = sqlx::query_as(&format!(
                    r#"
                    UPDATE contents SET
                        title = ?, raw_summary = ?, summary = ?, thumbnail_url = ?,
                        content_url = ?, raw_body = ?, body = ?, author = ?, updated_at = ?
                    WHERE id = ?
                    RETURNING {CONTENT_COLUMNS}
                    "#
                ))
                .bind(&item.title)
                .bind(&item.raw_summary)
                .bind(&item.summary)
                .bind(&item.thumbnail_url)
                .bind(&item.content_url)
                .bind(&item.raw_body)
                .bind(&item.body)
                .bind(&item.author)
                .bind(now)
                .bind(&row.id)
                .fetch_one(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;
                updated.push(row.into_content());
            }
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        tracing::debug!(
            source_id = %source.source_id,
            fetched = items.len(),
            existing = existing.len(),
            created = created.len(),
            updated = updated.len(),
            "Reconciled"
        );
        Ok(Reconciled { created, updated })
    }
}
