use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_error, DatabaseError};

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database. It is served by a
    /// single pooled connection that is never recycled, so every caller sees
    /// the same data for the lifetime of the handle.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process holds the
    /// database lock (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);
        let in_memory = path == ":memory:";

        // Restrict the file to the owner before SQLite creates it
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::PermissionsExt;
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if let Some(parent) = db_path.parent() {
                if parent.exists() {
                    use std::os::unix::fs::OpenOptionsExt;
                    // If creation fails, SQLite reports the error at connect_with.
                    let _file = std::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .mode(0o600)
                        .open(db_path)
                        .ok();
                }
            }
        }

        // busy_timeout=5000: concurrent refresh units wait up to 5 seconds for the
        // write lock instead of failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_open)?
            .pragma("busy_timeout", "5000");

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_open)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            if is_lock_error(&e.to_string()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        tracing::debug!(path = %path, "Database opened");
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// Every statement uses `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    ///
    /// Uniqueness of `sources.source_id` and `contents.content_id` is enforced
    /// by partial indexes over live rows only. A soft-deleted source or item
    /// therefore never blocks re-registering or re-ingesting the same
    /// external identifier.
    async fn migrate(&self) -> Result<()> {
        // Per-connection setting, must run outside the transaction
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY,
                source_type TEXT NOT NULL,
                source_id TEXT NOT NULL,
                sort_order INTEGER NOT NULL,
                title TEXT NOT NULL,
                short_title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                icon_url TEXT NOT NULL DEFAULT '',
                cover_url TEXT NOT NULL DEFAULT '',
                website_url TEXT NOT NULL DEFAULT '',
                lang TEXT NOT NULL DEFAULT 'en',
                curated INTEGER NOT NULL DEFAULT 1,
                published_at INTEGER,
                refreshed_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contents (
                id TEXT PRIMARY KEY,
                source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
                content_id TEXT NOT NULL,
                source_type TEXT NOT NULL,
                published_at INTEGER NOT NULL,
                title TEXT NOT NULL,
                content_url TEXT NOT NULL,
                thumbnail_url TEXT NOT NULL DEFAULT '',
                raw_summary TEXT NOT NULL DEFAULT '',
                summary TEXT NOT NULL DEFAULT '',
                raw_body TEXT,
                body TEXT,
                author TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                deleted_at INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_sources_source_id_live ON sources(source_id) WHERE deleted_at IS NULL",
        )
        .execute(&mut *tx)
        .await?;

        // Listing order and the "next order" lookup
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_sort_order ON sources(sort_order)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sources_type_live ON sources(source_type) WHERE deleted_at IS NULL",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_contents_content_id_live ON contents(content_id) WHERE deleted_at IS NULL",
        )
        .execute(&mut *tx)
        .await?;

        // Per-source listing sorted by publish time
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_contents_source_published ON contents(source_id, published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_contents_published ON contents(published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}
