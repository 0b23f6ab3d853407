//! libSQL content store for raw fetched pages (offline mode).
//!
//! The [`ContentStore`] keeps one row per `(domain, page_id)` in
//! `<raw_dir>/content.db`. Presence of a row is the authoritative record that a
//! URL has been fetched, which is what makes fetch and convert phases
//! independently resumable.
//!
//! **Access rules:**
//! - fetch phase: read-write (sole writer) via [`ContentStore::open`]
//! - convert-only runs: read-only via [`ContentStore::open_readonly`]

mod migrations;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use sitescribe_shared::{ContentRecord, Result, SiteScribeError, UrlKey};

/// File name of the database inside the raw content directory.
pub const DB_FILE_NAME: &str = "content.db";

/// Database path for a raw content directory.
pub fn db_path(raw_dir: &Path) -> PathBuf {
    raw_dir.join(DB_FILE_NAME)
}

fn persistence(e: impl std::fmt::Display) -> SiteScribeError {
    SiteScribeError::Persistence(e.to_string())
}

/// Durable raw content store wrapping a libSQL database.
pub struct ContentStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl ContentStore {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SiteScribeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(persistence)?;
        let conn = db.connect().map_err(persistence)?;

        let store = Self {
            db,
            conn,
            readonly: false,
        };
        store.run_migrations().await?;
        tracing::debug!(path = %path.display(), "content store opened");
        Ok(store)
    }

    /// Open an existing database read-only. Fails if it does not exist.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SiteScribeError::validation(format!(
                "no content store at {} (run a fetch first or pass --input-dir)",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(persistence)?;
        let conn = db.connect().map_err(persistence)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    SiteScribeError::Persistence(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(SiteScribeError::Persistence(
                "content store is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Record operations
    // -----------------------------------------------------------------------

    /// Insert or overwrite the record for `record.key`. A single statement, so
    /// a record is either fully written or not at all.
    pub async fn put(&self, record: &ContentRecord) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO raw_pages (domain, page_id, url, raw_content, fetched_at, status_code, content_hash, content_len)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(domain, page_id) DO UPDATE SET
                   url = excluded.url,
                   raw_content = excluded.raw_content,
                   fetched_at = excluded.fetched_at,
                   status_code = excluded.status_code,
                   content_hash = excluded.content_hash,
                   content_len = excluded.content_len",
                params![
                    record.key.domain.as_str(),
                    record.key.page_id.as_str(),
                    record.url.as_str(),
                    record.raw_content.as_str(),
                    record.fetched_at.to_rfc3339(),
                    record.status_code.map(i64::from),
                    record.content_hash.as_str(),
                    record.content_len as i64,
                ],
            )
            .await
            .map_err(persistence)?;
        tracing::trace!(key = %record.key, bytes = record.content_len, "stored raw content");
        Ok(())
    }

    /// Whether a record exists for `key`.
    pub async fn exists(&self, key: &UrlKey) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM raw_pages WHERE domain = ?1 AND page_id = ?2",
                params![key.domain.as_str(), key.page_id.as_str()],
            )
            .await
            .map_err(persistence)?;

        match rows.next().await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(persistence(e)),
        }
    }

    /// Get the record for `key`.
    pub async fn get(&self, key: &UrlKey) -> Result<Option<ContentRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT domain, page_id, url, raw_content, fetched_at, status_code, content_hash, content_len
                 FROM raw_pages WHERE domain = ?1 AND page_id = ?2",
                params![key.domain.as_str(), key.page_id.as_str()],
            )
            .await
            .map_err(persistence)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(persistence(e)),
        }
    }

    /// All records of one domain, ordered by URL.
    pub async fn list(&self, domain: &str) -> Result<Vec<ContentRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT domain, page_id, url, raw_content, fetched_at, status_code, content_hash, content_len
                 FROM raw_pages WHERE domain = ?1 ORDER BY url",
                params![domain],
            )
            .await
            .map_err(persistence)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(persistence)? {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }

    /// Distinct domains with at least one stored record.
    pub async fn list_domains(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT domain FROM raw_pages ORDER BY domain",
                params![],
            )
            .await
            .map_err(persistence)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(persistence)? {
            results.push(row.get::<String>(0).map_err(persistence)?);
        }
        Ok(results)
    }

    /// Number of records stored for `domain`.
    pub async fn count(&self, domain: &str) -> Result<usize> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM raw_pages WHERE domain = ?1",
                params![domain],
            )
            .await
            .map_err(persistence)?;

        match rows.next().await.map_err(persistence)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(persistence)? as usize),
            None => Ok(0),
        }
    }
}

/// Convert a database row to a [`ContentRecord`].
fn row_to_record(row: &libsql::Row) -> Result<ContentRecord> {
    let fetched_at: String = row.get(4).map_err(persistence)?;
    Ok(ContentRecord {
        key: UrlKey {
            domain: row.get::<String>(0).map_err(persistence)?,
            page_id: row.get::<String>(1).map_err(persistence)?,
        },
        url: row.get::<String>(2).map_err(persistence)?,
        raw_content: row.get::<String>(3).map_err(persistence)?,
        fetched_at: DateTime::parse_from_rfc3339(&fetched_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SiteScribeError::Persistence(format!("invalid date: {e}")))?,
        status_code: row.get::<i64>(5).ok().map(|v| v as u16),
        content_hash: row.get::<String>(6).map_err(persistence)?,
        content_len: row.get::<i64>(7).map_err(persistence)? as usize,
    })
}
