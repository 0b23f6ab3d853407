//! SQL migration definitions for the raw content database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: raw_pages keyed by (domain, page_id)",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS raw_pages (
    domain       TEXT NOT NULL,
    page_id      TEXT NOT NULL,
    url          TEXT NOT NULL,
    raw_content  TEXT NOT NULL,
    fetched_at   TEXT NOT NULL,
    status_code  INTEGER,
    content_hash TEXT NOT NULL,
    content_len  INTEGER NOT NULL,
    PRIMARY KEY (domain, page_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Index raw_pages by url for lookups from sitemap entries",
            sql: r#"
CREATE INDEX IF NOT EXISTS idx_raw_pages_url ON raw_pages(url);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
