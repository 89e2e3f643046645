//! SQL migration definitions for the Leadflow database.
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
            description: "Initial schema: runs, search_results, pages, leads, emails",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One pipeline run per calendar date
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    run_date    TEXT NOT NULL UNIQUE,
    config_json TEXT NOT NULL,
    status      TEXT NOT NULL,
    stats_json  TEXT NOT NULL,
    error       TEXT,
    started_at  TEXT NOT NULL,
    finished_at TEXT
);

-- Raw search hits
CREATE TABLE IF NOT EXISTS search_results (
    id           TEXT PRIMARY KEY,
    run_id       TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    query        TEXT NOT NULL,
    url          TEXT NOT NULL,
    title        TEXT NOT NULL,
    snippet      TEXT NOT NULL,
    published_at TEXT,
    UNIQUE(run_id, url)
);

-- Fetched pages
CREATE TABLE IF NOT EXISTS pages (
    id           TEXT PRIMARY KEY,
    run_id       TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    url          TEXT NOT NULL,
    final_url    TEXT NOT NULL,
    domain       TEXT NOT NULL,
    status_code  INTEGER,
    title        TEXT,
    published_at TEXT,
    text         TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    fetched_at   TEXT NOT NULL,
    error        TEXT,
    UNIQUE(run_id, url)
);

CREATE INDEX IF NOT EXISTS idx_pages_content_hash ON pages(content_hash);

-- Selected leads
CREATE TABLE IF NOT EXISTS leads (
    id          TEXT PRIMARY KEY,
    run_id      TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    person_key  TEXT NOT NULL,
    full_name   TEXT NOT NULL,
    company     TEXT,
    tier        TEXT NOT NULL,
    score       REAL NOT NULL,
    lead_json   TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'new',
    created_at  TEXT NOT NULL,
    UNIQUE(run_id, person_key)
);

CREATE INDEX IF NOT EXISTS idx_leads_person_key ON leads(person_key);

-- Drafted outreach, versioned per lead
CREATE TABLE IF NOT EXISTS emails (
    id         TEXT PRIMARY KEY,
    lead_id    TEXT NOT NULL REFERENCES leads(id) ON DELETE CASCADE,
    version    INTEGER NOT NULL,
    subject    TEXT NOT NULL,
    body_html  TEXT NOT NULL,
    body_text  TEXT NOT NULL,
    tone       TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(lead_id, version)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
    ]
}
