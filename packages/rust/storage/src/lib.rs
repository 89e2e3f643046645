//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding pipeline runs,
//! search results, fetched pages, selected leads, and drafted emails.
//! Every write is an upsert on the row's natural key, so re-executing a
//! failed run converges to the same state.
//!
//! **Access rules:**
//! - Pipeline: read-write via [`Storage::open`]
//! - Reporting (`leadflow runs`, `leadflow leads`): read-only via [`Storage::open_readonly`]

mod migrations;
mod recorder;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use leadflow_shared::{
    FetchedPage, GeneratedEmail, LeadflowError, Result, Run, RunConfig, RunId, RunStats,
    RunStatus, ScoredLead, SearchResult, Tone,
};
use libsql::{Connection, Database, params};
use uuid::Uuid;

pub use recorder::{LeadHistory, RunRecorder};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LeadflowError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (for reporting commands).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

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
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        LeadflowError::Storage(format!(
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
            return Err(LeadflowError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Run operations
    // -----------------------------------------------------------------------

    /// Create the run for `run_date`, or return the existing one.
    ///
    /// The boolean is `true` when a new row was inserted. A second call for
    /// the same date returns the same run id and inserts nothing.
    pub async fn create_run(&self, run_date: NaiveDate, config: &RunConfig) -> Result<(Run, bool)> {
        self.check_writable()?;
        let id = RunId::new().to_string();
        let config_json = to_json(config)?;
        let stats_json = to_json(&RunStats::default())?;

        let inserted = self
            .conn
            .execute(
                "INSERT INTO runs (id, run_date, config_json, status, stats_json, started_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(run_date) DO NOTHING",
                params![
                    id.as_str(),
                    run_date.to_string(),
                    config_json,
                    RunStatus::Running.as_str(),
                    stats_json,
                    timestamp(Utc::now()),
                ],
            )
            .await
            .map_err(storage_err)?;

        let run = self.get_run_by_date(run_date).await?.ok_or_else(|| {
            LeadflowError::Storage(format!("run for {run_date} vanished after insert"))
        })?;

        Ok((run, inserted > 0))
    }

    /// Get a run by ID.
    pub async fn get_run(&self, id: &RunId) -> Result<Option<Run>> {
        self.query_run(
            "SELECT id, run_date, config_json, status, stats_json, error, started_at, finished_at
             FROM runs WHERE id = ?1",
            id.to_string(),
        )
        .await
    }

    /// Get the run for a calendar date.
    pub async fn get_run_by_date(&self, run_date: NaiveDate) -> Result<Option<Run>> {
        self.query_run(
            "SELECT id, run_date, config_json, status, stats_json, error, started_at, finished_at
             FROM runs WHERE run_date = ?1",
            run_date.to_string(),
        )
        .await
    }

    async fn query_run(&self, sql: &str, key: String) -> Result<Option<Run>> {
        let mut rows = self.conn.query(sql, params![key]).await.map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List the most recent runs, newest date first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<Run>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, run_date, config_json, status, stats_json, error, started_at, finished_at
                 FROM runs ORDER BY run_date DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }

    /// Put a finished run back into `running` so it can be re-executed in place.
    ///
    /// The run's leads and their drafts are cleared in the same transaction,
    /// so the re-execution's selection replaces the earlier one.
    pub async fn restart_run(&self, id: &RunId, config: &RunConfig) -> Result<()> {
        self.check_writable()?;
        let id = id.to_string();
        let tx = self.conn.transaction().await.map_err(storage_err)?;

        tx.execute(
            "DELETE FROM emails WHERE lead_id IN (SELECT id FROM leads WHERE run_id = ?1)",
            params![id.as_str()],
        )
        .await
        .map_err(storage_err)?;
        let cleared = tx
            .execute("DELETE FROM leads WHERE run_id = ?1", params![id.as_str()])
            .await
            .map_err(storage_err)?;
        tx.execute(
            "UPDATE runs SET status = ?1, config_json = ?2, stats_json = ?3, error = NULL,
               started_at = ?4, finished_at = NULL
             WHERE id = ?5",
            params![
                RunStatus::Running.as_str(),
                to_json(config)?,
                to_json(&RunStats::default())?,
                timestamp(Utc::now()),
                id.as_str(),
            ],
        )
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        tracing::debug!(run_id = %id, cleared, "run restarted");
        Ok(())
    }

    /// Persist in-progress stats.
    pub async fn update_run_stats(&self, id: &RunId, stats: &RunStats) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "UPDATE runs SET stats_json = ?1 WHERE id = ?2",
                params![to_json(stats)?, id.to_string()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Mark a running run as finished. Fails if the run is not `running`.
    pub async fn finalize_run(
        &self,
        id: &RunId,
        status: RunStatus,
        stats: &RunStats,
        error: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        if status == RunStatus::Running {
            return Err(LeadflowError::validation(
                "a run can only be finalized as success or failed",
            ));
        }

        let updated = self
            .conn
            .execute(
                "UPDATE runs SET status = ?1, stats_json = ?2, error = ?3, finished_at = ?4
                 WHERE id = ?5 AND status = ?6",
                params![
                    status.as_str(),
                    to_json(stats)?,
                    error,
                    timestamp(Utc::now()),
                    id.to_string(),
                    RunStatus::Running.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        if updated == 0 {
            return Err(LeadflowError::validation(format!(
                "run {id} is not running and cannot be finalized"
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Search result and page operations
    // -----------------------------------------------------------------------

    /// Upsert search hits for a run, keyed by `(run_id, url)`.
    pub async fn upsert_search_results(
        &self,
        run_id: &RunId,
        results: &[SearchResult],
    ) -> Result<usize> {
        self.check_writable()?;
        let run_id = run_id.to_string();
        for result in results {
            self.conn
                .execute(
                    "INSERT INTO search_results (id, run_id, query, url, title, snippet, published_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(run_id, url) DO UPDATE SET
                       query = excluded.query,
                       title = excluded.title,
                       snippet = excluded.snippet,
                       published_at = excluded.published_at",
                    params![
                        Uuid::now_v7().to_string(),
                        run_id.as_str(),
                        result.query.as_str(),
                        result.url.as_str(),
                        result.title.as_str(),
                        result.snippet.as_str(),
                        result.published_at.map(timestamp),
                    ],
                )
                .await
                .map_err(storage_err)?;
        }
        Ok(results.len())
    }

    /// Count stored search hits for a run.
    pub async fn count_search_results(&self, run_id: &RunId) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM search_results WHERE run_id = ?1", run_id)
            .await
    }

    /// Upsert a fetched page, keyed by `(run_id, url)`.
    pub async fn upsert_page(&self, run_id: &RunId, page: &FetchedPage) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO pages (id, run_id, url, final_url, domain, status_code, title,
                   published_at, text, content_hash, fetched_at, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                 ON CONFLICT(run_id, url) DO UPDATE SET
                   final_url = excluded.final_url,
                   domain = excluded.domain,
                   status_code = excluded.status_code,
                   title = excluded.title,
                   published_at = excluded.published_at,
                   text = excluded.text,
                   content_hash = excluded.content_hash,
                   fetched_at = excluded.fetched_at,
                   error = excluded.error",
                params![
                    Uuid::now_v7().to_string(),
                    run_id.to_string(),
                    page.url.as_str(),
                    page.final_url.as_str(),
                    page.domain.as_str(),
                    page.status_code.map(i64::from),
                    page.title.as_deref(),
                    page.published_at.map(timestamp),
                    page.text.as_str(),
                    page.content_hash.as_str(),
                    timestamp(page.fetched_at),
                    page.error.as_deref(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Count stored pages for a run.
    pub async fn count_pages(&self, run_id: &RunId) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM pages WHERE run_id = ?1", run_id)
            .await
    }

    /// Whether any run already stored a page with this content hash.
    pub async fn content_hash_seen(&self, content_hash: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM pages WHERE content_hash = ?1 LIMIT 1",
                params![content_hash],
            )
            .await
            .map_err(storage_err)?;
        Ok(matches!(rows.next().await, Ok(Some(_))))
    }

    async fn count(&self, sql: &str, run_id: &RunId) -> Result<usize> {
        let mut rows = self
            .conn
            .query(sql, params![run_id.to_string()])
            .await
            .map_err(storage_err)?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(storage_err)? as usize),
            Ok(None) => Ok(0),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Lead and email operations
    // -----------------------------------------------------------------------

    /// Upsert a selected lead, keyed by `(run_id, person_key)`. Returns the lead row id.
    pub async fn upsert_lead(&self, run_id: &RunId, lead: &ScoredLead) -> Result<String> {
        self.check_writable()?;
        let run_id = run_id.to_string();
        self.conn
            .execute(
                "INSERT INTO leads (id, run_id, person_key, full_name, company, tier, score,
                   lead_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(run_id, person_key) DO UPDATE SET
                   full_name = excluded.full_name,
                   company = excluded.company,
                   tier = excluded.tier,
                   score = excluded.score,
                   lead_json = excluded.lead_json",
                params![
                    Uuid::now_v7().to_string(),
                    run_id.as_str(),
                    lead.person_key.as_str(),
                    lead.candidate.full_name.as_str(),
                    lead.candidate.company.as_deref(),
                    lead.tier.as_str(),
                    f64::from(lead.score),
                    to_json(lead)?,
                    timestamp(Utc::now()),
                ],
            )
            .await
            .map_err(storage_err)?;

        self.lead_id(&run_id, &lead.person_key)
            .await?
            .ok_or_else(|| {
                LeadflowError::Storage(format!("lead {} vanished after upsert", lead.person_key))
            })
    }

    async fn lead_id(&self, run_id: &str, person_key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM leads WHERE run_id = ?1 AND person_key = ?2",
                params![run_id, person_key],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List the leads persisted for a run, best score first.
    pub async fn list_leads(&self, run_id: &RunId) -> Result<Vec<ScoredLead>> {
        let mut rows = self
            .conn
            .query(
                "SELECT lead_json FROM leads WHERE run_id = ?1 ORDER BY score DESC",
                params![run_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let json: String = row.get(0).map_err(storage_err)?;
            results.push(from_json(&json)?);
        }
        Ok(results)
    }

    /// Store a new email version for a lead. Returns the version number.
    pub async fn insert_email(
        &self,
        run_id: &RunId,
        person_key: &str,
        email: &GeneratedEmail,
    ) -> Result<i64> {
        self.check_writable()?;
        let lead_id = self
            .lead_id(&run_id.to_string(), person_key)
            .await?
            .ok_or_else(|| {
                LeadflowError::Storage(format!("no lead {person_key} in run {run_id}"))
            })?;

        let version = {
            let mut rows = self
                .conn
                .query(
                    "SELECT COALESCE(MAX(version), 0) FROM emails WHERE lead_id = ?1",
                    params![lead_id.as_str()],
                )
                .await
                .map_err(storage_err)?;
            match rows.next().await {
                Ok(Some(row)) => row.get::<i64>(0).map_err(storage_err)? + 1,
                Ok(None) => 1,
                Err(e) => return Err(storage_err(e)),
            }
        };

        self.conn
            .execute(
                "INSERT INTO emails (id, lead_id, version, subject, body_html, body_text, tone, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    Uuid::now_v7().to_string(),
                    lead_id.as_str(),
                    version,
                    email.subject.as_str(),
                    email.body_html.as_str(),
                    email.body_text.as_str(),
                    email.tone.as_str(),
                    timestamp(Utc::now()),
                ],
            )
            .await
            .map_err(storage_err)?;

        Ok(version)
    }

    /// Latest email version for a lead. Returns `(version, email)`.
    pub async fn latest_email(
        &self,
        run_id: &RunId,
        person_key: &str,
    ) -> Result<Option<(i64, GeneratedEmail)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT e.version, e.subject, e.body_html, e.body_text, e.tone
                 FROM emails e JOIN leads l ON l.id = e.lead_id
                 WHERE l.run_id = ?1 AND l.person_key = ?2
                 ORDER BY e.version DESC LIMIT 1",
                params![run_id.to_string(), person_key],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => {
                let version: i64 = row.get(0).map_err(storage_err)?;
                let email = GeneratedEmail {
                    subject: row.get(1).map_err(storage_err)?,
                    body_html: row.get(2).map_err(storage_err)?,
                    body_text: row.get(3).map_err(storage_err)?,
                    tone: Tone(row.get(4).map_err(storage_err)?),
                };
                Ok(Some((version, email)))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Person keys of leads persisted by runs dated in `[since, before)`.
    pub async fn recent_person_keys(
        &self,
        since: NaiveDate,
        before: NaiveDate,
    ) -> Result<HashSet<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT l.person_key FROM leads l
                 JOIN runs r ON r.id = l.run_id
                 WHERE r.run_date >= ?1 AND r.run_date < ?2",
                params![since.to_string(), before.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut keys = HashSet::new();
        while let Ok(Some(row)) = rows.next().await {
            keys.insert(row.get::<String>(0).map_err(storage_err)?);
        }
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn storage_err(e: impl std::fmt::Display) -> LeadflowError {
    LeadflowError::Storage(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| LeadflowError::Storage(format!("encode: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(json: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| LeadflowError::Storage(format!("decode: {e}")))
}

/// Fixed-width UTC timestamps so string comparison matches time order.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LeadflowError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`Run`].
fn row_to_run(row: &libsql::Row) -> Result<Run> {
    let id: String = row.get(0).map_err(storage_err)?;
    let run_date: String = row.get(1).map_err(storage_err)?;
    let config_json: String = row.get(2).map_err(storage_err)?;
    let status: String = row.get(3).map_err(storage_err)?;
    let stats_json: String = row.get(4).map_err(storage_err)?;
    let started_at: String = row.get(6).map_err(storage_err)?;

    Ok(Run {
        id: id
            .parse()
            .map_err(|e| LeadflowError::Storage(format!("invalid run id: {e}")))?,
        run_date: run_date
            .parse()
            .map_err(|e| LeadflowError::Storage(format!("invalid run date: {e}")))?,
        config: from_json(&config_json)?,
        status: status.parse().map_err(LeadflowError::Storage)?,
        stats: from_json(&stats_json)?,
        error: row.get::<String>(5).ok(),
        started_at: parse_timestamp(&started_at)?,
        finished_at: match row.get::<String>(7).ok() {
            Some(s) => Some(parse_timestamp(&s)?),
            None => None,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadflow_shared::{
        ContactKind, ContactPath, ExtractedCandidate, LeadCategory, RotationMode, Stage, Tier,
        TriggerType,
    };

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("lf_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn run_config() -> RunConfig {
        RunConfig {
            geo: "Houston".into(),
            geo_aliases: vec!["Houston".into(), "Houston, TX".into()],
            trigger_focus: "career_move".into(),
            industry_focus: None,
            daily_lead_target: 5,
            candidate_target: 30,
            recency_days: 7,
            cooldown_days: 90,
            tones: vec![Tone::from("congratulatory")],
            mode: RotationMode::Daily,
        }
    }

    fn lead(name: &str, key: &str, score: f32) -> ScoredLead {
        ScoredLead {
            candidate: ExtractedCandidate {
                full_name: name.into(),
                title: Some("VP Sales".into()),
                company: Some("Acme".into()),
                geo_signal: Some("Houston".into()),
                trigger_type: TriggerType::CareerMove,
                category: LeadCategory::DecisionMaker,
                rationale_short: "Joined Acme".into(),
                rationale_detailed: String::new(),
                evidence: vec!["named VP of Sales".into()],
                contact_paths: vec![ContactPath::new(ContactKind::Email, "x@acme.com", true)],
                confidence: 0.9,
                source_url: Some("https://news.example.com/a".into()),
            },
            score,
            tier: Tier::B,
            person_key: key.into(),
            published_at: None,
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("lf_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn create_run_is_idempotent_by_date() {
        let storage = test_storage().await;
        let day = date("2026-03-02");

        let (first, created) = storage.create_run(day, &run_config()).await.unwrap();
        assert!(created);
        assert_eq!(first.status, RunStatus::Running);

        let (second, created) = storage.create_run(day, &run_config()).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        let runs = storage.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn finalize_run_only_once() {
        let storage = test_storage().await;
        let (run, _) = storage
            .create_run(date("2026-03-02"), &run_config())
            .await
            .unwrap();

        let mut stats = RunStats::default();
        stats.pages_fetched = 4;
        stats.record_error(Stage::Fetch, Some("https://bad.example"), "HTTP 404");

        storage
            .finalize_run(&run.id, RunStatus::Failed, &stats, Some("boom"))
            .await
            .expect("finalize");

        let stored = storage.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
        assert_eq!(stored.stats, stats);
        assert!(stored.finished_at.is_some());

        let again = storage
            .finalize_run(&run.id, RunStatus::Success, &stats, None)
            .await;
        assert!(again.is_err());

        storage.restart_run(&run.id, &run_config()).await.unwrap();
        let restarted = storage.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(restarted.status, RunStatus::Running);
        assert!(restarted.error.is_none());
        assert_eq!(restarted.stats, RunStats::default());
    }

    #[tokio::test]
    async fn search_results_and_pages_upsert_by_url() {
        let storage = test_storage().await;
        let (run, _) = storage
            .create_run(date("2026-03-02"), &run_config())
            .await
            .unwrap();

        let hit = SearchResult {
            query: "q1".into(),
            url: "https://news.example.com/a".into(),
            title: "A".into(),
            snippet: "snippet".into(),
            published_at: None,
        };
        storage
            .upsert_search_results(&run.id, &[hit.clone(), hit.clone()])
            .await
            .unwrap();
        assert_eq!(storage.count_search_results(&run.id).await.unwrap(), 1);

        let page = FetchedPage {
            url: hit.url.clone(),
            final_url: hit.url.clone(),
            domain: "news.example.com".into(),
            status_code: Some(200),
            title: Some("A".into()),
            published_at: Some(Utc::now()),
            text: "body".into(),
            content_hash: "abc123".into(),
            fetched_at: Utc::now(),
            error: None,
        };
        storage.upsert_page(&run.id, &page).await.unwrap();
        storage.upsert_page(&run.id, &page).await.unwrap();
        assert_eq!(storage.count_pages(&run.id).await.unwrap(), 1);
        assert!(storage.content_hash_seen("abc123").await.unwrap());
        assert!(!storage.content_hash_seen("zzz").await.unwrap());
    }

    #[tokio::test]
    async fn leads_upsert_and_email_versions() {
        let storage = test_storage().await;
        let (run, _) = storage
            .create_run(date("2026-03-02"), &run_config())
            .await
            .unwrap();

        let a = lead("Dana Ruiz", "dana-ruiz::acme", 81.0);
        let id1 = storage.upsert_lead(&run.id, &a).await.unwrap();
        let id2 = storage
            .upsert_lead(&run.id, &ScoredLead { score: 85.0, ..a.clone() })
            .await
            .unwrap();
        assert_eq!(id1, id2);

        let leads = storage.list_leads(&run.id).await.unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].score, 85.0);
        assert_eq!(leads[0].candidate.contact_paths.len(), 1);

        let email = GeneratedEmail {
            subject: "Congrats".into(),
            body_html: "<p>Hi</p>".into(),
            body_text: "Hi".into(),
            tone: Tone::from("congratulatory"),
        };
        assert_eq!(storage.insert_email(&run.id, &a.person_key, &email).await.unwrap(), 1);
        assert_eq!(storage.insert_email(&run.id, &a.person_key, &email).await.unwrap(), 2);

        let (version, latest) = storage
            .latest_email(&run.id, &a.person_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(version, 2);
        assert_eq!(latest.subject, "Congrats");

        let missing = storage.insert_email(&run.id, "nobody::none", &email).await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn restart_clears_previous_selection() {
        let storage = test_storage().await;
        let (run, _) = storage
            .create_run(date("2026-03-02"), &run_config())
            .await
            .unwrap();
        let (other, _) = storage
            .create_run(date("2026-03-03"), &run_config())
            .await
            .unwrap();

        let email = GeneratedEmail {
            subject: "Congrats".into(),
            body_html: "<p>Hi</p>".into(),
            body_text: "Hi".into(),
            tone: Tone::from("congratulatory"),
        };
        for (name, key) in [("Dana Ruiz", "dana-ruiz::acme"), ("Lee Chen", "lee-chen::acme")] {
            storage.upsert_lead(&run.id, &lead(name, key, 80.0)).await.unwrap();
            storage.insert_email(&run.id, key, &email).await.unwrap();
        }
        storage
            .upsert_lead(&other.id, &lead("Dana Ruiz", "dana-ruiz::acme", 80.0))
            .await
            .unwrap();
        storage
            .finalize_run(&run.id, RunStatus::Failed, &RunStats::default(), Some("boom"))
            .await
            .unwrap();

        storage.restart_run(&run.id, &run_config()).await.unwrap();

        assert!(storage.list_leads(&run.id).await.unwrap().is_empty());
        assert!(storage.latest_email(&run.id, "dana-ruiz::acme").await.unwrap().is_none());
        assert_eq!(storage.list_leads(&other.id).await.unwrap().len(), 1);

        // A lead stored again after the restart starts a fresh email history.
        storage
            .upsert_lead(&run.id, &lead("Dana Ruiz", "dana-ruiz::acme", 82.0))
            .await
            .unwrap();
        assert_eq!(storage.insert_email(&run.id, "dana-ruiz::acme", &email).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn recent_person_keys_respects_window() {
        let storage = test_storage().await;
        let (old, _) = storage
            .create_run(date("2026-01-01"), &run_config())
            .await
            .unwrap();
        let (recent, _) = storage
            .create_run(date("2026-03-01"), &run_config())
            .await
            .unwrap();
        storage
            .upsert_lead(&old.id, &lead("Old Lead", "old::acme", 70.0))
            .await
            .unwrap();
        storage
            .upsert_lead(&recent.id, &lead("New Lead", "new::acme", 70.0))
            .await
            .unwrap();

        let keys = storage
            .recent_person_keys(date("2026-02-01"), date("2026-03-11"))
            .await
            .unwrap();
        assert!(keys.contains("new::acme"));
        assert!(!keys.contains("old::acme"));

        // Runs dated on or after `before` are excluded.
        let keys = storage
            .recent_person_keys(date("2026-02-01"), date("2026-03-01"))
            .await
            .unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("lf_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.create_run(date("2026-03-02"), &run_config()).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_runs(5).await.unwrap().len(), 1);
        let result = ro.create_run(date("2026-03-03"), &run_config()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
