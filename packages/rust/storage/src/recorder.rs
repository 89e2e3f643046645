//! Persistence contracts consumed by the pipeline.
//!
//! [`Storage`] implements both traits by delegating to its inherent methods.
//! The pipeline and the scorer hold them as `Arc<dyn ...>` so tests can swap
//! in a different backend.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use leadflow_shared::{
    FetchedPage, GeneratedEmail, Result, Run, RunConfig, RunId, RunStats, RunStatus, ScoredLead,
    SearchResult,
};

use crate::Storage;

/// Writes run metadata and per-stage artifacts. All writes are upserts on
/// natural keys so re-executing a run is safe.
#[async_trait]
pub trait RunRecorder: Send + Sync {
    /// Create the run for `run_date`, or return the existing one with `false`.
    async fn create_run(&self, run_date: NaiveDate, config: &RunConfig) -> Result<(Run, bool)>;

    /// Reset a previously finished run to `running` for re-execution,
    /// dropping the leads and drafts it stored before.
    async fn restart_run(&self, id: &RunId, config: &RunConfig) -> Result<()>;

    async fn update_run_stats(&self, id: &RunId, stats: &RunStats) -> Result<()>;

    /// Finalize a `running` run exactly once.
    async fn finalize_run(
        &self,
        id: &RunId,
        status: RunStatus,
        stats: &RunStats,
        error: Option<&str>,
    ) -> Result<()>;

    async fn upsert_search_results(&self, run_id: &RunId, results: &[SearchResult])
    -> Result<usize>;

    async fn upsert_page(&self, run_id: &RunId, page: &FetchedPage) -> Result<()>;

    /// Returns the stored lead's row id.
    async fn upsert_lead(&self, run_id: &RunId, lead: &ScoredLead) -> Result<String>;

    /// Returns the new email version for the lead.
    async fn insert_email(
        &self,
        run_id: &RunId,
        person_key: &str,
        email: &GeneratedEmail,
    ) -> Result<i64>;
}

/// Read access to previously selected leads, used for cooldown filtering.
#[async_trait]
pub trait LeadHistory: Send + Sync {
    /// Person keys of leads stored by runs dated in `[since, before)`.
    async fn recent_person_keys(&self, since: NaiveDate, before: NaiveDate)
    -> Result<HashSet<String>>;
}

#[async_trait]
impl RunRecorder for Storage {
    async fn create_run(&self, run_date: NaiveDate, config: &RunConfig) -> Result<(Run, bool)> {
        Storage::create_run(self, run_date, config).await
    }

    async fn restart_run(&self, id: &RunId, config: &RunConfig) -> Result<()> {
        Storage::restart_run(self, id, config).await
    }

    async fn update_run_stats(&self, id: &RunId, stats: &RunStats) -> Result<()> {
        Storage::update_run_stats(self, id, stats).await
    }

    async fn finalize_run(
        &self,
        id: &RunId,
        status: RunStatus,
        stats: &RunStats,
        error: Option<&str>,
    ) -> Result<()> {
        Storage::finalize_run(self, id, status, stats, error).await
    }

    async fn upsert_search_results(
        &self,
        run_id: &RunId,
        results: &[SearchResult],
    ) -> Result<usize> {
        Storage::upsert_search_results(self, run_id, results).await
    }

    async fn upsert_page(&self, run_id: &RunId, page: &FetchedPage) -> Result<()> {
        Storage::upsert_page(self, run_id, page).await
    }

    async fn upsert_lead(&self, run_id: &RunId, lead: &ScoredLead) -> Result<String> {
        Storage::upsert_lead(self, run_id, lead).await
    }

    async fn insert_email(
        &self,
        run_id: &RunId,
        person_key: &str,
        email: &GeneratedEmail,
    ) -> Result<i64> {
        Storage::insert_email(self, run_id, person_key, email).await
    }
}

#[async_trait]
impl LeadHistory for Storage {
    async fn recent_person_keys(
        &self,
        since: NaiveDate,
        before: NaiveDate,
    ) -> Result<HashSet<String>> {
        Storage::recent_person_keys(self, since, before).await
    }
}
