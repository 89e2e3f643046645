//! Daily run orchestration: search → fetch → extract → score/select →
//! contact enrichment → colleague enrichment → draft → persist.
//!
//! Item-level failures (one query, one URL, one page, one lead) are recorded
//! in [`RunStats`] and never stop a stage. Run creation and the final
//! persistence writes are structural: any error escaping a stage is caught
//! once in [`Pipeline::run`], which finalizes the run as failed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use leadflow_fetcher::PageFetcher;
use leadflow_llm::{CandidateExtractor, EmailPredictor, ExtractionInput, OutreachDrafter};
use leadflow_search::SearchClient;
use leadflow_shared::{
    ExtractedCandidate, FetchedPage, GeneratedEmail, PipelineConfig, Result, Run, RunConfig,
    RunId, RunStats, RunStatus, ScoredLead, Stage,
};
use leadflow_storage::RunRecorder;
use tracing::{debug, error, info, instrument, warn};

use crate::colleague::ColleagueEnricher;
use crate::contact::ContactEnricher;
use crate::scoring::{LeadScorer, sort_by_score};

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// External collaborators, injected so tests can substitute fakes.
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn SearchClient>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub extractor: Arc<dyn CandidateExtractor>,
    pub scorer: Arc<dyn LeadScorer>,
    pub predictor: Arc<dyn EmailPredictor>,
    pub drafter: Arc<dyn OutreachDrafter>,
    pub recorder: Arc<dyn RunRecorder>,
}

/// Cost bounds and run policy.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_queries: usize,
    pub results_per_query: usize,
    /// Unique URLs carried into the fetch stage.
    pub max_fetch_urls: usize,
    /// Pages with less extracted text are treated as non-articles.
    pub min_text_len: usize,
    pub colleague_seed_count: usize,
    /// Pause between external calls within a stage.
    pub call_delay: Duration,
    /// Re-execute a date whose run already succeeded or is still running.
    pub force: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_queries: config.max_queries,
            results_per_query: config.results_per_query,
            max_fetch_urls: config.max_fetch_urls,
            min_text_len: config.min_text_len,
            colleague_seed_count: config.colleague_seed_count,
            call_delay: Duration::from_millis(config.call_delay_ms),
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Progress and outcome
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts.
    fn stage(&self, stage: Stage);
    /// Called before each item of a fanned-out stage.
    fn item(&self, stage: Stage, current: usize, total: usize);
    /// Called once a run completes successfully.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _stage: Stage) {}
    fn item(&self, _stage: Stage, _current: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

/// Result of a completed run.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: RunId,
    pub run_date: NaiveDate,
    pub stats: RunStats,
    /// Final selection, in drafting order.
    pub leads: Vec<ScoredLead>,
    /// Draft per person key; `None` where drafting failed.
    pub drafts: HashMap<String, Option<GeneratedEmail>>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// The date already has a successful run and `force` was not set.
    AlreadyCompleted(Run),
    /// The date's run is still marked running and `force` was not set.
    AlreadyRunning(Run),
}

/// Stage output carried from extraction into scoring.
type Candidate = (ExtractedCandidate, Option<DateTime<Utc>>);

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct Pipeline {
    c: Collaborators,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            c: collaborators,
            settings,
        }
    }

    /// Execute the run for `run_date`.
    ///
    /// Re-running a date reuses its run id. A failed run is restarted in
    /// place; a successful or still-running one is only re-executed with
    /// `force`.
    #[instrument(skip_all, fields(run_date = %run_date, geo = %config.geo, trigger = %config.trigger_focus))]
    pub async fn run(
        &self,
        config: &RunConfig,
        run_date: NaiveDate,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutcome> {
        let start = Instant::now();

        let (run, created) = self.c.recorder.create_run(run_date, config).await?;
        if !created {
            match run.status {
                RunStatus::Success if !self.settings.force => {
                    info!(run_id = %run.id, "run already completed for this date");
                    return Ok(RunOutcome::AlreadyCompleted(run));
                }
                RunStatus::Running if !self.settings.force => {
                    warn!(run_id = %run.id, "run already in progress for this date");
                    return Ok(RunOutcome::AlreadyRunning(run));
                }
                status => {
                    info!(run_id = %run.id, previous = %status.as_str(), "re-executing run");
                    self.c.recorder.restart_run(&run.id, config).await?;
                }
            }
        }

        info!(run_id = %run.id, "starting run");
        let mut stats = RunStats::default();
        let result = self.execute(&run.id, config, &mut stats, progress).await;
        stats.timings.total_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((leads, drafts)) => {
                self.c
                    .recorder
                    .finalize_run(&run.id, RunStatus::Success, &stats, None)
                    .await?;

                let summary = RunSummary {
                    run_id: run.id,
                    run_date,
                    stats,
                    leads,
                    drafts,
                    elapsed: start.elapsed(),
                };
                info!(
                    run_id = %summary.run_id,
                    leads = summary.leads.len(),
                    drafts = summary.stats.drafts_generated,
                    errors = summary.stats.errors.len(),
                    elapsed_ms = summary.stats.timings.total_ms,
                    "run complete"
                );
                progress.done(&summary);
                Ok(RunOutcome::Completed(summary))
            }
            Err(e) => {
                error!(run_id = %run.id, error = %e, "run failed");
                let message = e.to_string();
                if let Err(finalize_err) = self
                    .c
                    .recorder
                    .finalize_run(&run.id, RunStatus::Failed, &stats, Some(&message))
                    .await
                {
                    error!(run_id = %run.id, error = %finalize_err, "could not mark run failed");
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        run_id: &RunId,
        config: &RunConfig,
        stats: &mut RunStats,
        progress: &dyn ProgressReporter,
    ) -> Result<(Vec<ScoredLead>, HashMap<String, Option<GeneratedEmail>>)> {
        // --- Search ---
        let t = Instant::now();
        progress.stage(Stage::Search);
        let urls = self.search_stage(run_id, config, stats, progress).await;
        stats.record_timing(Stage::Search, t.elapsed());
        self.checkpoint(run_id, stats).await;

        // --- Fetch ---
        let t = Instant::now();
        progress.stage(Stage::Fetch);
        let pages = self.fetch_stage(run_id, &urls, stats, progress).await;
        stats.record_timing(Stage::Fetch, t.elapsed());
        self.checkpoint(run_id, stats).await;

        // --- Extract ---
        let t = Instant::now();
        progress.stage(Stage::Extract);
        let candidates = self.extract_stage(config, &pages, stats, progress).await;
        stats.record_timing(Stage::Extract, t.elapsed());

        // --- Score / select ---
        let t = Instant::now();
        progress.stage(Stage::Score);
        let mut selected = self.score_stage(config, candidates, stats).await?;
        stats.record_timing(Stage::Score, t.elapsed());
        self.checkpoint(run_id, stats).await;

        // --- Contact enrichment ---
        let t = Instant::now();
        progress.stage(Stage::ContactEnrichment);
        let enricher = ContactEnricher::new(
            self.c.search.clone(),
            self.c.predictor.clone(),
            self.settings.results_per_query,
            self.settings.call_delay,
        );
        let report = enricher.enrich(&mut selected).await;
        for (key, message) in &report.failures {
            stats.record_error(Stage::ContactEnrichment, Some(key.as_str()), message.clone());
        }
        stats.record_timing(Stage::ContactEnrichment, t.elapsed());

        // --- Colleague enrichment ---
        let t = Instant::now();
        progress.stage(Stage::ColleagueEnrichment);
        self.colleague_stage(config, &mut selected, stats).await;
        stats.leads_selected = selected.len();
        stats.record_timing(Stage::ColleagueEnrichment, t.elapsed());
        self.checkpoint(run_id, stats).await;

        // --- Draft ---
        let t = Instant::now();
        progress.stage(Stage::Draft);
        let drafts = self
            .c
            .drafter
            .generate_emails_batch(&selected, &config.tones, self.settings.call_delay)
            .await;
        for lead in &selected {
            match drafts.get(&lead.person_key) {
                Some(Some(_)) => stats.drafts_generated += 1,
                _ => stats.record_error(
                    Stage::Draft,
                    Some(lead.person_key.as_str()),
                    "draft generation failed",
                ),
            }
        }
        stats.record_timing(Stage::Draft, t.elapsed());

        // --- Persist ---
        let t = Instant::now();
        progress.stage(Stage::Persist);
        let persisted = self.persist_stage(run_id, &selected, &drafts, progress).await;
        stats.record_timing(Stage::Persist, t.elapsed());
        persisted?;

        Ok((selected, drafts))
    }

    /// Unique result URLs in discovery order, capped at `max_fetch_urls`.
    #[instrument(skip_all, fields(max_queries = self.settings.max_queries))]
    async fn search_stage(
        &self,
        run_id: &RunId,
        config: &RunConfig,
        stats: &mut RunStats,
        progress: &dyn ProgressReporter,
    ) -> Vec<String> {
        let mut queries = self.c.search.build_trigger_queries(
            &config.geo_aliases,
            &config.trigger_focus,
            config.industry_focus.as_deref(),
        );
        queries.truncate(self.settings.max_queries);

        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        for (i, query) in queries.iter().enumerate() {
            self.pause(i).await;
            progress.item(Stage::Search, i + 1, queries.len());
            stats.queries_executed += 1;

            let results = match self
                .c
                .search
                .search(query, config.recency_days, self.settings.results_per_query)
                .await
            {
                Ok(results) => results,
                Err(e) => {
                    warn!(%query, error = %e, "search failed, skipping query");
                    stats.record_error(Stage::Search, Some(query.as_str()), e.to_string());
                    continue;
                }
            };
            debug!(%query, hits = results.len(), "query complete");
            stats.search_results_found += results.len();

            if let Err(e) = self.c.recorder.upsert_search_results(run_id, &results).await {
                warn!(%query, error = %e, "could not store search results");
                stats.record_error(Stage::Persist, Some(query.as_str()), e.to_string());
            }

            for result in results {
                if urls.len() < self.settings.max_fetch_urls && seen.insert(result.url.clone()) {
                    urls.push(result.url);
                }
            }
        }

        info!(
            queries = queries.len(),
            results = stats.search_results_found,
            unique_urls = urls.len(),
            "search complete"
        );
        urls
    }

    /// Pages worth extracting: fetched without error, long enough, and not
    /// a content duplicate of an earlier page in this run.
    #[instrument(skip_all, fields(urls = urls.len()))]
    async fn fetch_stage(
        &self,
        run_id: &RunId,
        urls: &[String],
        stats: &mut RunStats,
        progress: &dyn ProgressReporter,
    ) -> Vec<FetchedPage> {
        let mut hashes = HashSet::new();
        let mut pages = Vec::new();

        for (i, url) in urls.iter().enumerate() {
            self.pause(i).await;
            progress.item(Stage::Fetch, i + 1, urls.len());

            let page = self.c.fetcher.fetch_page(url).await;
            if let Err(e) = self.c.recorder.upsert_page(run_id, &page).await {
                warn!(%url, error = %e, "could not store page");
                stats.record_error(Stage::Persist, Some(url.as_str()), e.to_string());
            }

            if let Some(err) = &page.error {
                warn!(%url, error = %err, "fetch failed, skipping page");
                stats.record_error(Stage::Fetch, Some(url.as_str()), err.clone());
                continue;
            }
            if page.text.len() < self.settings.min_text_len {
                debug!(%url, len = page.text.len(), "page too short, skipping");
                stats.record_error(
                    Stage::Fetch,
                    Some(url.as_str()),
                    format!("extracted text too short ({} chars)", page.text.len()),
                );
                continue;
            }
            if !hashes.insert(page.content_hash.clone()) {
                debug!(%url, "duplicate content, skipping");
                continue;
            }

            stats.pages_fetched += 1;
            pages.push(page);
        }

        info!(fetched = pages.len(), failed = stats.error_count(Stage::Fetch), "fetch complete");
        pages
    }

    /// Flattened candidates, each tagged with its page's publish date.
    #[instrument(skip_all, fields(pages = pages.len()))]
    async fn extract_stage(
        &self,
        config: &RunConfig,
        pages: &[FetchedPage],
        stats: &mut RunStats,
        progress: &dyn ProgressReporter,
    ) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();

        for (i, page) in pages.iter().enumerate() {
            if config.candidate_target > 0 && candidates.len() >= config.candidate_target {
                info!(candidate_target = config.candidate_target, "candidate target reached");
                break;
            }
            self.pause(i).await;
            progress.item(Stage::Extract, i + 1, pages.len());

            let input = ExtractionInput {
                page_title: page.title.clone(),
                source_url: page.url.clone(),
                extracted_text: page.text.clone(),
            };
            match self.c.extractor.extract_leads(&input).await {
                Ok(output) => {
                    debug!(url = %page.url, found = output.candidates.len(), "page extracted");
                    for mut candidate in output.candidates {
                        candidate.source_url.get_or_insert_with(|| page.url.clone());
                        candidates.push((candidate, page.published_at));
                    }
                }
                Err(e) => {
                    warn!(url = %page.url, error = %e, "extraction failed, skipping page");
                    stats.record_error(Stage::Extract, Some(page.url.as_str()), e.to_string());
                }
            }
        }

        stats.candidates_extracted = candidates.len();
        info!(candidates = candidates.len(), "extraction complete");
        candidates
    }

    async fn score_stage(
        &self,
        config: &RunConfig,
        candidates: Vec<Candidate>,
        stats: &mut RunStats,
    ) -> Result<Vec<ScoredLead>> {
        let mut scored: Vec<ScoredLead> = candidates
            .iter()
            .map(|(candidate, published_at)| self.c.scorer.score_lead(candidate, *published_at))
            .collect();
        sort_by_score(&mut scored);
        stats.leads_scored = scored.len();

        let selected = self
            .c
            .scorer
            .select_top_leads(scored, config.daily_lead_target, config.cooldown_days)
            .await?;
        stats.leads_selected = selected.len();
        Ok(selected)
    }

    /// Append colleagues of the top leads while the daily target has room.
    async fn colleague_stage(
        &self,
        config: &RunConfig,
        selected: &mut Vec<ScoredLead>,
        stats: &mut RunStats,
    ) {
        let headroom = config.daily_lead_target.saturating_sub(selected.len());
        if headroom == 0 || self.settings.colleague_seed_count == 0 {
            debug!(headroom, "no room for colleagues");
            return;
        }

        let cooled = match self.c.scorer.cooled_keys(config.cooldown_days).await {
            Ok(cooled) => cooled,
            Err(e) => {
                warn!(error = %e, "cooldown lookup failed, skipping colleagues");
                stats.record_error(Stage::ColleagueEnrichment, None, e.to_string());
                return;
            }
        };

        let enricher = ColleagueEnricher::new(
            self.c.search.clone(),
            self.c.fetcher.clone(),
            self.c.extractor.clone(),
            self.c.scorer.clone(),
            self.settings.results_per_query,
            self.settings.call_delay,
        );
        let report = enricher
            .find_colleagues(selected, self.settings.colleague_seed_count, &cooled)
            .await;

        for (key, message) in &report.failures {
            stats.record_error(Stage::ColleagueEnrichment, Some(key.as_str()), message.clone());
        }
        let added = report.colleagues.len().min(headroom);
        selected.extend(report.colleagues.into_iter().take(headroom));
        info!(added, headroom, "colleagues appended");
    }

    /// Leads and drafts. A write failure here fails the run.
    async fn persist_stage(
        &self,
        run_id: &RunId,
        leads: &[ScoredLead],
        drafts: &HashMap<String, Option<GeneratedEmail>>,
        progress: &dyn ProgressReporter,
    ) -> Result<()> {
        for (i, lead) in leads.iter().enumerate() {
            progress.item(Stage::Persist, i + 1, leads.len());
            self.c.recorder.upsert_lead(run_id, lead).await?;
            if let Some(Some(email)) = drafts.get(&lead.person_key) {
                let version = self
                    .c
                    .recorder
                    .insert_email(run_id, &lead.person_key, email)
                    .await?;
                debug!(person_key = %lead.person_key, version, "draft stored");
            }
        }
        info!(leads = leads.len(), "leads persisted");
        Ok(())
    }

    /// Store interim stats so a long run can be inspected mid-flight.
    async fn checkpoint(&self, run_id: &RunId, stats: &RunStats) {
        if let Err(e) = self.c.recorder.update_run_stats(run_id, stats).await {
            warn!(run_id = %run_id, error = %e, "could not checkpoint run stats");
        }
    }

    async fn pause(&self, index: usize) {
        if index > 0 && !self.settings.call_delay.is_zero() {
            tokio::time::sleep(self.settings.call_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::HeuristicScorer;
    use crate::testing::{
        MockDrafter, MockExtractor, MockFetcher, MockPredictor, MockSearch, article, candidate,
        result, scored,
    };
    use async_trait::async_trait;
    use leadflow_shared::{LeadflowError, RotationMode, SearchResult, Tier, Tone};
    use leadflow_storage::{LeadHistory, Storage};
    use uuid::Uuid;

    const RUN_DATE: &str = "2026-03-10";

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("lf_test_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    fn run_date() -> NaiveDate {
        RUN_DATE.parse().unwrap()
    }

    fn run_config(daily_target: usize, cooldown_days: u32) -> RunConfig {
        RunConfig {
            geo: "Houston".into(),
            geo_aliases: vec!["Houston".into(), "Houston, TX".into()],
            trigger_focus: "career_move".into(),
            industry_focus: None,
            daily_lead_target: daily_target,
            candidate_target: 30,
            recency_days: 7,
            cooldown_days,
            tones: ["congratulatory", "value_first", "peer_credibility", "direct_curious"]
                .into_iter()
                .map(Tone::from)
                .collect(),
            mode: RotationMode::Daily,
        }
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            call_delay: Duration::ZERO,
            ..PipelineSettings::default()
        }
    }

    struct Fakes {
        search: MockSearch,
        fetcher: MockFetcher,
        extractor: MockExtractor,
        drafter: MockDrafter,
    }

    fn pipeline(
        fakes: Fakes,
        recorder: Arc<dyn RunRecorder>,
        history: Arc<dyn LeadHistory>,
        settings: PipelineSettings,
    ) -> Pipeline {
        let scorer = HeuristicScorer::new(history).with_reference_date(run_date());
        Pipeline::new(
            Collaborators {
                search: Arc::new(fakes.search),
                fetcher: Arc::new(fakes.fetcher),
                extractor: Arc::new(fakes.extractor),
                scorer: Arc::new(scorer),
                predictor: Arc::new(MockPredictor::new()),
                drafter: Arc::new(fakes.drafter),
                recorder,
            },
            settings,
        )
    }

    fn completed(outcome: RunOutcome) -> RunSummary {
        match outcome {
            RunOutcome::Completed(summary) => summary,
            other => panic!("expected a completed run, got {other:?}"),
        }
    }

    fn url(i: usize) -> String {
        format!("https://news.example/story-{i}")
    }

    fn scenario_fakes() -> Fakes {
        scenario_fakes_naming("Person")
    }

    /// Three queries over ten unique URLs; eight fetch, twelve candidates
    /// named `"{prefix} {n}"`.
    fn scenario_fakes_naming(prefix: &str) -> Fakes {
        let queries = ["\"Houston\" \"joins as\"", "\"Houston\" \"named\"", "\"Houston, TX\" \"appointed\""];
        let search = MockSearch::new()
            .with_queries(&queries)
            .on_query(queries[0], (0..5).map(|i| result(queries[0], &url(i))).collect())
            .on_query(queries[1], (3..8).map(|i| result(queries[1], &url(i))).collect())
            .on_query(queries[2], (7..10).map(|i| result(queries[2], &url(i))).collect());

        let mut fetcher = MockFetcher::new();
        for i in 0..8 {
            fetcher = fetcher.page(&url(i), &article(&format!("story {i}")));
        }

        let per_page = [2, 2, 2, 1, 1, 2, 1, 1];
        let mut extractor = MockExtractor::new();
        let mut n = 0;
        for (i, count) in per_page.into_iter().enumerate() {
            let found = (0..count)
                .map(|_| {
                    n += 1;
                    let mut c = candidate(&format!("{prefix} {n}"), Some(&format!("Company {n}")));
                    c.confidence = 0.5 + n as f32 * 0.03;
                    c
                })
                .collect();
            extractor = extractor.on_url(&url(i), found);
        }

        Fakes {
            search,
            fetcher,
            extractor,
            drafter: MockDrafter::new(),
        }
    }

    #[tokio::test]
    async fn end_to_end_scenario() {
        let storage = test_storage().await;

        // The best candidate was selected ten days ago.
        let previous_date = run_date() - chrono::Duration::days(10);
        let (previous, _) = storage
            .create_run(previous_date, &run_config(5, 90))
            .await
            .unwrap();
        let earlier = scored("Person 12", Some("Company 12"), Tier::A, 90.0);
        storage.upsert_lead(&previous.id, &earlier).await.unwrap();

        let pipeline = pipeline(scenario_fakes(), storage.clone(), storage.clone(), settings());
        let summary = completed(
            pipeline
                .run(&run_config(5, 90), run_date(), &SilentProgress)
                .await
                .unwrap(),
        );

        assert_eq!(summary.stats.queries_executed, 3);
        assert_eq!(storage.count_search_results(&summary.run_id).await.unwrap(), 10);
        assert_eq!(summary.stats.pages_fetched, 8);
        assert_eq!(summary.stats.error_count(Stage::Fetch), 2);
        assert_eq!(summary.stats.candidates_extracted, 12);
        assert_eq!(summary.stats.leads_scored, 12);

        assert_eq!(summary.leads.len(), 5);
        let keys: HashSet<&str> = summary.leads.iter().map(|l| l.person_key.as_str()).collect();
        assert_eq!(keys.len(), 5);
        assert!(!keys.contains("person-12::company-12"));

        let tones: Vec<&str> = summary
            .leads
            .iter()
            .map(|l| summary.drafts[&l.person_key].as_ref().unwrap().tone.as_str())
            .collect();
        assert_eq!(
            tones,
            vec!["congratulatory", "value_first", "peer_credibility", "direct_curious", "congratulatory"]
        );
        assert_eq!(summary.stats.drafts_generated, 5);

        let run = storage.get_run(&summary.run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.stats, summary.stats);
        for stage in ["search", "fetch", "extract", "score", "draft", "persist"] {
            assert!(run.stats.timings.stages.contains_key(stage), "missing timing for {stage}");
        }

        let stored = storage.list_leads(&summary.run_id).await.unwrap();
        assert_eq!(stored.len(), 5);
        for lead in &summary.leads {
            assert!(storage.latest_email(&summary.run_id, &lead.person_key).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn failed_fetches_are_isolated() {
        let storage = test_storage().await;
        let search = MockSearch::new()
            .with_queries(&["q"])
            .on_query("q", (0..5).map(|i| result("q", &url(i))).collect());
        let fetcher = MockFetcher::new()
            .page(&url(0), &article("a"))
            .page(&url(2), &article("b"))
            .page(&url(4), &article("c"));
        let mut extractor = MockExtractor::new();
        for i in 0..5 {
            extractor = extractor.on_url(&url(i), vec![candidate(&format!("Person {i}"), Some("Acme"))]);
        }
        let fakes = Fakes {
            search,
            fetcher,
            extractor: extractor.clone(),
            drafter: MockDrafter::new(),
        };

        let pipeline = pipeline(fakes, storage.clone(), storage.clone(), settings());
        let summary = completed(
            pipeline
                .run(&run_config(10, 0), run_date(), &SilentProgress)
                .await
                .unwrap(),
        );

        assert_eq!(summary.stats.error_count(Stage::Fetch), 2);
        assert_eq!(summary.stats.errors.len(), 2);
        assert_eq!(extractor.call_count(), 3);
        assert_eq!(summary.leads.len(), 3);
        let good: HashSet<String> = [url(0), url(2), url(4)].into_iter().collect();
        for lead in &summary.leads {
            assert!(good.contains(lead.candidate.source_url.as_deref().unwrap()));
        }
        assert_eq!(storage.count_pages(&summary.run_id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn short_and_duplicate_pages_are_discarded() {
        let storage = test_storage().await;
        let search = MockSearch::new()
            .with_queries(&["q"])
            .on_query("q", (0..3).map(|i| result("q", &url(i))).collect());
        let fetcher = MockFetcher::new()
            .page(&url(0), &article("same"))
            .page(&url(1), &article("same"))
            .page(&url(2), "Subscribe to read more.");
        let extractor = MockExtractor::new();
        let fakes = Fakes {
            search,
            fetcher,
            extractor: extractor.clone(),
            drafter: MockDrafter::new(),
        };

        let pipeline = pipeline(fakes, storage.clone(), storage.clone(), settings());
        let summary = completed(
            pipeline
                .run(&run_config(5, 0), run_date(), &SilentProgress)
                .await
                .unwrap(),
        );

        assert_eq!(summary.stats.pages_fetched, 1);
        assert_eq!(extractor.call_count(), 1);
        assert_eq!(summary.stats.error_count(Stage::Fetch), 1);
        assert!(summary.stats.errors[0].message.contains("too short"));
        assert!(summary.leads.is_empty());
    }

    #[tokio::test]
    async fn rerunning_a_date_is_idempotent() {
        let storage = test_storage().await;
        let config = run_config(5, 0);

        let first = completed(
            pipeline(scenario_fakes(), storage.clone(), storage.clone(), settings())
                .run(&config, run_date(), &SilentProgress)
                .await
                .unwrap(),
        );

        let again = pipeline(scenario_fakes(), storage.clone(), storage.clone(), settings())
            .run(&config, run_date(), &SilentProgress)
            .await
            .unwrap();
        match again {
            RunOutcome::AlreadyCompleted(run) => assert_eq!(run.id, first.run_id),
            other => panic!("expected skip, got {other:?}"),
        }

        let forced = completed(
            pipeline(scenario_fakes(), storage.clone(), storage.clone(), settings().with_force(true))
                .run(&config, run_date(), &SilentProgress)
                .await
                .unwrap(),
        );
        assert_eq!(forced.run_id, first.run_id);
        assert_eq!(storage.list_runs(10).await.unwrap().len(), 1);

        let stored = storage.list_leads(&first.run_id).await.unwrap();
        let keys: HashSet<&str> = stored.iter().map(|l| l.person_key.as_str()).collect();
        assert_eq!(stored.len(), 5);
        assert_eq!(keys.len(), stored.len());
    }

    struct BrokenHistory;

    #[async_trait]
    impl LeadHistory for BrokenHistory {
        async fn recent_person_keys(
            &self,
            _since: NaiveDate,
            _before: NaiveDate,
        ) -> Result<HashSet<String>> {
            Err(LeadflowError::Storage("history unavailable".into()))
        }
    }

    #[tokio::test]
    async fn escaped_error_fails_the_run_and_a_retry_recovers() {
        let storage = test_storage().await;
        let config = run_config(5, 90);

        let err = pipeline(scenario_fakes(), storage.clone(), Arc::new(BrokenHistory), settings())
            .run(&config, run_date(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("history unavailable"));

        let run = storage.get_run_by_date(run_date()).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.as_deref().unwrap().contains("history unavailable"));
        assert_eq!(run.stats.pages_fetched, 8);
        assert!(run.finished_at.is_some());

        // A failed run is retried in place without `force`.
        let summary = completed(
            pipeline(scenario_fakes(), storage.clone(), storage.clone(), settings())
                .run(&config, run_date(), &SilentProgress)
                .await
                .unwrap(),
        );
        assert_eq!(summary.run_id, run.id);
        let run = storage.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.error.is_none());
    }

    #[tokio::test]
    async fn colleagues_fill_remaining_headroom() {
        let storage = test_storage().await;
        let team_url = "https://acmeenergy.com/leadership";
        let published = run_date().and_hms_opt(9, 0, 0).unwrap().and_utc() - chrono::Duration::days(1);

        let search = MockSearch::new()
            .with_queries(&["q"])
            .on_query("q", vec![result("q", &url(0))])
            .on_query(
                "\"Acme Energy\" leadership team",
                vec![result("team", team_url)],
            );
        let fetcher = MockFetcher::new()
            .dated_page(&url(0), &article("news"), published)
            .page(team_url, &article("team"));
        let extractor = MockExtractor::new()
            .on_url(&url(0), vec![candidate("Dana Ruiz", Some("Acme Energy"))])
            .on_url(
                team_url,
                vec![
                    candidate("Dana Ruiz", Some("Acme Energy")),
                    candidate("Lee Chen", Some("Acme Energy")),
                    candidate("Ana Gomez", Some("Acme Energy")),
                    candidate("Sam Park", Some("Acme Energy")),
                ],
            );
        let fakes = Fakes {
            search,
            fetcher,
            extractor,
            drafter: MockDrafter::new().failing_for("ana-gomez::acme-energy"),
        };

        let pipeline = pipeline(fakes, storage.clone(), storage.clone(), settings());
        let summary = completed(
            pipeline
                .run(&run_config(3, 0), run_date(), &SilentProgress)
                .await
                .unwrap(),
        );

        let keys: Vec<&str> = summary.leads.iter().map(|l| l.person_key.as_str()).collect();
        assert_eq!(keys, vec!["dana-ruiz::acme-energy", "lee-chen::acme-energy", "ana-gomez::acme-energy"]);
        assert_eq!(summary.stats.leads_selected, 3);

        // A failed draft is recorded but the lead is still stored.
        assert!(summary.drafts["ana-gomez::acme-energy"].is_none());
        assert_eq!(summary.stats.drafts_generated, 2);
        assert_eq!(summary.stats.error_count(Stage::Draft), 1);
        assert_eq!(storage.list_leads(&summary.run_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn forced_rerun_replaces_the_previous_selection() {
        let storage = test_storage().await;
        let config = run_config(5, 0);

        let first = completed(
            pipeline(scenario_fakes(), storage.clone(), storage.clone(), settings())
                .run(&config, run_date(), &SilentProgress)
                .await
                .unwrap(),
        );

        // The same pages now name different people.
        let forced = completed(
            pipeline(
                scenario_fakes_naming("Analyst"),
                storage.clone(),
                storage.clone(),
                settings().with_force(true),
            )
            .run(&config, run_date(), &SilentProgress)
            .await
            .unwrap(),
        );
        assert_eq!(forced.run_id, first.run_id);

        let stored = storage.list_leads(&first.run_id).await.unwrap();
        assert_eq!(stored.len(), config.daily_lead_target);
        let stored_keys: HashSet<&str> = stored.iter().map(|l| l.person_key.as_str()).collect();
        let forced_keys: HashSet<&str> = forced.leads.iter().map(|l| l.person_key.as_str()).collect();
        assert_eq!(stored_keys, forced_keys);
        for lead in &first.leads {
            assert!(storage.latest_email(&first.run_id, &lead.person_key).await.unwrap().is_none());
        }

        // A later run's cooldown only sees the surviving selection.
        let later = run_date() + chrono::Duration::days(1);
        let recent = storage.recent_person_keys(run_date(), later).await.unwrap();
        let expected: HashSet<String> = forced_keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(recent, expected);
    }

    /// Delegates to [`Storage`] but refuses to store leads.
    struct LeadWriteFails(Arc<Storage>);

    #[async_trait]
    impl RunRecorder for LeadWriteFails {
        async fn create_run(&self, run_date: NaiveDate, config: &RunConfig) -> Result<(Run, bool)> {
            self.0.create_run(run_date, config).await
        }

        async fn restart_run(&self, id: &RunId, config: &RunConfig) -> Result<()> {
            self.0.restart_run(id, config).await
        }

        async fn update_run_stats(&self, id: &RunId, stats: &RunStats) -> Result<()> {
            self.0.update_run_stats(id, stats).await
        }

        async fn finalize_run(
            &self,
            id: &RunId,
            status: RunStatus,
            stats: &RunStats,
            error: Option<&str>,
        ) -> Result<()> {
            self.0.finalize_run(id, status, stats, error).await
        }

        async fn upsert_search_results(
            &self,
            run_id: &RunId,
            results: &[SearchResult],
        ) -> Result<usize> {
            self.0.upsert_search_results(run_id, results).await
        }

        async fn upsert_page(&self, run_id: &RunId, page: &FetchedPage) -> Result<()> {
            self.0.upsert_page(run_id, page).await
        }

        async fn upsert_lead(&self, _run_id: &RunId, _lead: &ScoredLead) -> Result<String> {
            Err(LeadflowError::Storage("disk full".into()))
        }

        async fn insert_email(
            &self,
            run_id: &RunId,
            person_key: &str,
            email: &GeneratedEmail,
        ) -> Result<i64> {
            self.0.insert_email(run_id, person_key, email).await
        }
    }

    #[tokio::test]
    async fn lead_write_failure_fails_the_run() {
        let storage = test_storage().await;
        let recorder = Arc::new(LeadWriteFails(storage.clone()));

        let err = pipeline(scenario_fakes(), recorder, storage.clone(), settings())
            .run(&run_config(5, 0), run_date(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));

        let run = storage.get_run_by_date(run_date()).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error.as_deref().unwrap().contains("disk full"));
        assert_eq!(run.stats.drafts_generated, 5);
        assert!(run.stats.timings.stages.contains_key("persist"));
        assert!(storage.list_leads(&run.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cooled_colleagues_are_not_selected() {
        let storage = test_storage().await;
        let team_url = "https://acmeenergy.com/leadership";
        let published = run_date().and_hms_opt(9, 0, 0).unwrap().and_utc() - chrono::Duration::days(1);

        // Lee Chen was selected ten days ago.
        let previous_date = run_date() - chrono::Duration::days(10);
        let (previous, _) = storage
            .create_run(previous_date, &run_config(3, 90))
            .await
            .unwrap();
        let earlier = scored("Lee Chen", Some("Acme Energy"), Tier::A, 85.0);
        storage.upsert_lead(&previous.id, &earlier).await.unwrap();

        let search = MockSearch::new()
            .with_queries(&["q"])
            .on_query("q", vec![result("q", &url(0))])
            .on_query(
                "\"Acme Energy\" leadership team",
                vec![result("team", team_url)],
            );
        let fetcher = MockFetcher::new()
            .dated_page(&url(0), &article("news"), published)
            .page(team_url, &article("team"));
        let extractor = MockExtractor::new()
            .on_url(&url(0), vec![candidate("Dana Ruiz", Some("Acme Energy"))])
            .on_url(
                team_url,
                vec![
                    candidate("Lee Chen", Some("Acme Energy")),
                    candidate("Ana Gomez", Some("Acme Energy")),
                    candidate("Sam Park", Some("Acme Energy")),
                ],
            );
        let fakes = Fakes {
            search,
            fetcher,
            extractor,
            drafter: MockDrafter::new(),
        };

        let summary = completed(
            pipeline(fakes, storage.clone(), storage.clone(), settings())
                .run(&run_config(3, 90), run_date(), &SilentProgress)
                .await
                .unwrap(),
        );

        let keys: Vec<&str> = summary.leads.iter().map(|l| l.person_key.as_str()).collect();
        assert_eq!(keys, vec!["dana-ruiz::acme-energy", "ana-gomez::acme-energy", "sam-park::acme-energy"]);
    }
}
