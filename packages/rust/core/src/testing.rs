//! In-memory collaborators for pipeline and enrichment tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use leadflow_fetcher::{PageFetcher, compute_hash};
use leadflow_llm::{CandidateExtractor, EmailPredictor, ExtractionInput, ExtractionOutput, OutreachDrafter};
use leadflow_search::SearchClient;
use leadflow_shared::{
    ExtractedCandidate, FetchedPage, GeneratedEmail, LeadCategory, LeadflowError, Result,
    ScoredLead, SearchResult, Tier, Tone, TriggerType,
};
use leadflow_storage::LeadHistory;

pub fn candidate(name: &str, company: Option<&str>) -> ExtractedCandidate {
    ExtractedCandidate {
        full_name: name.into(),
        title: Some("Chief Financial Officer".into()),
        company: company.map(Into::into),
        geo_signal: Some("Houston".into()),
        trigger_type: TriggerType::CareerMove,
        category: LeadCategory::Executive,
        rationale_short: format!("{name} started a new role"),
        rationale_detailed: String::new(),
        evidence: vec![],
        contact_paths: vec![],
        confidence: 0.8,
        source_url: None,
    }
}

pub fn scored(name: &str, company: Option<&str>, tier: Tier, score: f32) -> ScoredLead {
    let candidate = candidate(name, company);
    ScoredLead {
        person_key: crate::scoring::person_key(&candidate),
        candidate,
        score,
        tier,
        published_at: None,
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockHistory {
    runs: Vec<(NaiveDate, Vec<String>)>,
}

impl MockHistory {
    pub fn with_run(mut self, date: &str, keys: &[&str]) -> Self {
        let date = date.parse().expect("valid date");
        self.runs
            .push((date, keys.iter().map(|k| k.to_string()).collect()));
        self
    }
}

#[async_trait]
impl LeadHistory for MockHistory {
    async fn recent_person_keys(
        &self,
        since: NaiveDate,
        before: NaiveDate,
    ) -> Result<HashSet<String>> {
        Ok(self
            .runs
            .iter()
            .filter(|(date, _)| *date >= since && *date < before)
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Canned results per query; unknown queries return nothing.
#[derive(Clone, Default)]
pub struct MockSearch {
    results: HashMap<String, Vec<SearchResult>>,
    queries: Option<Vec<String>>,
    failing_queries: HashSet<String>,
    fail_all: bool,
    calls: Arc<AtomicUsize>,
}

impl MockSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_query(mut self, query: &str, results: Vec<SearchResult>) -> Self {
        self.results.insert(query.to_string(), results);
        self
    }

    /// Replace the built query list.
    pub fn with_queries(mut self, queries: &[&str]) -> Self {
        self.queries = Some(queries.iter().map(|q| q.to_string()).collect());
        self
    }

    pub fn failing_query(mut self, query: &str) -> Self {
        self.failing_queries.insert(query.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchClient for MockSearch {
    async fn search(
        &self,
        query: &str,
        _recency_days: u32,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all || self.failing_queries.contains(query) {
            return Err(LeadflowError::Network(format!("search failed: {query}")));
        }
        Ok(self
            .results
            .get(query)
            .map(|r| r.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn build_trigger_queries(
        &self,
        geo_aliases: &[String],
        trigger_focus: &str,
        industry_focus: Option<&str>,
    ) -> Vec<String> {
        match &self.queries {
            Some(queries) => queries.clone(),
            None => leadflow_search::build_trigger_queries(geo_aliases, trigger_focus, industry_focus),
        }
    }
}

pub fn result(query: &str, url: &str) -> SearchResult {
    SearchResult {
        query: query.into(),
        url: url.into(),
        title: format!("News: {url}"),
        snippet: String::new(),
        published_at: None,
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Pages by URL; unknown URLs fail.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: HashMap<String, (String, Option<DateTime<Utc>>)>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), (text.to_string(), None));
        self
    }

    pub fn dated_page(mut self, url: &str, text: &str, published_at: DateTime<Utc>) -> Self {
        self.pages
            .insert(url.to_string(), (text.to_string(), Some(published_at)));
        self
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch_page(&self, url: &str) -> FetchedPage {
        let Some((text, published_at)) = self.pages.get(url) else {
            return FetchedPage::failed(url, "connection refused");
        };
        FetchedPage {
            url: url.to_string(),
            final_url: url.to_string(),
            domain: "news.example".into(),
            status_code: Some(200),
            title: Some(format!("Article {url}")),
            published_at: *published_at,
            text: text.clone(),
            content_hash: compute_hash(text),
            fetched_at: Utc::now(),
            error: None,
        }
    }
}

/// Article text comfortably above the minimum length, unique per seed.
pub fn article(seed: &str) -> String {
    format!("{seed}. {}", "Executive appointment news. ".repeat(30))
}

// ---------------------------------------------------------------------------
// LLM collaborators
// ---------------------------------------------------------------------------

/// Candidates keyed by source URL.
#[derive(Clone, Default)]
pub struct MockExtractor {
    by_url: HashMap<String, Vec<ExtractedCandidate>>,
    calls: Arc<AtomicUsize>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_url(mut self, url: &str, candidates: Vec<ExtractedCandidate>) -> Self {
        self.by_url.insert(url.to_string(), candidates);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateExtractor for MockExtractor {
    async fn extract_leads(&self, input: &ExtractionInput) -> Result<ExtractionOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let candidates = self
            .by_url
            .get(&input.source_url)
            .cloned()
            .unwrap_or_default();
        Ok(ExtractionOutput { candidates })
    }
}

#[derive(Clone, Default)]
pub struct MockPredictor {
    emails: Vec<String>,
    fail: bool,
}

impl MockPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returning(mut self, emails: Vec<String>) -> Self {
        self.emails = emails;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl EmailPredictor for MockPredictor {
    async fn predict_emails(
        &self,
        _full_name: &str,
        _company: &str,
        _domain: &str,
    ) -> Result<Vec<String>> {
        if self.fail {
            return Err(LeadflowError::Llm("predictor unavailable".into()));
        }
        Ok(self.emails.clone())
    }
}

/// Drafts a fixed email carrying the assigned tone.
#[derive(Clone, Default)]
pub struct MockDrafter {
    failing_keys: HashSet<String>,
}

impl MockDrafter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, person_key: &str) -> Self {
        self.failing_keys.insert(person_key.to_string());
        self
    }
}

#[async_trait]
impl OutreachDrafter for MockDrafter {
    async fn draft_email(&self, lead: &ScoredLead, tone: &Tone) -> Result<GeneratedEmail> {
        if self.failing_keys.contains(&lead.person_key) {
            return Err(LeadflowError::Llm("draft failed".into()));
        }
        Ok(GeneratedEmail {
            subject: format!("Congrats, {}", lead.candidate.full_name),
            body_html: "<p>Hello</p>".into(),
            body_text: "Hello".into(),
            tone: tone.clone(),
        })
    }
}
