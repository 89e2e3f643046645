//! Colleague discovery from the organizations of top leads.
//!
//! A strong lead's company team page usually names their peers. Each seed
//! costs one search, one fetch, and one extraction instead of a full search
//! cycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use leadflow_fetcher::PageFetcher;
use leadflow_llm::{CandidateExtractor, ExtractionInput};
use leadflow_search::SearchClient;
use leadflow_shared::{LeadflowError, Result, ScoredLead, Tier};
use tracing::{debug, info, instrument, warn};

use crate::scoring::LeadScorer;

/// Tier B leads seed only at or above this score.
const SEED_MIN_B_SCORE: f32 = 70.0;

const TEAM_PAGE_MARKERS: &[&str] = &[
    "/team",
    "/leadership",
    "/about",
    "/people",
    "/our-team",
    "/management",
    "/staff",
];

pub fn is_seed(lead: &ScoredLead) -> bool {
    match lead.tier {
        Tier::A => true,
        Tier::B => lead.score >= SEED_MIN_B_SCORE,
        _ => false,
    }
}

pub fn is_team_page(url: &str) -> bool {
    let url = url.to_lowercase();
    TEAM_PAGE_MARKERS.iter().any(|m| url.contains(m))
}

/// Case-insensitive substring match in either direction.
pub fn company_overlaps(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim().to_lowercase(), b.trim().to_lowercase());
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(&b) || b.contains(&a)
}

/// Outcome of one colleague pass.
#[derive(Debug, Clone, Default)]
pub struct ColleagueReport {
    /// New leads, not yet capped to the run's headroom.
    pub colleagues: Vec<ScoredLead>,
    pub seeds: usize,
    /// `(seed person_key, message)` for each seed that failed.
    pub failures: Vec<(String, String)>,
}

pub struct ColleagueEnricher {
    search: Arc<dyn SearchClient>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn CandidateExtractor>,
    scorer: Arc<dyn LeadScorer>,
    results_per_query: usize,
    delay: Duration,
}

impl ColleagueEnricher {
    pub fn new(
        search: Arc<dyn SearchClient>,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn CandidateExtractor>,
        scorer: Arc<dyn LeadScorer>,
        results_per_query: usize,
        delay: Duration,
    ) -> Self {
        Self {
            search,
            fetcher,
            extractor,
            scorer,
            results_per_query,
            delay,
        }
    }

    /// Seeds are the best `seed_count` tier-A or strong tier-B leads that
    /// name a company, best tier first.
    pub fn pick_seeds<'a>(selected: &'a [ScoredLead], seed_count: usize) -> Vec<&'a ScoredLead> {
        let mut seeds: Vec<&ScoredLead> = selected
            .iter()
            .filter(|l| is_seed(l) && l.candidate.company.is_some())
            .collect();
        seeds.sort_by(|a, b| {
            a.tier
                .cmp(&b.tier)
                .then_with(|| b.score.total_cmp(&a.score))
        });
        seeds.truncate(seed_count);
        seeds
    }

    /// Colleagues already in `selected` or in `excluded` are never returned.
    #[instrument(skip_all, fields(selected = selected.len(), seed_count = seed_count, excluded = excluded.len()))]
    pub async fn find_colleagues(
        &self,
        selected: &[ScoredLead],
        seed_count: usize,
        excluded: &HashSet<String>,
    ) -> ColleagueReport {
        let seeds = Self::pick_seeds(selected, seed_count);
        let mut report = ColleagueReport {
            seeds: seeds.len(),
            ..Default::default()
        };
        let mut known: HashSet<String> = selected
            .iter()
            .map(|l| l.person_key.clone())
            .chain(excluded.iter().cloned())
            .collect();

        for (i, seed) in seeds.into_iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match self.colleagues_of(seed).await {
                Ok(found) => {
                    for colleague in found {
                        if known.insert(colleague.person_key.clone()) {
                            debug!(seed = %seed.person_key, colleague = %colleague.person_key, "colleague found");
                            report.colleagues.push(colleague);
                        }
                    }
                }
                Err(e) => {
                    warn!(seed = %seed.person_key, error = %e, "colleague lookup failed");
                    report.failures.push((seed.person_key.clone(), e.to_string()));
                }
            }
        }

        info!(
            seeds = report.seeds,
            colleagues = report.colleagues.len(),
            failures = report.failures.len(),
            "colleague enrichment complete"
        );
        report
    }

    async fn colleagues_of(&self, seed: &ScoredLead) -> Result<Vec<ScoredLead>> {
        let Some(company) = seed.candidate.company.as_deref() else {
            return Ok(Vec::new());
        };

        let query = format!("\"{company}\" leadership team");
        let results = self
            .search
            .search(&query, 0, self.results_per_query)
            .await?;
        let Some(team_url) = results.iter().map(|r| r.url.as_str()).find(|u| is_team_page(u)) else {
            debug!(%company, "no team page found");
            return Ok(Vec::new());
        };

        let page = self.fetcher.fetch_page(team_url).await;
        if let Some(error) = &page.error {
            return Err(LeadflowError::Network(format!("{team_url}: {error}")));
        }

        let input = ExtractionInput {
            page_title: page.title.clone(),
            source_url: page.url.clone(),
            extracted_text: page.text.clone(),
        };
        let output = self.extractor.extract_leads(&input).await?;

        let colleagues = output
            .candidates
            .into_iter()
            .filter(|c| {
                c.company
                    .as_deref()
                    .is_some_and(|other| company_overlaps(company, other))
            })
            .map(|mut c| {
                c.source_url.get_or_insert_with(|| page.url.clone());
                self.scorer.score_lead(&c, page.published_at)
            })
            .filter(|lead| lead.person_key != seed.person_key && lead.tier.is_similar_rank(&seed.tier))
            .collect();
        Ok(colleagues)
    }
}
