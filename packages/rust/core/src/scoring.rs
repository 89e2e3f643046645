//! Lead scoring, identity keys, and cooldown-aware selection.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use leadflow_shared::{ExtractedCandidate, LeadCategory, Result, ScoredLead, Tier, TriggerType};
use leadflow_storage::LeadHistory;
use tracing::{debug, info, instrument};

/// Minimum scores for each tier.
const TIER_A_MIN: f32 = 80.0;
const TIER_B_MIN: f32 = 60.0;
const TIER_C_MIN: f32 = 40.0;

/// Used in person keys when neither company nor geography is known.
const UNKNOWN_ORG: &str = "unknown";

/// Scores candidates and selects the day's leads.
#[async_trait]
pub trait LeadScorer: Send + Sync {
    /// Pure function of the candidate and its page's publish date.
    fn score_lead(
        &self,
        candidate: &ExtractedCandidate,
        published_at: Option<DateTime<Utc>>,
    ) -> ScoredLead;

    /// Best `daily_target` leads by score, deduplicated by person key and
    /// excluding keys selected within the last `cooldown_days` (0 disables).
    async fn select_top_leads(
        &self,
        leads: Vec<ScoredLead>,
        daily_target: usize,
        cooldown_days: u32,
    ) -> Result<Vec<ScoredLead>>;

    /// Person keys selected within the last `cooldown_days`; empty when 0.
    async fn cooled_keys(&self, cooldown_days: u32) -> Result<HashSet<String>>;

    fn generate_person_key(&self, candidate: &ExtractedCandidate) -> String {
        person_key(candidate)
    }
}

/// `slug(name)::slug(company or geo)`.
pub fn person_key(candidate: &ExtractedCandidate) -> String {
    let org = candidate
        .company
        .as_deref()
        .or(candidate.geo_signal.as_deref())
        .map(slugify)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_ORG.to_string());
    format!("{}::{}", slugify(&candidate.full_name), org)
}

/// Lowercase alphanumeric words joined by `-`.
pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

pub fn tier_for_score(score: f32) -> Tier {
    if score >= TIER_A_MIN {
        Tier::A
    } else if score >= TIER_B_MIN {
        Tier::B
    } else if score >= TIER_C_MIN {
        Tier::C
    } else {
        Tier::D
    }
}

/// Descending score, ties broken by person key so ordering is stable.
pub fn sort_by_score(leads: &mut [ScoredLead]) {
    leads.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.person_key.cmp(&b.person_key))
    });
}

// ---------------------------------------------------------------------------
// HeuristicScorer
// ---------------------------------------------------------------------------

/// Weighted sum of extractor confidence, trigger strength, recency,
/// seniority, and contact-path strength, on a 0-100 scale.
pub struct HeuristicScorer {
    history: Arc<dyn LeadHistory>,
    reference_date: Option<NaiveDate>,
}

impl HeuristicScorer {
    pub fn new(history: Arc<dyn LeadHistory>) -> Self {
        Self {
            history,
            reference_date: None,
        }
    }

    /// Score recency and cooldown relative to `date` instead of today.
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    fn today(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }

    fn recency_points(&self, published_at: Option<DateTime<Utc>>) -> f32 {
        let Some(published) = published_at else {
            return 6.0;
        };
        let age_days = (self.today() - published.date_naive()).num_days();
        match age_days {
            i64::MIN..=3 => 15.0,
            4..=7 => 12.0,
            8..=14 => 8.0,
            15..=30 => 4.0,
            _ => 0.0,
        }
    }
}

fn trigger_points(trigger: TriggerType) -> f32 {
    match trigger {
        TriggerType::CareerMove => 20.0,
        TriggerType::Promotion => 18.0,
        TriggerType::NewHire => 15.0,
        TriggerType::Funding => 14.0,
        TriggerType::Expansion | TriggerType::Acquisition => 12.0,
        TriggerType::Award | TriggerType::Launch => 8.0,
        TriggerType::Other => 4.0,
    }
}

fn seniority_points(candidate: &ExtractedCandidate) -> f32 {
    const C_LEVEL: &[&str] = &[
        "chief", "ceo", "cfo", "coo", "cto", "cmo", "cio", "president", "founder", "owner",
        "partner",
    ];
    const SENIOR: &[&str] = &["vp", "vice president", "head of", "director", "general manager"];
    const MID: &[&str] = &["manager", "lead", "principal"];

    let from_title = candidate.title.as_deref().map_or(0.0, |title| {
        let title = title.to_lowercase();
        let words: Vec<&str> = title
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |terms: &[&str]| {
            terms.iter().any(|t| {
                if t.contains(' ') {
                    title.contains(t)
                } else {
                    words.contains(t)
                }
            })
        };
        if has(C_LEVEL) {
            20.0
        } else if has(SENIOR) {
            15.0
        } else if has(MID) {
            8.0
        } else {
            3.0
        }
    });

    let from_category = match candidate.category {
        LeadCategory::Executive | LeadCategory::Founder => 15.0,
        LeadCategory::DecisionMaker => 10.0,
        LeadCategory::Influencer => 6.0,
        LeadCategory::Practitioner | LeadCategory::Other => 3.0,
    };

    f32::max(from_title, from_category)
}

fn contact_points(candidate: &ExtractedCandidate) -> f32 {
    let best = candidate
        .contact_paths
        .iter()
        .map(|p| p.kind.trust())
        .max()
        .unwrap_or(0);
    f32::from(best) * 2.5
}

#[async_trait]
impl LeadScorer for HeuristicScorer {
    fn score_lead(
        &self,
        candidate: &ExtractedCandidate,
        published_at: Option<DateTime<Utc>>,
    ) -> ScoredLead {
        let raw = candidate.confidence.clamp(0.0, 1.0) * 35.0
            + trigger_points(candidate.trigger_type)
            + self.recency_points(published_at)
            + seniority_points(candidate)
            + contact_points(candidate);
        let score = (raw.clamp(0.0, 100.0) * 10.0).round() / 10.0;

        ScoredLead {
            candidate: candidate.clone(),
            score,
            tier: tier_for_score(score),
            person_key: person_key(candidate),
            published_at,
        }
    }

    #[instrument(skip_all, fields(candidates = leads.len(), daily_target = daily_target, cooldown_days = cooldown_days))]
    async fn select_top_leads(
        &self,
        mut leads: Vec<ScoredLead>,
        daily_target: usize,
        cooldown_days: u32,
    ) -> Result<Vec<ScoredLead>> {
        sort_by_score(&mut leads);

        let cooled = self.cooled_keys(cooldown_days).await?;

        let mut seen = HashSet::new();
        let mut selected = Vec::with_capacity(daily_target);
        let mut skipped_cooldown = 0usize;

        for lead in leads {
            if selected.len() >= daily_target {
                break;
            }
            if cooled.contains(&lead.person_key) {
                debug!(person_key = %lead.person_key, "in cooldown, skipping");
                skipped_cooldown += 1;
                continue;
            }
            if !seen.insert(lead.person_key.clone()) {
                continue;
            }
            selected.push(lead);
        }

        info!(selected = selected.len(), skipped_cooldown, "leads selected");
        Ok(selected)
    }

    async fn cooled_keys(&self, cooldown_days: u32) -> Result<HashSet<String>> {
        if cooldown_days == 0 {
            return Ok(HashSet::new());
        }
        let today = self.today();
        let since = today - chrono::Duration::days(i64::from(cooldown_days));
        self.history.recent_person_keys(since, today).await
    }
}
