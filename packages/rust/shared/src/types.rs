//! Core domain types for Leadflow runs, pages, and leads.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// How a run's rotation was planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    /// Deterministic day-of-year rotation.
    Daily,
    /// Uniformly sampled rotation for an on-demand run.
    Manual,
}

/// An outreach tone identifier (e.g. `congratulatory`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tone(pub String);

impl Tone {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tone {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Search and selection parameters for one run. Snapshotted into the run
/// record and never mutated while the run executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Geography display name (e.g. `Houston`).
    pub geo: String,
    /// Alternative spellings used when building queries.
    pub geo_aliases: Vec<String>,
    /// Trigger category the queries focus on (e.g. `career_move`).
    pub trigger_focus: String,
    /// Optional industry focus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry_focus: Option<String>,
    /// Maximum number of leads selected per run.
    pub daily_lead_target: usize,
    /// Desired size of the scored candidate pool.
    pub candidate_target: usize,
    /// Only search results newer than this many days.
    pub recency_days: u32,
    /// Days a previously selected lead stays ineligible. `0` disables cooldown.
    pub cooldown_days: u32,
    /// Tones cycled round-robin across drafts.
    pub tones: Vec<Tone>,
    /// How the rotation was planned.
    pub mode: RotationMode,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Search,
    Fetch,
    Extract,
    Score,
    ContactEnrichment,
    ColleagueEnrichment,
    Draft,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Fetch => "fetch",
            Self::Extract => "extract",
            Self::Score => "score",
            Self::ContactEnrichment => "contact_enrichment",
            Self::ColleagueEnrichment => "colleague_enrichment",
            Self::Draft => "draft",
            Self::Persist => "persist",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item-level failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    /// The URL, query, or person key the failure belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    pub message: String,
}

/// Elapsed milliseconds per stage (keyed by [`Stage::as_str`]) plus the run total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    #[serde(default)]
    pub stages: BTreeMap<String, u64>,
    #[serde(default)]
    pub total_ms: u64,
}

/// Aggregated counters, failures, and timings for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub queries_executed: usize,
    pub search_results_found: usize,
    pub pages_fetched: usize,
    pub candidates_extracted: usize,
    pub leads_scored: usize,
    pub leads_selected: usize,
    pub drafts_generated: usize,
    #[serde(default)]
    pub errors: Vec<StageError>,
    #[serde(default)]
    pub timings: StageTimings,
}

impl RunStats {
    /// Record an item-level failure for `stage`.
    pub fn record_error(
        &mut self,
        stage: Stage,
        item: Option<&str>,
        message: impl Into<String>,
    ) {
        self.errors.push(StageError {
            stage,
            item: item.map(str::to_string),
            message: message.into(),
        });
    }

    /// Record the elapsed time of a completed stage.
    pub fn record_timing(&mut self, stage: Stage, elapsed: Duration) {
        self.timings
            .stages
            .insert(stage.as_str().to_string(), elapsed.as_millis() as u64);
    }

    /// Number of recorded failures for one stage.
    pub fn error_count(&self, stage: Stage) -> usize {
        self.errors.iter().filter(|e| e.stage == stage).count()
    }
}

/// One execution of the pipeline for a calendar date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    /// At most one run exists per date.
    pub run_date: NaiveDate,
    pub config: RunConfig,
    pub status: RunStatus,
    pub stats: RunStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Search results and pages
// ---------------------------------------------------------------------------

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub query: String,
    pub url: String,
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// A retrieved page with its extracted text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPage {
    /// The URL that was requested.
    pub url: String,
    /// The URL after redirects.
    pub final_url: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Best-guess publish date from page metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Normalized main-content text.
    pub text: String,
    /// SHA-256 of `text`.
    pub content_hash: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FetchedPage {
    /// A page record for a URL whose fetch failed.
    pub fn failed(url: &str, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            final_url: url.to_string(),
            domain: String::new(),
            status_code: None,
            title: None,
            published_at: None,
            text: String::new(),
            content_hash: String::new(),
            fetched_at: Utc::now(),
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Candidates and leads
// ---------------------------------------------------------------------------

/// What happened to the person that makes them worth contacting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    CareerMove,
    Promotion,
    NewHire,
    Funding,
    Expansion,
    Acquisition,
    Award,
    Launch,
    #[serde(other)]
    Other,
}

/// Rough role classification of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadCategory {
    Executive,
    Founder,
    DecisionMaker,
    Influencer,
    Practitioner,
    #[serde(other)]
    Other,
}

/// The channel a contact path points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    /// A personal address found on a page or by secondary search.
    Email,
    /// A shared mailbox (info@, contact@).
    GenericEmail,
    /// A pattern-based guess; lowest trust.
    PredictedEmail,
    Phone,
    BioUrl,
    Linkedin,
    CompanyContactUrl,
    CompanyWebsite,
    #[serde(other)]
    Other,
}

impl ContactKind {
    /// Channels that reach the person directly.
    pub fn is_direct_channel(&self) -> bool {
        matches!(self, Self::Email | Self::Phone)
    }

    /// Relative trust, higher is better.
    pub fn trust(&self) -> u8 {
        match self {
            Self::Email | Self::Phone => 4,
            Self::Linkedin | Self::BioUrl => 3,
            Self::GenericEmail | Self::CompanyContactUrl => 2,
            Self::PredictedEmail | Self::CompanyWebsite => 1,
            Self::Other => 0,
        }
    }
}

/// One channel for reaching a lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPath {
    pub kind: ContactKind,
    pub value: String,
    /// True when the value appeared on the source page itself.
    #[serde(default)]
    pub found_on_page: bool,
}

impl ContactPath {
    pub fn new(kind: ContactKind, value: impl Into<String>, found_on_page: bool) -> Self {
        Self {
            kind,
            value: value.into(),
            found_on_page,
        }
    }
}

/// A person pulled out of a page by the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCandidate {
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_signal: Option<String>,
    pub trigger_type: TriggerType,
    pub category: LeadCategory,
    #[serde(default)]
    pub rationale_short: String,
    #[serde(default)]
    pub rationale_detailed: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub contact_paths: Vec<ContactPath>,
    /// Extractor confidence in [0, 1].
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

impl ExtractedCandidate {
    /// Whether the candidate already has a way to reach the person directly.
    pub fn has_direct_contact(&self) -> bool {
        self.contact_paths.iter().any(|p| p.kind.is_direct_channel())
    }

    /// Add a contact path unless an equal value (case-insensitive) is present.
    /// Returns true if the path was added.
    pub fn add_contact_path(&mut self, path: ContactPath) -> bool {
        let exists = self
            .contact_paths
            .iter()
            .any(|p| p.value.eq_ignore_ascii_case(&path.value));
        if exists {
            return false;
        }
        self.contact_paths.push(path);
        true
    }
}

/// Quality bucket, `A` best. `Ord` follows goodness: `A < B < C < D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    A,
    B,
    C,
    D,
}

impl Tier {
    /// Position in the tier order, 0 for `A`.
    pub fn rank(&self) -> u8 {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::D => 3,
        }
    }

    /// Equal or adjacent tiers count as similar rank.
    pub fn is_similar_rank(&self, other: &Tier) -> bool {
        self.rank().abs_diff(other.rank()) <= 1
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// A candidate with its score, tier, and identity key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLead {
    #[serde(flatten)]
    pub candidate: ExtractedCandidate,
    pub score: f32,
    pub tier: Tier,
    pub person_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// A drafted outreach email for one lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedEmail {
    pub subject: String,
    pub body_html: String,
    pub body_text: String,
    pub tone: Tone,
}
