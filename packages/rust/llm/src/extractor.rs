//! Page text → structured lead candidates.

use std::sync::Arc;

use async_trait::async_trait;
use leadflow_shared::{
    ContactKind, ContactPath, ExtractedCandidate, LeadCategory, Result, TriggerType,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::client::{LlmClient, truncate};

/// Page text sent to the model is cut to this many bytes.
const MAX_TEXT_BYTES: usize = 12_000;

const SYSTEM_PROMPT: &str = "You extract sales prospects from news articles. \
Reply with a single JSON object: {\"candidates\": [...]}. Each candidate has \
full_name, title, company, geo_signal, trigger_type (career_move, promotion, \
new_hire, funding, expansion, acquisition, award, launch, other), category \
(executive, founder, decision_maker, influencer, practitioner, other), \
rationale_short, rationale_detailed, evidence (verbatim quotes), \
contact_paths ([{kind, value}] with kind one of email, generic_email, phone, \
bio_url, linkedin, company_contact_url, company_website) and confidence (0-1). \
Only include people explicitly named in the text. Return an empty list if none.";

/// What the extractor sees of a page.
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub page_title: Option<String>,
    pub source_url: String,
    pub extracted_text: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionOutput {
    pub candidates: Vec<ExtractedCandidate>,
}

/// Turns page text into zero or more candidates.
#[async_trait]
pub trait CandidateExtractor: Send + Sync {
    async fn extract_leads(&self, input: &ExtractionInput) -> Result<ExtractionOutput>;
}

// ---------------------------------------------------------------------------
// LLM implementation
// ---------------------------------------------------------------------------

pub struct LlmCandidateExtractor {
    client: Arc<LlmClient>,
}

impl LlmCandidateExtractor {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CandidateExtractor for LlmCandidateExtractor {
    #[instrument(skip_all, fields(url = %input.source_url))]
    async fn extract_leads(&self, input: &ExtractionInput) -> Result<ExtractionOutput> {
        let prompt = format!(
            "Title: {}\nURL: {}\n\n{}",
            input.page_title.as_deref().unwrap_or("(untitled)"),
            input.source_url,
            truncate(&input.extracted_text, MAX_TEXT_BYTES),
        );

        let reply: RawExtraction = self.client.complete_json(SYSTEM_PROMPT, &prompt).await?;
        let candidates: Vec<ExtractedCandidate> = reply
            .candidates
            .into_iter()
            .filter_map(|raw| raw.into_candidate(&input.source_url))
            .collect();

        debug!(count = candidates.len(), "candidates extracted");
        Ok(ExtractionOutput { candidates })
    }
}

// ---------------------------------------------------------------------------
// Lenient reply decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    candidates: Vec<RawCandidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCandidate {
    full_name: Option<String>,
    title: Option<String>,
    company: Option<String>,
    geo_signal: Option<String>,
    trigger_type: Option<String>,
    category: Option<String>,
    rationale_short: Option<String>,
    rationale_detailed: Option<String>,
    evidence: Vec<String>,
    contact_paths: Vec<RawContact>,
    confidence: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawContact {
    kind: String,
    value: String,
}

impl RawCandidate {
    /// Nameless candidates are dropped.
    fn into_candidate(self, source_url: &str) -> Option<ExtractedCandidate> {
        let full_name = non_empty(self.full_name)?;

        let mut candidate = ExtractedCandidate {
            full_name,
            title: non_empty(self.title),
            company: non_empty(self.company),
            geo_signal: non_empty(self.geo_signal),
            trigger_type: parse_enum(self.trigger_type, TriggerType::Other),
            category: parse_enum(self.category, LeadCategory::Other),
            rationale_short: self.rationale_short.unwrap_or_default(),
            rationale_detailed: self.rationale_detailed.unwrap_or_default(),
            evidence: self.evidence,
            contact_paths: Vec::new(),
            confidence: self.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            source_url: Some(source_url.to_string()),
        };

        for contact in self.contact_paths {
            let value = contact.value.trim();
            if value.is_empty() {
                continue;
            }
            let kind = parse_enum(Some(contact.kind), ContactKind::Other);
            candidate.add_contact_path(ContactPath::new(kind, value, true));
        }

        Some(candidate)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
}

/// Decode a snake_case enum, mapping unknown or missing values to `fallback`.
fn parse_enum<T: DeserializeOwned>(value: Option<String>, fallback: T) -> T {
    value
        .map(|v| v.trim().to_lowercase().replace([' ', '-'], "_"))
        .and_then(|v| serde_json::from_value(serde_json::Value::String(v)).ok())
        .unwrap_or(fallback)
}
