//! Personalized outreach drafting with rotating tones.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use leadflow_shared::{GeneratedEmail, LeadflowError, Result, ScoredLead, Tone};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::client::LlmClient;

/// Tone used when no tones are configured.
pub const DEFAULT_TONE: &str = "congratulatory";

const SYSTEM_PROMPT: &str = "You write short, personal B2B outreach emails. \
Reference the specific news about the person, never invent facts, keep the \
body under 120 words and end with a low-pressure question. Reply with a JSON \
object {\"subject\": ..., \"body_html\": ..., \"body_text\": ...}.";

/// Tone for position `index` in a batch, cycling round-robin.
pub fn tone_for_index(tones: &[Tone], index: usize) -> Tone {
    if tones.is_empty() {
        return Tone::from(DEFAULT_TONE);
    }
    tones[index % tones.len()].clone()
}

/// Generates outreach drafts.
#[async_trait]
pub trait OutreachDrafter: Send + Sync {
    async fn draft_email(&self, lead: &ScoredLead, tone: &Tone) -> Result<GeneratedEmail>;

    /// Draft every lead in order, assigning `tones[i % len]`. A failed draft
    /// maps to `None` and never stops the batch.
    async fn generate_emails_batch(
        &self,
        leads: &[ScoredLead],
        tones: &[Tone],
        delay: Duration,
    ) -> HashMap<String, Option<GeneratedEmail>> {
        let mut drafts = HashMap::with_capacity(leads.len());

        for (i, lead) in leads.iter().enumerate() {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let tone = tone_for_index(tones, i);
            let draft = match self.draft_email(lead, &tone).await {
                Ok(email) => Some(email),
                Err(e) => {
                    warn!(person_key = %lead.person_key, error = %e, "draft failed");
                    None
                }
            };
            drafts.insert(lead.person_key.clone(), draft);
        }

        drafts
    }
}

// ---------------------------------------------------------------------------
// LLM implementation
// ---------------------------------------------------------------------------

pub struct LlmOutreachDrafter {
    client: Arc<LlmClient>,
}

impl LlmOutreachDrafter {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct DraftReply {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body_html: String,
    #[serde(default)]
    body_text: Option<String>,
}

fn tone_guidance(tone: &Tone) -> &'static str {
    match tone.as_str() {
        "congratulatory" => "Open by congratulating them on the news.",
        "value_first" => "Lead with one concrete idea that could help them in the new situation.",
        "peer_credibility" => "Mention how peers in similar roles approached the same moment.",
        "direct_curious" => "Be brief and direct, and ask one curious question about their plans.",
        _ => "Keep a warm, professional tone.",
    }
}

fn lead_brief(lead: &ScoredLead) -> String {
    let c = &lead.candidate;
    let mut brief = format!("Name: {}\n", c.full_name);
    if let Some(title) = &c.title {
        brief.push_str(&format!("Title: {title}\n"));
    }
    if let Some(company) = &c.company {
        brief.push_str(&format!("Company: {company}\n"));
    }
    if let Some(geo) = &c.geo_signal {
        brief.push_str(&format!("Location: {geo}\n"));
    }
    brief.push_str(&format!("Trigger: {:?}\n", c.trigger_type));
    if !c.rationale_short.is_empty() {
        brief.push_str(&format!("Why now: {}\n", c.rationale_short));
    }
    for quote in c.evidence.iter().take(3) {
        brief.push_str(&format!("Evidence: {quote}\n"));
    }
    brief
}

#[async_trait]
impl OutreachDrafter for LlmOutreachDrafter {
    #[instrument(skip_all, fields(person_key = %lead.person_key, tone = %tone))]
    async fn draft_email(&self, lead: &ScoredLead, tone: &Tone) -> Result<GeneratedEmail> {
        let prompt = format!("{}\nTone: {}\n\n{}", tone_guidance(tone), tone, lead_brief(lead));
        let reply: DraftReply = self.client.complete_json(SYSTEM_PROMPT, &prompt).await?;

        if reply.subject.trim().is_empty() || reply.body_html.trim().is_empty() {
            return Err(LeadflowError::Llm("draft is missing subject or body".into()));
        }

        let body_text = reply
            .body_text
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| html_to_plain(&reply.body_html));

        debug!(subject_len = reply.subject.len(), "draft generated");
        Ok(GeneratedEmail {
            subject: reply.subject.trim().to_string(),
            body_html: reply.body_html,
            body_text,
            tone: tone.clone(),
        })
    }
}

/// Render simple email HTML as plain text.
pub fn html_to_plain(html: &str) -> String {
    static BREAKS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>|</li\s*>").expect("valid regex"));
    static PARAGRAPHS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)</p\s*>|</div\s*>").expect("valid regex"));
    static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));
    static BLANKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let text = PARAGRAPHS.replace_all(html, "\n\n");
    let text = BREAKS.replace_all(&text, "\n");
    let text = TAGS.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#39;", "'")
        .replace("&quot;", "\"");
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    BLANKS.replace_all(lines.join("\n").trim(), "\n\n").into_owned()
}
