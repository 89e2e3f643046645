//! Pattern-based email address prediction.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use leadflow_shared::Result;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::client::LlmClient;

/// At most this many guesses are returned per person.
pub const MAX_PREDICTIONS: usize = 3;

const SYSTEM_PROMPT: &str = "You predict likely corporate email addresses. \
Given a person's name, company and email domain, reply with a JSON object \
{\"emails\": [...]} holding the 2-3 most likely addresses on that domain, most \
likely first. Use common conventions such as first.last, firstlast, flast and \
first_last. Never invent a different domain.";

/// Guesses likely addresses for a person at a company domain.
#[async_trait]
pub trait EmailPredictor: Send + Sync {
    async fn predict_emails(
        &self,
        full_name: &str,
        company: &str,
        domain: &str,
    ) -> Result<Vec<String>>;
}

pub struct LlmEmailPredictor {
    client: Arc<LlmClient>,
}

impl LlmEmailPredictor {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

#[derive(Debug, Deserialize)]
struct PredictionReply {
    #[serde(default)]
    emails: Vec<String>,
}

#[async_trait]
impl EmailPredictor for LlmEmailPredictor {
    #[instrument(skip_all, fields(domain = %domain))]
    async fn predict_emails(
        &self,
        full_name: &str,
        company: &str,
        domain: &str,
    ) -> Result<Vec<String>> {
        let prompt = format!("Name: {full_name}\nCompany: {company}\nDomain: {domain}");
        let reply: PredictionReply = self.client.complete_json(SYSTEM_PROMPT, &prompt).await?;

        let emails = filter_predictions(reply.emails, domain);
        debug!(count = emails.len(), "emails predicted");
        Ok(emails)
    }
}

/// Keep syntactically valid, lowercased addresses on `domain`, deduped, capped.
pub fn filter_predictions(emails: Vec<String>, domain: &str) -> Vec<String> {
    let suffix = format!("@{}", domain.trim().to_lowercase());
    let mut seen = HashSet::new();

    emails
        .into_iter()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| is_valid_email(e) && e.ends_with(&suffix))
        .filter(|e| seen.insert(e.clone()))
        .take(MAX_PREDICTIONS)
        .collect()
}

/// Conservative address syntax check.
pub fn is_valid_email(email: &str) -> bool {
    static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}$").expect("valid regex")
    });
    EMAIL.is_match(email)
}
