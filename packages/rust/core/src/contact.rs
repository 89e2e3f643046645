//! Contact enrichment for selected leads.
//!
//! For each lead without a direct channel, a secondary search looks for a
//! personal address and profile pages. If no address passes the legitimacy
//! rules, the predictor guesses addresses on the company's domain.
//! Enrichment only ever adds contact paths.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use leadflow_llm::{EmailPredictor, MAX_PREDICTIONS, is_valid_email};
use leadflow_search::SearchClient;
use leadflow_shared::{ContactKind, ContactPath, ExtractedCandidate, ScoredLead};
use regex::Regex;
use tracing::{debug, info, instrument, warn};
use url::Url;

// ---------------------------------------------------------------------------
// Legitimacy rules
// ---------------------------------------------------------------------------

/// Local-part and mailbox markers of shared inboxes.
const GENERIC_MAILBOX_MARKERS: &[&str] = &[
    "noreply", "no-reply", "info@", "contact@", "admin@", "support@", "hello@", "sales@",
];

/// URL fragments of bio and team pages.
const PROFILE_PATH_MARKERS: &[&str] = &[
    "/team/",
    "/leadership/",
    "/about-us/",
    "/our-team/",
    "/people/",
    "/bio/",
    "/staff/",
    "linkedin.com/in/",
];

/// Legal suffixes dropped when guessing a domain from a company name.
const COMPANY_SUFFIXES: &[&str] = &[
    "inc", "llc", "llp", "ltd", "corp", "corporation", "co", "company", "plc", "lp",
];

/// Shortest name or company token that counts as a match.
const MIN_TOKEN_LEN: usize = 3;

/// A named check an address must pass to be accepted.
pub type EmailRule = fn(&str, &ExtractedCandidate) -> bool;

/// Applied in order. The first failing rule names the rejection.
pub const EMAIL_RULES: &[(&str, EmailRule)] = &[
    ("valid_syntax", rule_valid_syntax),
    ("not_generic_mailbox", rule_not_generic_mailbox),
    ("name_or_company_token", contains_name_or_company_token),
];

pub fn is_generic_mailbox(email: &str) -> bool {
    let email = email.to_lowercase();
    GENERIC_MAILBOX_MARKERS.iter().any(|m| email.contains(m))
}

/// The local part contains a name or company token of at least three chars.
pub fn contains_name_or_company_token(email: &str, candidate: &ExtractedCandidate) -> bool {
    let email = email.to_lowercase();
    let Some((local, _)) = email.split_once('@') else {
        return false;
    };

    let name_tokens = tokens(&candidate.full_name);
    let company_tokens = candidate.company.as_deref().map(tokens).unwrap_or_default();

    name_tokens
        .iter()
        .chain(company_tokens.iter())
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .any(|t| local.contains(t.as_str()))
}

pub fn is_known_profile_path(url: &str) -> bool {
    let url = url.to_lowercase();
    PROFILE_PATH_MARKERS.iter().any(|m| url.contains(m))
}

fn rule_valid_syntax(email: &str, _: &ExtractedCandidate) -> bool {
    is_valid_email(email)
}

fn rule_not_generic_mailbox(email: &str, _: &ExtractedCandidate) -> bool {
    !is_generic_mailbox(email)
}

/// Run [`EMAIL_RULES`]; `Err` carries the first failing rule's name.
pub fn check_email(email: &str, candidate: &ExtractedCandidate) -> Result<(), &'static str> {
    for &(name, rule) in EMAIL_RULES {
        if !rule(email, candidate) {
            return Err(name);
        }
    }
    Ok(())
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Every address-shaped substring of `text`, lowercased.
pub fn find_emails(text: &str) -> Vec<String> {
    static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("valid regex")
    });
    EMAIL
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches('.').to_lowercase())
        .collect()
}

// ---------------------------------------------------------------------------
// Prediction fallback
// ---------------------------------------------------------------------------

/// Domain from a company-website path, else `slug(company).com`.
pub fn derive_domain(candidate: &ExtractedCandidate) -> Option<String> {
    let from_website = candidate
        .contact_paths
        .iter()
        .filter(|p| p.kind == ContactKind::CompanyWebsite)
        .find_map(|p| host_of(&p.value));

    from_website.or_else(|| candidate.company.as_deref().and_then(company_domain))
}

fn host_of(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    Url::parse(&with_scheme)
        .ok()?
        .host_str()
        .map(|h| h.trim_start_matches("www.").to_lowercase())
        .filter(|h| h.contains('.'))
}

/// `Acme Energy, Inc.` → `acmeenergy.com`.
pub fn company_domain(company: &str) -> Option<String> {
    let words: Vec<String> = tokens(company)
        .into_iter()
        .filter(|t| !COMPANY_SUFFIXES.contains(&t.as_str()))
        .collect();
    if words.is_empty() {
        return None;
    }
    Some(format!("{}.com", words.concat()))
}

/// Deterministic guesses in common corporate formats.
pub fn pattern_guesses(full_name: &str, domain: &str) -> Vec<String> {
    let parts: Vec<String> = full_name
        .split_whitespace()
        .map(|p| {
            p.chars()
                .filter(|c| c.is_ascii_alphabetic())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|p| !p.is_empty())
        .collect();

    let (Some(first), Some(last)) = (parts.first(), parts.last()) else {
        return Vec::new();
    };
    if parts.len() == 1 {
        return vec![format!("{first}@{domain}")];
    }

    let initial = &first[..1];
    [
        format!("{first}.{last}@{domain}"),
        format!("{first}{last}@{domain}"),
        format!("{initial}{last}@{domain}"),
        format!("{first}_{last}@{domain}"),
    ]
    .into_iter()
    .take(MAX_PREDICTIONS)
    .collect()
}

// ---------------------------------------------------------------------------
// ContactEnricher
// ---------------------------------------------------------------------------

/// Outcome of one enrichment pass.
#[derive(Debug, Clone, Default)]
pub struct ContactEnrichmentReport {
    /// Leads that gained a discovered address.
    pub discovered: usize,
    /// Leads that gained predicted addresses.
    pub predicted: usize,
    /// Leads skipped because they already had a direct channel.
    pub skipped: usize,
    /// `(person_key, message)` for each failed external call.
    pub failures: Vec<(String, String)>,
}

pub struct ContactEnricher {
    search: Arc<dyn SearchClient>,
    predictor: Arc<dyn EmailPredictor>,
    results_per_query: usize,
    delay: Duration,
}

impl ContactEnricher {
    pub fn new(
        search: Arc<dyn SearchClient>,
        predictor: Arc<dyn EmailPredictor>,
        results_per_query: usize,
        delay: Duration,
    ) -> Self {
        Self {
            search,
            predictor,
            results_per_query,
            delay,
        }
    }

    /// Enrich every lead in place. Never fails; failures land in the report.
    #[instrument(skip_all, fields(leads = leads.len()))]
    pub async fn enrich(&self, leads: &mut [ScoredLead]) -> ContactEnrichmentReport {
        let mut report = ContactEnrichmentReport::default();

        for (i, lead) in leads.iter_mut().enumerate() {
            if lead.candidate.has_direct_contact() {
                report.skipped += 1;
                continue;
            }
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.enrich_one(lead, &mut report).await;
        }

        info!(
            discovered = report.discovered,
            predicted = report.predicted,
            skipped = report.skipped,
            failures = report.failures.len(),
            "contact enrichment complete"
        );
        report
    }

    async fn enrich_one(&self, lead: &mut ScoredLead, report: &mut ContactEnrichmentReport) {
        let key = lead.person_key.clone();

        let found_email = match self.discover(&mut lead.candidate).await {
            Ok(found) => found,
            Err(message) => {
                warn!(person_key = %key, error = %message, "contact search failed");
                report.failures.push((key.clone(), message));
                false
            }
        };
        if found_email {
            report.discovered += 1;
            return;
        }

        if self.predict(lead, report).await {
            report.predicted += 1;
        }
    }

    /// Secondary search. Returns whether an address was accepted.
    async fn discover(&self, candidate: &mut ExtractedCandidate) -> Result<bool, String> {
        let query = match &candidate.company {
            Some(company) => format!("\"{}\" \"{}\" email contact", candidate.full_name, company),
            None => format!("\"{}\" email contact", candidate.full_name),
        };

        let results = self
            .search
            .search(&query, 0, self.results_per_query)
            .await
            .map_err(|e| e.to_string())?;

        let mut accepted = false;
        for result in &results {
            let haystack = format!("{} {}", result.title, result.snippet);
            for email in find_emails(&haystack) {
                match check_email(&email, candidate) {
                    Ok(()) => {
                        accepted |= candidate
                            .add_contact_path(ContactPath::new(ContactKind::Email, email, false));
                    }
                    Err(rule) => debug!(%email, rule, "email rejected"),
                }
            }

            if is_known_profile_path(&result.url) {
                let kind = if result.url.to_lowercase().contains("linkedin.com/in/") {
                    ContactKind::Linkedin
                } else {
                    ContactKind::BioUrl
                };
                candidate.add_contact_path(ContactPath::new(kind, result.url.clone(), false));
            }
        }

        Ok(accepted)
    }

    /// Prediction fallback. Returns whether any address was added.
    async fn predict(&self, lead: &mut ScoredLead, report: &mut ContactEnrichmentReport) -> bool {
        let candidate = &mut lead.candidate;
        let Some(domain) = derive_domain(candidate) else {
            debug!(person_key = %lead.person_key, "no domain to predict against");
            return false;
        };
        let company = candidate.company.clone().unwrap_or_else(|| domain.clone());

        let mut guesses = match self
            .predictor
            .predict_emails(&candidate.full_name, &company, &domain)
            .await
        {
            Ok(guesses) => guesses,
            Err(e) => {
                warn!(person_key = %lead.person_key, error = %e, "email prediction failed");
                report
                    .failures
                    .push((lead.person_key.clone(), e.to_string()));
                Vec::new()
            }
        };
        if guesses.is_empty() {
            guesses = pattern_guesses(&candidate.full_name, &domain);
        }

        let mut added = false;
        for email in guesses.into_iter().take(MAX_PREDICTIONS) {
            added |= candidate.add_contact_path(ContactPath::new(
                ContactKind::PredictedEmail,
                email,
                false,
            ));
        }
        added
    }
}
