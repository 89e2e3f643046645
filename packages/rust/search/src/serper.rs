//! Serper (Google Search) client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use leadflow_shared::{LeadflowError, Result, SearchConfig, SearchResult, read_secret};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::SearchClient;

/// Serper caps `num` at 100.
const MAX_RESULTS_PER_QUERY: usize = 100;

pub struct SerperClient {
    api_key: String,
    endpoint: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
}

#[derive(Debug, Deserialize)]
struct SerperResult {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    date: Option<String>,
}

impl SerperClient {
    pub fn new(api_key: impl Into<String>, config: &SearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LeadflowError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key: api_key.into(),
            endpoint: config.endpoint.clone(),
            client,
        })
    }

    /// Build a client reading the API key from the configured env var.
    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let api_key = read_secret(&config.api_key_env)?;
        Self::new(api_key, config)
    }
}

#[async_trait]
impl SearchClient for SerperClient {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(
        &self,
        query: &str,
        recency_days: u32,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let num = limit.clamp(1, MAX_RESULTS_PER_QUERY);
        let mut body = serde_json::json!({
            "q": query,
            "num": num,
        });
        if let Some(tbs) = recency_filter(recency_days) {
            body["tbs"] = serde_json::Value::from(tbs);
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LeadflowError::Network(format!("serper request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LeadflowError::Network(format!("serper: HTTP {status}")));
        }

        let data: SerperResponse = resp
            .json()
            .await
            .map_err(|e| LeadflowError::parse(format!("serper response: {e}")))?;

        let now = Utc::now();
        let results: Vec<SearchResult> = data
            .organic
            .into_iter()
            .filter(|r| !r.link.is_empty())
            .take(num)
            .map(|r| SearchResult {
                query: query.to_string(),
                published_at: r.date.as_deref().and_then(|d| parse_result_date(d, now)),
                url: r.link,
                title: r.title,
                snippet: r.snippet,
            })
            .collect();

        info!(count = results.len(), "serper search complete");
        Ok(results)
    }
}

/// Map a recency window onto Google's `tbs` time filter.
fn recency_filter(recency_days: u32) -> Option<&'static str> {
    match recency_days {
        0 => None,
        1 => Some("qdr:d"),
        2..=7 => Some("qdr:w"),
        8..=31 => Some("qdr:m"),
        _ => Some("qdr:y"),
    }
}

/// Best-effort parse of Serper's `date` field: either relative
/// (`3 days ago`) or absolute (`Mar 2, 2026`).
fn parse_result_date(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Some(rest) = raw.strip_suffix(" ago") {
        let mut parts = rest.split_whitespace();
        let amount: i64 = parts.next()?.parse().ok()?;
        let unit = parts.next()?.trim_end_matches('s');
        let delta = match unit {
            "minute" | "min" => chrono::Duration::minutes(amount),
            "hour" => chrono::Duration::hours(amount),
            "day" => chrono::Duration::days(amount),
            "week" => chrono::Duration::weeks(amount),
            "month" => chrono::Duration::days(amount * 30),
            "year" => chrono::Duration::days(amount * 365),
            _ => return None,
        };
        return Some(now - delta);
    }

    for fmt in ["%b %d, %Y", "%d %b %Y", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }

    debug!(raw, "unrecognized result date");
    None
}
