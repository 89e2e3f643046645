//! HTTP page fetcher with SSRF protection and size limits.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use leadflow_shared::{FetchConfig, FetchedPage, LeadflowError, Result};
use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::PageFetcher;
use crate::extract::{compute_hash, extract_page};

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("Leadflow/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Fetches pages over HTTP and extracts their main-content text.
pub struct HttpFetcher {
    client: Client,
    max_body_bytes: u64,
    /// Allow localhost/private IPs (for tests with mock servers).
    allow_localhost: bool,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LeadflowError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
            allow_localhost: false,
        })
    }

    /// Allow fetching localhost/private IPs (for tests).
    #[cfg(test)]
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    async fn fetch_inner(&self, raw_url: &str) -> Result<FetchedPage> {
        let url = Url::parse(raw_url)
            .map_err(|e| LeadflowError::validation(format!("{raw_url}: invalid URL: {e}")))?;

        if !self.allow_localhost && is_ssrf_target(&url) {
            return Err(LeadflowError::validation(format!(
                "{url}: blocked by SSRF protection"
            )));
        }

        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| LeadflowError::Network(format!("{url}: {e}")))?;

        let final_url = response.url().clone();
        if !self.allow_localhost && is_ssrf_target(&final_url) {
            return Err(LeadflowError::validation(format!(
                "{url}: redirected to blocked target {final_url}"
            )));
        }

        let status = response.status();
        if !status.is_success() {
            return Err(LeadflowError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(content_type) = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_textual(content_type) {
                return Err(LeadflowError::validation(format!(
                    "{url}: unsupported content type {content_type}"
                )));
            }
        }

        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes {
                return Err(LeadflowError::validation(format!(
                    "{url}: response too large ({len} bytes, max {})",
                    self.max_body_bytes
                )));
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| LeadflowError::Network(format!("{url}: body read failed: {e}")))?;

        if body.len() as u64 > self.max_body_bytes {
            return Err(LeadflowError::validation(format!(
                "{url}: response too large ({} bytes, max {})",
                body.len(),
                self.max_body_bytes
            )));
        }

        let html = String::from_utf8_lossy(&body);
        let extracted = extract_page(&html)?;

        Ok(FetchedPage {
            url: raw_url.to_string(),
            final_url: final_url.to_string(),
            domain: domain_of(&final_url),
            status_code: Some(status.as_u16()),
            title: extracted.title,
            published_at: extracted.published_at,
            content_hash: compute_hash(&extracted.text),
            text: extracted.text,
            fetched_at: Utc::now(),
            error: None,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch_page(&self, url: &str) -> FetchedPage {
        match self.fetch_inner(url).await {
            Ok(page) => {
                debug!(text_len = page.text.len(), "page fetched");
                page
            }
            Err(e) => {
                warn!(error = %e, "page fetch failed");
                FetchedPage::failed(url, e.to_string())
            }
        }
    }

    #[instrument(skip_all, fields(urls = urls.len()))]
    async fn fetch_pages(&self, urls: &[String]) -> Vec<FetchedPage> {
        let mut pages = Vec::with_capacity(urls.len());
        for url in urls {
            pages.push(self.fetch_page(url).await);
        }

        let failed = pages.iter().filter(|p| p.error.is_some()).count();
        info!(fetched = pages.len() - failed, failed, "fetch batch complete");
        pages
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_textual(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("html") || ct.starts_with("text/")
}

/// Registrable-looking host without a leading `www.`.
fn domain_of(url: &Url) -> String {
    url.host_str()
        .map(|h| h.trim_start_matches("www.").to_lowercase())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}
