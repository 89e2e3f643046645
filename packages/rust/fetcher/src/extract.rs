//! HTML → main-content text, title, and publish-date extraction.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use leadflow_shared::{LeadflowError, Result};
use regex::Regex;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};

/// Candidate containers for the article body, most specific first.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    r#"[role="main"]"#,
    ".article-body",
    ".post-content",
    ".content",
    "body",
];

/// Elements that never carry article text.
const CHROME_SELECTOR: &str =
    "nav, header, footer, aside, script, style, noscript, form, iframe, svg, .sidebar, .nav, .cookie-banner";

/// What we keep from a page.
#[derive(Debug, Clone, Default)]
pub struct ExtractedPage {
    pub title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub text: String,
}

/// Extract title, publish date, and normalized main-content text.
pub fn extract_page(html: &str) -> Result<ExtractedPage> {
    let doc = Html::parse_document(html);

    let title = extract_title(&doc);
    let published_at = extract_published_at(&doc, html);
    let content_html = content_html(&doc);
    let text = html_to_text(&content_html)?;

    Ok(ExtractedPage {
        title,
        published_at,
        text,
    })
}

// ---------------------------------------------------------------------------
// Title and date
// ---------------------------------------------------------------------------

/// Title from `og:title`, then `<title>`, then the first `<h1>`.
pub(crate) fn extract_title(doc: &Html) -> Option<String> {
    meta_content(doc, r#"meta[property="og:title"]"#)
        .or_else(|| first_text(doc, "title"))
        .or_else(|| first_text(doc, "h1"))
}

pub(crate) fn extract_published_at(doc: &Html, raw_html: &str) -> Option<DateTime<Utc>> {
    static JSON_LD_DATE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#""datePublished"\s*:\s*"([^"]+)""#).expect("valid regex")
    });

    let candidates = [
        meta_content(doc, r#"meta[property="article:published_time"]"#),
        meta_content(doc, r#"meta[name="article:published_time"]"#),
        meta_content(doc, r#"meta[itemprop="datePublished"]"#),
        JSON_LD_DATE
            .captures(raw_html)
            .map(|caps| caps[1].to_string()),
        attr_value(doc, "time[datetime]", "datetime"),
    ];

    candidates.into_iter().flatten().find_map(|raw| parse_date(&raw))
}

/// Accept RFC 3339 timestamps or a leading `YYYY-MM-DD`.
pub(crate) fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let day = raw.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    attr_value(doc, selector, "content")
}

fn attr_value(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .find_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn first_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|t| !t.is_empty())
}

// ---------------------------------------------------------------------------
// Main content
// ---------------------------------------------------------------------------

/// Inner HTML of the first matching content container, chrome stripped.
fn content_html(doc: &Html) -> String {
    for sel_str in CONTENT_SELECTORS {
        let Ok(sel) = Selector::parse(sel_str) else {
            continue;
        };
        if let Some(el) = doc.select(&sel).next() {
            let html = el.inner_html();
            if !html.trim().is_empty() {
                return strip_chrome(&html);
            }
        }
    }
    String::new()
}

/// Strip navigation and other page chrome from an HTML fragment.
fn strip_chrome(html: &str) -> String {
    let Ok(chrome_sel) = Selector::parse(CHROME_SELECTOR) else {
        return html.to_string();
    };
    let fragment = Html::parse_fragment(html);

    let mut result = html.to_string();
    for el in fragment.select(&chrome_sel) {
        result = result.replace(&el.html(), "");
    }
    result
}

/// Convert content HTML to plain text via `htmd`, then normalize whitespace.
fn html_to_text(content_html: &str) -> Result<String> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg", "img"])
        .build();

    let markdown = converter
        .convert(content_html)
        .map_err(|e| LeadflowError::parse(format!("htmd conversion failed: {e}")))?;

    Ok(normalize_text(&markdown))
}

/// Collapse runs of blank lines and trailing spaces.
fn normalize_text(text: &str) -> String {
    static BLANK_LINES: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    let trimmed: Vec<&str> = text.lines().map(str::trim_end).collect();
    BLANK_LINES
        .replace_all(trimmed.join("\n").trim(), "\n\n")
        .into_owned()
}

/// Compute SHA-256 hash of content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<html>
        <head>
            <title>Acme names Dana Ruiz CFO | Houston Business</title>
            <meta property="og:title" content="Acme names Dana Ruiz CFO">
            <meta property="article:published_time" content="2026-03-02T09:30:00-06:00">
        </head>
        <body>
            <nav><a href="/">Home</a><a href="/news">News</a></nav>
            <article>
                <h1>Acme names Dana Ruiz CFO</h1>
                <script>trackPageView();</script>
                <p>Houston-based Acme Energy has named Dana Ruiz chief financial officer.</p>
                <aside>Related: five other stories</aside>
                <p>Ruiz joins from Gulf Partners.</p>
            </article>
            <footer>Copyright</footer>
        </body>
    </html>"#;

    #[test]
    fn extracts_article_text_without_chrome() {
        let page = extract_page(ARTICLE).unwrap();
        assert!(page.text.contains("named Dana Ruiz chief financial officer"));
        assert!(page.text.contains("Ruiz joins from Gulf Partners."));
        assert!(!page.text.contains("trackPageView"));
        assert!(!page.text.contains("five other stories"));
        assert!(!page.text.contains("Copyright"));
    }

    #[test]
    fn prefers_og_title() {
        let page = extract_page(ARTICLE).unwrap();
        assert_eq!(page.title.as_deref(), Some("Acme names Dana Ruiz CFO"));
    }

    #[test]
    fn title_falls_back_to_h1() {
        let page = extract_page("<html><body><h1>Only heading</h1><p>x</p></body></html>").unwrap();
        assert_eq!(page.title.as_deref(), Some("Only heading"));
    }

    #[test]
    fn published_at_from_meta() {
        let page = extract_page(ARTICLE).unwrap();
        let published = page.published_at.expect("publish date");
        assert_eq!(published.to_rfc3339(), "2026-03-02T15:30:00+00:00");
    }

    #[test]
    fn published_at_from_json_ld_and_time() {
        let json_ld = r#"<html><head><script type="application/ld+json">
            {"@type":"NewsArticle","datePublished":"2026-02-27"}
        </script></head><body><p>x</p></body></html>"#;
        let page = extract_page(json_ld).unwrap();
        assert_eq!(
            page.published_at.map(|d| d.date_naive().to_string()),
            Some("2026-02-27".to_string())
        );

        let time = r#"<html><body><time datetime="2026-01-15T08:00:00Z">Jan 15</time></body></html>"#;
        let page = extract_page(time).unwrap();
        assert!(page.published_at.is_some());
    }

    #[test]
    fn normalize_collapses_blank_lines() {
        assert_eq!(normalize_text("a  \n\n\n\nb\n"), "a\n\nb");
    }

    #[test]
    fn test_compute_hash() {
        let hash = compute_hash("hello world");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
