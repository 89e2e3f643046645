//! Trigger-focused query construction.

use std::collections::HashSet;

/// News phrasing per trigger category. Unknown triggers fall back to the
/// trigger name itself with underscores turned into spaces.
const TRIGGER_PHRASES: &[(&str, &[&str])] = &[
    ("career_move", &["joins", "named", "appointed", "hired as"]),
    ("promotion", &["promoted to", "named", "elevated to"]),
    ("new_hire", &["welcomes", "hires", "new hire"]),
    ("funding", &["raises", "secures funding", "closes round"]),
    ("expansion", &["expands", "opens new office", "new headquarters"]),
    ("acquisition", &["acquires", "acquired by", "merger"]),
    ("award", &["award", "honored", "recognized"]),
    ("launch", &["launches", "unveils", "announces"]),
];

/// Phrases used for `trigger`.
pub fn trigger_phrases(trigger: &str) -> Vec<String> {
    let key = trigger.trim().to_lowercase();
    match TRIGGER_PHRASES.iter().find(|(name, _)| *name == key) {
        Some((_, phrases)) => phrases.iter().map(|p| p.to_string()).collect(),
        None => vec![key.replace('_', " ")],
    }
}

/// Build quoted search queries for every geo alias and trigger phrase.
///
/// Queries are ordered alias-major so the first few always cover the
/// primary geography. Duplicates (case-insensitive) are dropped.
pub fn build_trigger_queries(
    geo_aliases: &[String],
    trigger_focus: &str,
    industry_focus: Option<&str>,
) -> Vec<String> {
    let phrases = trigger_phrases(trigger_focus);
    let industry = industry_focus.map(str::trim).filter(|s| !s.is_empty());

    let mut seen = HashSet::new();
    let mut queries = Vec::new();

    for alias in geo_aliases.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
        for phrase in &phrases {
            let query = match industry {
                Some(industry) => format!("\"{alias}\" \"{phrase}\" {industry}"),
                None => format!("\"{alias}\" \"{phrase}\""),
            };
            if seen.insert(query.to_lowercase()) {
                queries.push(query);
            }
        }
    }
    queries
}
