//! Daily and manual rotation planning.
//!
//! A rotation picks the geography, trigger, and optional industry that scope
//! one run's search queries. Daily plans are a pure function of the date's
//! day-of-year; manual plans are sampled uniformly.

use chrono::{Datelike, NaiveDate};
use leadflow_shared::{AppConfig, GeoEntry, RotationMode, RunConfig, Tone};
use rand::Rng;
use rand::seq::IndexedRandom;

/// Geography used when none is configured.
pub const DEFAULT_GEO: &str = "Houston";

/// Trigger used when none is configured.
pub const DEFAULT_TRIGGER: &str = "career_move";

/// Deterministic plan for `date`: geo and trigger advance daily, industry
/// every two days.
pub fn plan_daily(config: &AppConfig, date: NaiveDate) -> RunConfig {
    let day = date.ordinal0() as usize;
    let rotation = &config.rotation;

    let geo = pick_geo(&rotation.geos, |len| day % len);
    let trigger = rotation
        .triggers
        .get(day % rotation.triggers.len().max(1))
        .cloned()
        .unwrap_or_else(|| DEFAULT_TRIGGER.to_string());
    let industry = rotation
        .industries
        .get((day / 2) % rotation.industries.len().max(1))
        .cloned();

    build_run_config(config, geo, trigger, industry, RotationMode::Daily)
}

/// Uniformly sampled plan for an on-demand run.
pub fn plan_random(config: &AppConfig) -> RunConfig {
    plan_random_with(config, &mut rand::rng())
}

/// [`plan_random`] with an explicit RNG.
pub fn plan_random_with<R: Rng + ?Sized>(config: &AppConfig, rng: &mut R) -> RunConfig {
    let rotation = &config.rotation;

    let geo = match rotation.geos.choose(rng) {
        Some(entry) => entry.clone(),
        None => default_geo(),
    };
    let trigger = rotation
        .triggers
        .choose(rng)
        .cloned()
        .unwrap_or_else(|| DEFAULT_TRIGGER.to_string());
    let industry = rotation.industries.choose(rng).cloned();

    let mut run_config = build_run_config(config, geo, trigger, industry, RotationMode::Manual);
    if rotation.manual_ignores_cooldown {
        run_config.cooldown_days = 0;
    }
    run_config
}

fn pick_geo(geos: &[GeoEntry], index: impl Fn(usize) -> usize) -> GeoEntry {
    if geos.is_empty() {
        return default_geo();
    }
    geos[index(geos.len())].clone()
}

fn default_geo() -> GeoEntry {
    GeoEntry {
        name: DEFAULT_GEO.to_string(),
        aliases: vec![DEFAULT_GEO.to_string(), format!("{DEFAULT_GEO}, TX")],
    }
}

/// The display name always leads the alias list.
fn geo_aliases(geo: &GeoEntry) -> Vec<String> {
    let mut aliases = vec![geo.name.clone()];
    for alias in &geo.aliases {
        if !aliases.iter().any(|a| a.eq_ignore_ascii_case(alias)) {
            aliases.push(alias.clone());
        }
    }
    aliases
}

fn build_run_config(
    config: &AppConfig,
    geo: GeoEntry,
    trigger: String,
    industry: Option<String>,
    mode: RotationMode,
) -> RunConfig {
    let pipeline = &config.pipeline;
    RunConfig {
        geo_aliases: geo_aliases(&geo),
        geo: geo.name,
        trigger_focus: trigger,
        industry_focus: industry,
        daily_lead_target: pipeline.daily_lead_target,
        candidate_target: pipeline.candidate_target,
        recency_days: pipeline.recency_days,
        cooldown_days: pipeline.cooldown_days,
        tones: pipeline.tones.iter().map(|t| Tone::from(t.as_str())).collect(),
        mode,
    }
}
