//! Shared types, error model, and configuration for Leadflow.
//!
//! This crate is the foundation depended on by all other Leadflow crates.
//! It provides:
//! - [`LeadflowError`], the unified error type
//! - Domain types ([`Run`], [`RunConfig`], [`ScoredLead`], [`FetchedPage`], ...)
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FetchConfig, GeoEntry, LlmConfig, OAuthConfig, PipelineConfig, RotationConfig,
    SearchConfig, config_dir, config_file_path, database_path, init_config, load_config,
    load_config_from, read_secret, validate_api_keys,
};
pub use error::{LeadflowError, Result};
pub use types::{
    ContactKind, ContactPath, ExtractedCandidate, FetchedPage, GeneratedEmail, LeadCategory,
    RotationMode, Run, RunConfig, RunId, RunStats, RunStatus, ScoredLead, SearchResult, Stage,
    StageError, StageTimings, Tier, Tone, TriggerType,
};
