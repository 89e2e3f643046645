//! LLM-backed collaborators: candidate extraction, email prediction, and
//! outreach drafting.
//!
//! All three share one [`LlmClient`], which talks to an OpenRouter-compatible
//! `/chat/completions` endpoint and owns its credentials (including the
//! cached OAuth token, when configured). Callers only see the traits.

mod client;
mod drafter;
mod extractor;
mod predictor;

pub use client::{LlmClient, TokenCache};
pub use drafter::{DEFAULT_TONE, LlmOutreachDrafter, OutreachDrafter, html_to_plain, tone_for_index};
pub use extractor::{CandidateExtractor, ExtractionInput, ExtractionOutput, LlmCandidateExtractor};
pub use predictor::{
    EmailPredictor, LlmEmailPredictor, MAX_PREDICTIONS, filter_predictions, is_valid_email,
};
