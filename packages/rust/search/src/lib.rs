//! Web search for trigger news.
//!
//! [`SearchClient`] is the contract the pipeline consumes. [`SerperClient`]
//! implements it against the Serper Google Search API.

mod queries;
mod serper;

use async_trait::async_trait;
use leadflow_shared::{Result, SearchResult};

pub use queries::{build_trigger_queries, trigger_phrases};
pub use serper::SerperClient;

/// Executes text queries and returns ranked result stubs.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Run one query, restricted to the last `recency_days` (0 = no limit),
    /// returning at most `limit` results.
    async fn search(&self, query: &str, recency_days: u32, limit: usize)
    -> Result<Vec<SearchResult>>;

    /// Build the run's query list from the rotation parameters.
    fn build_trigger_queries(
        &self,
        geo_aliases: &[String],
        trigger_focus: &str,
        industry_focus: Option<&str>,
    ) -> Vec<String> {
        build_trigger_queries(geo_aliases, trigger_focus, industry_focus)
    }
}
