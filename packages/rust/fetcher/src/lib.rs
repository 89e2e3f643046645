//! Page retrieval and main-content extraction.
//!
//! [`PageFetcher`] is the contract the pipeline consumes; [`HttpFetcher`] is
//! the production implementation. Fetch failures never surface as `Err`:
//! they are recorded on the returned [`FetchedPage`] so a batch always yields
//! one page per requested URL.

mod extract;
mod fetch;

use async_trait::async_trait;
use leadflow_shared::FetchedPage;

pub use extract::{ExtractedPage, compute_hash, extract_page};
pub use fetch::HttpFetcher;

/// Retrieves pages and extracts normalized text.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one URL. Failures are reported through [`FetchedPage::error`].
    async fn fetch_page(&self, url: &str) -> FetchedPage;

    /// Fetch every URL in order, one result per input.
    async fn fetch_pages(&self, urls: &[String]) -> Vec<FetchedPage> {
        let mut pages = Vec::with_capacity(urls.len());
        for url in urls {
            pages.push(self.fetch_page(url).await);
        }
        pages
    }
}
