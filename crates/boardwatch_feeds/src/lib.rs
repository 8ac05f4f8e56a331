//! Upstream feed handling: adapters, filter pipeline, content normalizer,
//! and the shared HTTP fetch client.
//!
//! A feed URL is routed through [`source::Source::detect`], its payload
//! through the matching adapter into [`posting::UniformPosting`], then
//! through [`filter::evaluate`] and [`normalize`]. Everything here is pure
//! except [`fetch`], which owns the retry policy for upstream requests.

pub mod ashby;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod greenhouse;
pub mod normalize;
pub mod posting;
pub mod source;

pub use error::FeedError;
pub use fetch::{FeedFetch, HttpFeedClient, RetryPolicy};
pub use filter::{evaluate, FilterOutcome};
pub use posting::{MetaValue, MetadataField, UniformPosting};
pub use source::Source;

/// Route a raw payload through the adapter for `source`.
///
/// Unknown sources yield no postings; the caller records the feed error.
pub fn extract_postings(source: Source, payload: &serde_json::Value) -> Vec<UniformPosting> {
    match source {
        Source::Greenhouse => greenhouse::extract_postings(payload),
        Source::Ashby => ashby::extract_postings(payload),
        Source::Unknown => Vec::new(),
    }
}
