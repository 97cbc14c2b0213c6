//! Feed retrieval and parsing.
//!
//! - [`parser`] - RSS/Atom decoding into [`FeedItem`]s using the `feed-rs` crate
//! - [`fetcher`] - the [`Fetcher`] seam and its HTTP implementation with retry

mod fetcher;
mod parser;

pub use fetcher::{FetchError, Fetcher, HttpFetcher};
pub use parser::{parse_feed, FeedItem, ParseResult};
