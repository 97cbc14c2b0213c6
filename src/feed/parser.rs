use anyhow::Result;
use feed_rs::parser;

/// A normalized entry extracted from an RSS or Atom document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    /// Unix milliseconds, `None` when the entry carries no date
    pub published_at: Option<i64>,
}

/// Outcome of parsing a feed document
#[derive(Debug)]
pub struct ParseResult {
    /// Entries in document order
    pub items: Vec<FeedItem>,
    /// Entries dropped because they had no usable link
    pub skipped: usize,
}

/// Parse RSS/Atom bytes into items, preserving the document's entry order.
///
/// Entries without a link cannot be deduplicated and are skipped. A missing
/// title becomes "Untitled".
pub fn parse_feed(bytes: &[u8]) -> Result<ParseResult> {
    let feed = parser::parse(bytes)?;

    let mut skipped = 0;
    let items = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .filter(|href| !href.is_empty());
            let Some(link) = link else {
                skipped += 1;
                return None;
            };

            let title = entry
                .title
                .map(|t| t.content.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Untitled".to_string());
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty());
            let published_at = entry
                .published
                .or(entry.updated)
                .map(|dt| dt.timestamp_millis());

            Some(FeedItem {
                title,
                link,
                description,
                published_at,
            })
        })
        .collect();

    Ok(ParseResult { items, skipped })
}
