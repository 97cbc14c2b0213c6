use std::sync::Arc;

use crate::feed::Fetcher;
use crate::storage::{Feed, NewArticle, Repository};

/// Fetches one feed and persists the items not seen before.
///
/// Every failure is logged and absorbed here; the caller only sees how many
/// articles were created.
pub(crate) struct FeedProcessor {
    repo: Arc<dyn Repository>,
    fetcher: Arc<dyn Fetcher>,
}

impl FeedProcessor {
    pub(crate) fn new(repo: Arc<dyn Repository>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { repo, fetcher }
    }

    /// Run one job. Returns the number of newly inserted articles.
    ///
    /// The feed timestamp is advanced whether or not the fetch succeeded, so a
    /// failing source moves to the back of the staleness order.
    pub(crate) async fn process(&self, feed: &Feed, worker_id: u64) -> usize {
        let inserted = match self.fetcher.fetch_and_parse(&feed.url).await {
            Ok(items) => {
                let fetched_at = chrono::Utc::now().timestamp_millis();
                let total = items.len();
                let mut inserted = 0;

                // Source order is preserved: items are inserted one by one.
                for item in items {
                    match self.repo.article_exists(&item.link).await {
                        Ok(true) => continue,
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(
                                feed = %feed.name,
                                link = %item.link,
                                error = %e,
                                "Failed to check article existence"
                            );
                            continue;
                        }
                    }

                    let article = NewArticle {
                        feed_id: feed.id,
                        title: item.title,
                        link: item.link,
                        published_at: item.published_at.unwrap_or(fetched_at),
                        description: item.description,
                    };
                    match self.repo.create_article(&article).await {
                        Ok(true) => inserted += 1,
                        Ok(false) => {}
                        Err(e) => tracing::warn!(
                            feed = %feed.name,
                            link = %article.link,
                            error = %e,
                            "Failed to store article"
                        ),
                    }
                }

                tracing::info!(
                    worker = worker_id,
                    feed = %feed.name,
                    items = total,
                    new = inserted,
                    "Feed processed"
                );
                inserted
            }
            Err(e) => {
                tracing::warn!(
                    worker = worker_id,
                    feed = %feed.name,
                    url = %feed.url,
                    error = %e,
                    "Feed fetch failed"
                );
                0
            }
        };

        if let Err(e) = self.repo.update_feed_timestamp(feed.id).await {
            tracing::warn!(feed = %feed.name, error = %e, "Failed to update feed timestamp");
        }

        inserted
    }
}
