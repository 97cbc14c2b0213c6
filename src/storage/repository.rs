use async_trait::async_trait;

use super::schema::Database;
use super::types::{DatabaseError, Feed, NewArticle};

/// Storage operations the aggregator and CLI consume.
///
/// [`Database`] is the production implementation; tests substitute in-memory
/// fakes to observe what the scheduler and workers request.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn create_feed(&self, name: &str, url: &str) -> Result<Feed, DatabaseError>;

    async fn get_feed_by_name(&self, name: &str) -> Result<Option<Feed>, DatabaseError>;

    async fn list_feeds(&self, limit: Option<usize>) -> Result<Vec<Feed>, DatabaseError>;

    /// The `limit` least recently attempted feeds
    async fn oldest_feeds(&self, limit: usize) -> Result<Vec<Feed>, DatabaseError>;

    async fn update_feed_timestamp(&self, feed_id: i64) -> Result<(), DatabaseError>;

    async fn delete_feed(&self, name: &str) -> Result<(), DatabaseError>;

    /// Insert unless the link exists. Returns `true` if a row was created.
    async fn create_article(&self, article: &NewArticle) -> Result<bool, DatabaseError>;

    async fn article_exists(&self, link: &str) -> Result<bool, DatabaseError>;
}

#[async_trait]
impl Repository for Database {
    async fn create_feed(&self, name: &str, url: &str) -> Result<Feed, DatabaseError> {
        Database::create_feed(self, name, url).await
    }

    async fn get_feed_by_name(&self, name: &str) -> Result<Option<Feed>, DatabaseError> {
        Database::get_feed_by_name(self, name).await
    }

    async fn list_feeds(&self, limit: Option<usize>) -> Result<Vec<Feed>, DatabaseError> {
        Database::list_feeds(self, limit).await
    }

    async fn oldest_feeds(&self, limit: usize) -> Result<Vec<Feed>, DatabaseError> {
        Database::oldest_feeds(self, limit).await
    }

    async fn update_feed_timestamp(&self, feed_id: i64) -> Result<(), DatabaseError> {
        Database::update_feed_timestamp(self, feed_id).await
    }

    async fn delete_feed(&self, name: &str) -> Result<(), DatabaseError> {
        Database::delete_feed(self, name).await
    }

    async fn create_article(&self, article: &NewArticle) -> Result<bool, DatabaseError> {
        Database::create_article(self, article).await
    }

    async fn article_exists(&self, link: &str) -> Result<bool, DatabaseError> {
        Database::article_exists(self, link).await
    }
}
