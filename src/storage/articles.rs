use super::feeds::clamp_limit;
use super::schema::Database;
use super::types::{now_millis, Article, DatabaseError, NewArticle};

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Insert an article unless its link is already stored.
    ///
    /// Uses `ON CONFLICT(link) DO NOTHING` so concurrent inserts of the same link
    /// never fail and never duplicate; exactly one caller observes `true`.
    ///
    /// # Returns
    ///
    /// `true` if a new row was created.
    pub async fn create_article(&self, article: &NewArticle) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            INSERT INTO articles (feed_id, title, link, published_at, description, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(link) DO NOTHING
        "#,
        )
        .bind(article.feed_id)
        .bind(&article.title)
        .bind(&article.link)
        .bind(article.published_at)
        .bind(&article.description)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn article_exists(&self, link: &str) -> Result<bool, DatabaseError> {
        let exists: (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM articles WHERE link = ?)")
                .bind(link)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists.0)
    }

    /// Latest articles of a feed, most recently published first
    pub async fn articles_by_feed_name(
        &self,
        feed_name: &str,
        limit: usize,
    ) -> Result<Vec<Article>, DatabaseError> {
        let articles = sqlx::query_as::<_, Article>(
            r#"
            SELECT a.id, a.feed_id, a.title, a.link, a.published_at, a.description, a.created_at
            FROM articles a
            JOIN feeds f ON a.feed_id = f.id
            WHERE f.name = ?
            ORDER BY a.published_at DESC, a.id DESC
            LIMIT ?
        "#,
        )
        .bind(feed_name)
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(articles)
    }

    /// Number of stored articles for a feed
    pub async fn count_articles(&self, feed_id: i64) -> Result<i64, DatabaseError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}
