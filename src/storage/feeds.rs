use super::schema::Database;
use super::types::{now_millis, DatabaseError, Feed};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Register a new feed. Names are unique.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::DuplicateFeed`] when the name is taken.
    pub async fn create_feed(&self, name: &str, url: &str) -> Result<Feed, DatabaseError> {
        let now = now_millis();
        let result = sqlx::query_as::<_, Feed>(
            r#"
            INSERT INTO feeds (name, url, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, name, url, created_at, updated_at
        "#,
        )
        .bind(name)
        .bind(url)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(feed) => {
                tracing::info!(feed = %feed.name, url = %feed.url, "Created feed");
                Ok(feed)
            }
            Err(e) if DatabaseError::is_unique_violation(&e) => {
                Err(DatabaseError::DuplicateFeed(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_feed_by_name(&self, name: &str) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(
            "SELECT id, name, url, created_at, updated_at FROM feeds WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// List feeds, newest first. `None` returns every feed.
    pub async fn list_feeds(&self, limit: Option<usize>) -> Result<Vec<Feed>, DatabaseError> {
        // SQLite treats LIMIT -1 as "no limit"
        let limit = limit.map(clamp_limit).unwrap_or(-1);
        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, name, url, created_at, updated_at
            FROM feeds
            ORDER BY created_at DESC, id DESC
            LIMIT ?
        "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// The `limit` feeds whose last fetch attempt is the oldest.
    ///
    /// Ties are broken by id so the selection is stable between cycles.
    pub async fn oldest_feeds(&self, limit: usize) -> Result<Vec<Feed>, DatabaseError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, name, url, created_at, updated_at
            FROM feeds
            ORDER BY updated_at ASC, id ASC
            LIMIT ?
        "#,
        )
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Record a fetch attempt. The stored timestamp strictly increases even
    /// when two attempts land in the same millisecond.
    pub async fn update_feed_timestamp(&self, feed_id: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE feeds SET updated_at = MAX(?, updated_at + 1) WHERE id = ?")
            .bind(now_millis())
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a feed by name; its articles are removed by `ON DELETE CASCADE`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::FeedNotFound`] when no feed has that name.
    pub async fn delete_feed(&self, name: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM feeds WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::FeedNotFound(name.to_string()));
        }
        tracing::info!(feed = %name, "Deleted feed");
        Ok(())
    }
}

pub(crate) fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
