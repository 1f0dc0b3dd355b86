use super::schema::Database;
use super::types::{DatabaseError, StoredFeed};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Load every subscription, ordered by id.
    pub async fn load_feeds(&self) -> Result<Vec<StoredFeed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, StoredFeed>(
            "SELECT id, name, link, last FROM feeds ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Insert a new subscription and return its id.
    ///
    /// Fails with a constraint error if `name` or `link` is already taken;
    /// the registry checks for collisions first, so hitting the constraint
    /// means the database and the in-memory registry disagree.
    pub async fn insert_feed(
        &self,
        name: &str,
        link: &str,
        last: Option<&str>,
    ) -> Result<i64, DatabaseError> {
        let row: (i64,) =
            sqlx::query_as("INSERT INTO feeds (name, link, last) VALUES (?, ?, ?) RETURNING id")
                .bind(name)
                .bind(link)
                .bind(last)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// Store a new last-seen marker for a feed.
    ///
    /// Returns `false` if no feed with that id exists.
    pub async fn update_last(&self, feed_id: i64, last: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE feeds SET last = ? WHERE id = ?")
            .bind(last)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a subscription by name. Returns `false` if nothing matched.
    pub async fn delete_feed(&self, name: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM feeds WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let db = test_db().await;
        let id = db
            .insert_feed("rust", "https://blog.rust-lang.org/feed.xml", Some("guid-1"))
            .await
            .unwrap();
        assert!(id > 0);

        let feeds = db.load_feeds().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].id, id);
        assert_eq!(feeds[0].name, "rust");
        assert_eq!(feeds[0].last.as_deref(), Some("guid-1"));
    }

    #[tokio::test]
    async fn test_ids_are_sequential() {
        let db = test_db().await;
        let a = db.insert_feed("a", "https://a.example.com/rss", None).await.unwrap();
        let b = db.insert_feed("b", "https://b.example.com/rss", None).await.unwrap();
        assert!(b > a);

        let feeds = db.load_feeds().await.unwrap();
        assert_eq!(feeds.iter().map(|f| f.id).collect::<Vec<_>>(), vec![a, b]);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_by_constraint() {
        let db = test_db().await;
        db.insert_feed("dup", "https://a.example.com/rss", None)
            .await
            .unwrap();
        let result = db.insert_feed("dup", "https://b.example.com/rss", None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_last() {
        let db = test_db().await;
        let id = db
            .insert_feed("news", "https://news.example.com/rss", Some("old"))
            .await
            .unwrap();

        assert!(db.update_last(id, "new").await.unwrap());
        let feeds = db.load_feeds().await.unwrap();
        assert_eq!(feeds[0].last.as_deref(), Some("new"));

        assert!(!db.update_last(id + 100, "nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_feed() {
        let db = test_db().await;
        db.insert_feed("gone", "https://gone.example.com/rss", None)
            .await
            .unwrap();

        assert!(db.delete_feed("gone").await.unwrap());
        assert!(!db.delete_feed("gone").await.unwrap());
        assert!(db.load_feeds().await.unwrap().is_empty());
    }
}
