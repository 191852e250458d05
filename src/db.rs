use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate(_))
    }

    /// Turn a unique-constraint violation into `Duplicate`, leaving any
    /// other failure as a database error.
    fn classify(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::Duplicate(what.into())
            }
            _ => StoreError::Database(err),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedWithOwner {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub owner_name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedFollow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_name: String,
    pub feed_name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub feed_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPost<'a> {
    pub feed_id: i64,
    pub title: &'a str,
    pub url: &'a str,
    pub description: &'a str,
    pub published_at: DateTime<Utc>,
}

/// Fixed-width UTC timestamps, so ordering the text orders the instants.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

const FEED_FOLLOW_SELECT: &str = r#"
    SELECT ff.id, ff.user_id, ff.feed_id, ff.created_at, ff.updated_at,
           u.name AS user_name, f.name AS feed_name
    FROM feed_follows ff
    JOIN users u ON u.id = ff.user_id
    JOIN feeds f ON f.id = ff.feed_id
"#;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        // Every connection to an in-memory database is its own database
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn initialize(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_fetched_at TEXT,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_follows (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(user_id, feed_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL,
                published_at TEXT NOT NULL,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_feeds_last_fetched
            ON feeds(last_fetched_at, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_posts_feed_published
            ON posts(feed_id, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete every user, feed, follow and post.
    pub async fn reset(&self) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["posts", "feed_follows", "feeds", "users"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn create_user(&self, name: &str) -> StoreResult<User> {
        let now = timestamp(Utc::now());
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, created_at, updated_at)
            VALUES (?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::classify(e, format!("user {:?}", name)))
    }

    pub async fn get_user_by_name(&self, name: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_users(&self) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    /// Create a feed owned by `user_id` and follow it on their behalf.
    ///
    /// Both rows are written in one transaction; if the follow cannot be
    /// stored the feed is not kept either.
    pub async fn create_feed_with_follow(
        &self,
        user_id: i64,
        name: &str,
        url: &str,
    ) -> StoreResult<(Feed, FeedFollow)> {
        let now = timestamp(Utc::now());
        let mut tx = self.pool.begin().await?;

        let feed = sqlx::query_as::<_, Feed>(
            r#"
            INSERT INTO feeds (name, url, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::classify(e, format!("feed {}", url)))?;

        let follow_id: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(feed.id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::classify(e, format!("follow of {}", url)))?;

        let follow = sqlx::query_as::<_, FeedFollow>(&format!("{} WHERE ff.id = ?", FEED_FOLLOW_SELECT))
            .bind(follow_id.0)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((feed, follow))
    }

    pub async fn get_feed(&self, feed_id: i64) -> StoreResult<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> StoreResult<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn get_feeds_with_owner(&self) -> StoreResult<Vec<FeedWithOwner>> {
        let feeds = sqlx::query_as::<_, FeedWithOwner>(
            r#"
            SELECT f.id, f.name, f.url, u.name AS owner_name
            FROM feeds f
            JOIN users u ON u.id = f.user_id
            ORDER BY f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// The feed that has waited longest for a fetch. Feeds never fetched
    /// come first; ties go to the feed created first.
    pub async fn get_next_feed_to_fetch(&self) -> StoreResult<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            SELECT * FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    pub async fn mark_feed_fetched(&self, feed_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let at = timestamp(at);
        let result = sqlx::query(
            r#"
            UPDATE feeds
            SET last_fetched_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&at)
        .bind(&at)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("feed {}", feed_id)));
        }
        Ok(())
    }

    /// Remember how the last fetch of a feed went; `None` clears the error.
    pub async fn record_fetch_result(&self, feed_id: i64, error: Option<&str>) -> StoreResult<()> {
        sqlx::query("UPDATE feeds SET last_error = ? WHERE id = ?")
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_feed_follow(&self, user_id: i64, feed_id: i64) -> StoreResult<FeedFollow> {
        let now = timestamp(Utc::now());
        let follow_id: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::classify(e, format!("follow of feed {}", feed_id)))?;

        let follow = sqlx::query_as::<_, FeedFollow>(&format!("{} WHERE ff.id = ?", FEED_FOLLOW_SELECT))
            .bind(follow_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(follow)
    }

    pub async fn get_feed_follows_for_user(&self, user_id: i64) -> StoreResult<Vec<FeedFollow>> {
        let follows = sqlx::query_as::<_, FeedFollow>(&format!(
            "{} WHERE ff.user_id = ? ORDER BY ff.id",
            FEED_FOLLOW_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(follows)
    }

    pub async fn unfollow(&self, user_id: i64, feed_id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "follow of feed {} by user {}",
                feed_id, user_id
            )));
        }
        Ok(())
    }

    /// Insert a post. A post whose url is already stored is rejected with
    /// `StoreError::Duplicate` and the existing row is left untouched.
    pub async fn create_post(&self, post: &NewPost<'_>) -> StoreResult<Post> {
        let now = timestamp(Utc::now());
        sqlx::query_as::<_, Post>(
            r#"
            INSERT INTO posts (title, url, description, published_at, feed_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(post.title)
        .bind(post.url)
        .bind(post.description)
        .bind(timestamp(post.published_at))
        .bind(post.feed_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::classify(e, format!("post {}", post.url)))
    }

    /// Newest posts across every feed the user follows.
    pub async fn get_posts_for_user(&self, user_id: i64, limit: i64) -> StoreResult<Vec<Post>> {
        let posts = sqlx::query_as::<_, Post>(
            r#"
            SELECT p.* FROM posts p
            JOIN feed_follows ff ON ff.feed_id = p.feed_id
            WHERE ff.user_id = ?
            ORDER BY p.published_at DESC, p.id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }

    pub async fn get_post_count_for_feed(&self, feed_id: i64) -> StoreResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn create_test_db() -> Database {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    async fn create_user_with_feed(db: &Database, user: &str, url: &str) -> (User, Feed) {
        let user = db.create_user(user).await.unwrap();
        let (feed, _) = db
            .create_feed_with_follow(user.id, "Test Feed", url)
            .await
            .unwrap();
        (user, feed)
    }

    fn new_post<'a>(feed_id: i64, url: &'a str, published_at: DateTime<Utc>) -> NewPost<'a> {
        NewPost {
            feed_id,
            title: "Title",
            url,
            description: "Description",
            published_at,
        }
    }

    // Database initialization tests
    mod initialization_tests {
        use super::*;

        #[tokio::test]
        async fn test_database_creation() {
            let db = Database::new("sqlite::memory:").await;
            assert!(db.is_ok());
        }

        #[tokio::test]
        async fn test_database_initialization() {
            let db = create_test_db().await;
            assert!(db.get_users().await.unwrap().is_empty());
            assert!(db.get_feeds_with_owner().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_double_initialization_is_safe() {
            let db = create_test_db().await;
            let result = db.initialize().await;
            assert!(result.is_ok());
        }
    }

    mod user_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_and_get_user() {
            let db = create_test_db().await;
            let created = db.create_user("alice").await.unwrap();

            let fetched = db.get_user_by_name("alice").await.unwrap().unwrap();
            assert_eq!(fetched.id, created.id);
            assert_eq!(fetched.name, "alice");
        }

        #[tokio::test]
        async fn test_duplicate_user_is_rejected() {
            let db = create_test_db().await;
            db.create_user("alice").await.unwrap();

            let err = db.create_user("alice").await.unwrap_err();
            assert!(err.is_duplicate());
            assert_eq!(db.get_users().await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_get_missing_user() {
            let db = create_test_db().await;
            assert!(db.get_user_by_name("nobody").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_users_in_creation_order() {
            let db = create_test_db().await;
            db.create_user("bob").await.unwrap();
            db.create_user("alice").await.unwrap();

            let names: Vec<_> = db
                .get_users()
                .await
                .unwrap()
                .into_iter()
                .map(|u| u.name)
                .collect();
            assert_eq!(names, vec!["bob", "alice"]);
        }
    }

    mod feed_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_feed_follows_it() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();

            let (feed, follow) = db
                .create_feed_with_follow(user.id, "Blog", "https://blog.example.com/rss")
                .await
                .unwrap();

            assert_eq!(feed.user_id, user.id);
            assert!(feed.last_fetched_at.is_none());
            assert_eq!(follow.feed_id, feed.id);
            assert_eq!(follow.user_name, "alice");
            assert_eq!(follow.feed_name, "Blog");

            let follows = db.get_feed_follows_for_user(user.id).await.unwrap();
            assert_eq!(follows.len(), 1);
        }

        #[tokio::test]
        async fn test_duplicate_feed_url_leaves_no_follow() {
            let db = create_test_db().await;
            let alice = db.create_user("alice").await.unwrap();
            let bob = db.create_user("bob").await.unwrap();

            db.create_feed_with_follow(alice.id, "Blog", "https://blog.example.com/rss")
                .await
                .unwrap();
            let err = db
                .create_feed_with_follow(bob.id, "Blog again", "https://blog.example.com/rss")
                .await
                .unwrap_err();

            assert!(err.is_duplicate());
            assert!(db.get_feed_follows_for_user(bob.id).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_feed_for_missing_user_is_rolled_back() {
            let db = create_test_db().await;

            let result = db
                .create_feed_with_follow(42, "Orphan", "https://orphan.example.com/rss")
                .await;

            assert!(result.is_err());
            assert!(db
                .get_feed_by_url("https://orphan.example.com/rss")
                .await
                .unwrap()
                .is_none());
        }

        #[tokio::test]
        async fn test_get_feed_by_url() {
            let db = create_test_db().await;
            let (_, feed) = create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;

            let found = db
                .get_feed_by_url("https://a.example.com/rss")
                .await
                .unwrap()
                .unwrap();
            assert_eq!(found.id, feed.id);
            assert!(db.get_feed_by_url("https://b.example.com").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_get_nonexistent_feed() {
            let db = create_test_db().await;
            assert!(db.get_feed(999).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_feeds_with_owner() {
            let db = create_test_db().await;
            create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;

            let feeds = db.get_feeds_with_owner().await.unwrap();
            assert_eq!(feeds.len(), 1);
            assert_eq!(feeds[0].owner_name, "alice");
            assert_eq!(feeds[0].url, "https://a.example.com/rss");
        }
    }

    mod follow_tests {
        use super::*;

        #[tokio::test]
        async fn test_follow_existing_feed() {
            let db = create_test_db().await;
            let (_, feed) = create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;
            let bob = db.create_user("bob").await.unwrap();

            let follow = db.create_feed_follow(bob.id, feed.id).await.unwrap();
            assert_eq!(follow.user_name, "bob");
            assert_eq!(follow.feed_name, "Test Feed");
        }

        #[tokio::test]
        async fn test_follow_twice_is_duplicate() {
            let db = create_test_db().await;
            let (alice, feed) =
                create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;

            let err = db.create_feed_follow(alice.id, feed.id).await.unwrap_err();
            assert!(err.is_duplicate());
            assert_eq!(db.get_feed_follows_for_user(alice.id).await.unwrap().len(), 1);
        }

        #[tokio::test]
        async fn test_unfollow() {
            let db = create_test_db().await;
            let (alice, feed) =
                create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;

            db.unfollow(alice.id, feed.id).await.unwrap();
            assert!(db.get_feed_follows_for_user(alice.id).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_unfollow_not_followed_is_not_found() {
            let db = create_test_db().await;
            let (_, feed) = create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;
            let bob = db.create_user("bob").await.unwrap();

            let err = db.unfollow(bob.id, feed.id).await.unwrap_err();
            assert!(matches!(err, StoreError::NotFound(_)));
        }
    }

    mod fetch_bookkeeping_tests {
        use super::*;

        #[tokio::test]
        async fn test_no_feeds() {
            let db = create_test_db().await;
            assert!(db.get_next_feed_to_fetch().await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_never_fetched_first_then_by_id() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            let (first, _) = db
                .create_feed_with_follow(user.id, "One", "https://one.example.com")
                .await
                .unwrap();
            let (second, _) = db
                .create_feed_with_follow(user.id, "Two", "https://two.example.com")
                .await
                .unwrap();

            let next = db.get_next_feed_to_fetch().await.unwrap().unwrap();
            assert_eq!(next.id, first.id);

            db.mark_feed_fetched(first.id, Utc::now()).await.unwrap();
            let next = db.get_next_feed_to_fetch().await.unwrap().unwrap();
            assert_eq!(next.id, second.id);
        }

        #[tokio::test]
        async fn test_oldest_fetch_wins() {
            let db = create_test_db().await;
            let user = db.create_user("alice").await.unwrap();
            let (first, _) = db
                .create_feed_with_follow(user.id, "One", "https://one.example.com")
                .await
                .unwrap();
            let (second, _) = db
                .create_feed_with_follow(user.id, "Two", "https://two.example.com")
                .await
                .unwrap();

            let now = Utc::now();
            db.mark_feed_fetched(first.id, now).await.unwrap();
            db.mark_feed_fetched(second.id, now - Duration::hours(1))
                .await
                .unwrap();

            let next = db.get_next_feed_to_fetch().await.unwrap().unwrap();
            assert_eq!(next.id, second.id);
        }

        #[tokio::test]
        async fn test_mark_fetched_sets_timestamp() {
            let db = create_test_db().await;
            let (_, feed) = create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;

            let at = Utc::now();
            db.mark_feed_fetched(feed.id, at).await.unwrap();

            let feed = db.get_feed(feed.id).await.unwrap().unwrap();
            let stored = feed.last_fetched_at.unwrap();
            assert!((stored - at).num_milliseconds().abs() < 1);
        }

        #[tokio::test]
        async fn test_mark_missing_feed() {
            let db = create_test_db().await;
            let err = db.mark_feed_fetched(7, Utc::now()).await.unwrap_err();
            assert!(matches!(err, StoreError::NotFound(_)));
        }

        #[tokio::test]
        async fn test_record_fetch_result() {
            let db = create_test_db().await;
            let (_, feed) = create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;

            db.record_fetch_result(feed.id, Some("connection refused"))
                .await
                .unwrap();
            let stored = db.get_feed(feed.id).await.unwrap().unwrap();
            assert_eq!(stored.last_error.as_deref(), Some("connection refused"));

            db.record_fetch_result(feed.id, None).await.unwrap();
            let stored = db.get_feed(feed.id).await.unwrap().unwrap();
            assert!(stored.last_error.is_none());
        }
    }

    mod post_tests {
        use super::*;

        #[tokio::test]
        async fn test_create_post() {
            let db = create_test_db().await;
            let (_, feed) = create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;

            let post = db
                .create_post(&new_post(feed.id, "https://a.example.com/1", Utc::now()))
                .await
                .unwrap();
            assert_eq!(post.feed_id, feed.id);
            assert_eq!(post.url, "https://a.example.com/1");
            assert_eq!(db.get_post_count_for_feed(feed.id).await.unwrap(), 1);
        }

        #[tokio::test]
        async fn test_duplicate_post_is_rejected_not_overwritten() {
            let db = create_test_db().await;
            let (alice, feed) =
                create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;

            db.create_post(&new_post(feed.id, "https://a.example.com/1", Utc::now()))
                .await
                .unwrap();

            let mut again = new_post(feed.id, "https://a.example.com/1", Utc::now());
            again.title = "Changed";
            let err = db.create_post(&again).await.unwrap_err();
            assert!(err.is_duplicate());

            let posts = db.get_posts_for_user(alice.id, 10).await.unwrap();
            assert_eq!(posts.len(), 1);
            assert_eq!(posts[0].title, "Title");
        }

        #[tokio::test]
        async fn test_posts_for_user_newest_first_with_limit() {
            let db = create_test_db().await;
            let (alice, feed) =
                create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;

            let now = Utc::now();
            for i in 1..=5 {
                let url = format!("https://a.example.com/{}", i);
                db.create_post(&new_post(feed.id, &url, now - Duration::hours(5 - i)))
                    .await
                    .unwrap();
            }

            let posts = db.get_posts_for_user(alice.id, 2).await.unwrap();
            assert_eq!(posts.len(), 2);
            assert_eq!(posts[0].url, "https://a.example.com/5");
            assert_eq!(posts[1].url, "https://a.example.com/4");
        }

        #[tokio::test]
        async fn test_posts_only_from_followed_feeds() {
            let db = create_test_db().await;
            let (_, feed) = create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;
            let bob = db.create_user("bob").await.unwrap();

            db.create_post(&new_post(feed.id, "https://a.example.com/1", Utc::now()))
                .await
                .unwrap();

            assert!(db.get_posts_for_user(bob.id, 10).await.unwrap().is_empty());
        }
    }

    mod reset_tests {
        use super::*;

        #[tokio::test]
        async fn test_reset_clears_everything() {
            let db = create_test_db().await;
            let (alice, feed) =
                create_user_with_feed(&db, "alice", "https://a.example.com/rss").await;
            db.create_post(&new_post(feed.id, "https://a.example.com/1", Utc::now()))
                .await
                .unwrap();

            db.reset().await.unwrap();

            assert!(db.get_users().await.unwrap().is_empty());
            assert!(db.get_feeds_with_owner().await.unwrap().is_empty());
            assert!(db.get_feed_follows_for_user(alice.id).await.unwrap().is_empty());
            assert_eq!(db.get_post_count_for_feed(feed.id).await.unwrap(), 0);
        }
    }
}
