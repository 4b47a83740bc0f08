pub mod entities;

use std::path::Path;

use anyhow::anyhow;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::error::{store_err, Error, Result};

use self::entities::{Feed, FeedFollowInfo, FeedInfo, NewPost, Post, User};

const FEED_COLUMNS: &str = "id, created_at, updated_at, name, url, user_id, last_fetched_at";
const POST_COLUMNS: &str =
    "id, created_at, updated_at, title, url, description, published_at, feed_id";

static TIMESTAMP_FORMAT: &[BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z");

/// Renders `at` as fixed-width UTC RFC 3339 text, so that comparing the stored strings compares
/// the instants.
fn timestamp(at: OffsetDateTime) -> Result<String> {
    let encode_err = |source| Error::Store {
        what: "could not encode a timestamp",
        source: sqlx::Error::Encode(source),
    };

    let utc = at
        .checked_to_offset(UtcOffset::UTC)
        .filter(|utc| (0..=9999).contains(&utc.year()))
        .ok_or_else(|| encode_err(format!("{at} is out of range").into()))?;

    utc.format(TIMESTAMP_FORMAT)
        .map_err(|e| encode_err(Box::new(e)))
}

pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        let pool = SqlitePoolOptions::new()
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .foreign_keys(true)
                    .journal_mode(SqliteJournalMode::Delete)
                    .create_if_missing(true),
            )
            .await
            .map_err(|e| {
                Error::config(anyhow::Error::new(e).context(anyhow!(
                    "could not open a SQLite database `{}`",
                    db_path.display()
                )))
            })?;
        info!("Using an SQLite database `{}`", db_path.display());

        Self::from_pool(pool).await
    }

    /// Opens a private in-memory database. The pool holds exactly one connection, since every
    /// connection to `:memory:` sees a database of its own.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::new().in_memory(true).foreign_keys(true))
            .await
            .map_err(store_err("could not open an in-memory database"))?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn begin(&self) -> Result<Tx> {
        self.pool
            .begin()
            .await
            .map(Tx)
            .map_err(store_err("could not begin a new DB transaction"))
    }
}

pub struct Tx(Transaction<'static, Sqlite>);

impl Tx {
    pub async fn commit(self) -> Result<()> {
        self.0
            .commit()
            .await
            .map_err(store_err("could not commit a DB transaction"))
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn create_user(&mut self, name: &str) -> Result<User> {
        let now = timestamp(OffsetDateTime::now_utc())?;

        sqlx::query_as(
            "INSERT
            INTO users (id, created_at, updated_at, name)
            VALUES (?1, ?2, ?2, ?3)
            RETURNING id, created_at, updated_at, name",
        )
        .bind(Uuid::new_v4())
        .bind(&now)
        .bind(name)
        .fetch_one(self.0.as_mut())
        .await
        .map_err(store_err("could not create a user"))
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_user_by_name(&mut self, name: &str) -> Result<Option<User>> {
        sqlx::query_as(
            "SELECT id, created_at, updated_at, name
            FROM users
            WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(self.0.as_mut())
        .await
        .map_err(store_err("could not retrieve the user"))
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_users(&mut self) -> Result<Vec<User>> {
        sqlx::query_as(
            "SELECT id, created_at, updated_at, name
            FROM users
            ORDER BY name ASC",
        )
        .fetch_all(self.0.as_mut())
        .await
        .map_err(store_err("could not retrieve the user list"))
    }

    /// Deletes every user. Feeds, follows, and posts go with them.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn reset(&mut self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM users")
            .execute(self.0.as_mut())
            .await
            .map_err(store_err("could not reset the database"))?;

        Ok(result.rows_affected())
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn create_feed(&mut self, name: &str, url: &str, user_id: Uuid) -> Result<Feed> {
        let now = timestamp(OffsetDateTime::now_utc())?;

        sqlx::query_as(&format!(
            "INSERT
            INTO feeds (id, created_at, updated_at, name, url, user_id)
            VALUES (?1, ?2, ?2, ?3, ?4, ?5)
            RETURNING {FEED_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&now)
        .bind(name)
        .bind(url)
        .bind(user_id)
        .fetch_one(self.0.as_mut())
        .await
        .map_err(store_err("could not create a feed"))
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_feed_by_url(&mut self, url: &str) -> Result<Option<Feed>> {
        sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS}
            FROM feeds
            WHERE url = ?1"
        ))
        .bind(url)
        .fetch_optional(self.0.as_mut())
        .await
        .map_err(store_err("could not retrieve the feed"))
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_feeds(&mut self) -> Result<Vec<FeedInfo>> {
        sqlx::query_as(
            "SELECT feeds.name AS name, feeds.url AS url, users.name AS user_name
            FROM feeds
              JOIN users ON (feeds.user_id = users.id)
            ORDER BY feeds.created_at ASC",
        )
        .fetch_all(self.0.as_mut())
        .await
        .map_err(store_err("could not retrieve the feed list"))
    }

    /// Picks the feed whose last fetch attempt is the oldest. Feeds never fetched come first.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn next_feed_to_fetch(&mut self) -> Result<Option<Feed>> {
        sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS}
            FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST
            LIMIT 1"
        ))
        .fetch_optional(self.0.as_mut())
        .await
        .map_err(store_err("could not select the next feed to fetch"))
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn mark_fetched(&mut self, feed_id: Uuid, at: OffsetDateTime) -> Result<Feed> {
        sqlx::query_as(&format!(
            "UPDATE feeds
            SET last_fetched_at = ?1, updated_at = ?1
            WHERE id = ?2
            RETURNING {FEED_COLUMNS}"
        ))
        .bind(timestamp(at)?)
        .bind(feed_id)
        .fetch_optional(self.0.as_mut())
        .await
        .map_err(store_err("could not mark the feed as fetched"))?
        .ok_or_else(|| Error::not_found(format!("feed {feed_id}")))
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn create_feed_follow(&mut self, user_id: Uuid, feed_id: Uuid) -> Result<FeedFollowInfo> {
        let now = timestamp(OffsetDateTime::now_utc())?;
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT
            INTO feed_follows (id, created_at, updated_at, user_id, feed_id)
            VALUES (?1, ?2, ?2, ?3, ?4)",
        )
        .bind(id)
        .bind(&now)
        .bind(user_id)
        .bind(feed_id)
        .execute(self.0.as_mut())
        .await
        .map_err(store_err("could not follow the feed"))?;

        sqlx::query_as(
            "SELECT
              feed_follows.id AS id,
              feed_follows.created_at AS created_at,
              users.name AS user_name,
              feeds.name AS feed_name,
              feeds.url AS feed_url
            FROM feed_follows
              JOIN users ON (feed_follows.user_id = users.id)
              JOIN feeds ON (feed_follows.feed_id = feeds.id)
            WHERE feed_follows.id = ?1",
        )
        .bind(id)
        .fetch_one(self.0.as_mut())
        .await
        .map_err(store_err("could not retrieve the new feed follow"))
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_feed_follows_for_user(&mut self, user_id: Uuid) -> Result<Vec<FeedFollowInfo>> {
        sqlx::query_as(
            "SELECT
              feed_follows.id AS id,
              feed_follows.created_at AS created_at,
              users.name AS user_name,
              feeds.name AS feed_name,
              feeds.url AS feed_url
            FROM feed_follows
              JOIN users ON (feed_follows.user_id = users.id)
              JOIN feeds ON (feed_follows.feed_id = feeds.id)
            WHERE feed_follows.user_id = ?1
            ORDER BY feed_follows.created_at ASC",
        )
        .bind(user_id)
        .fetch_all(self.0.as_mut())
        .await
        .map_err(store_err("could not retrieve the followed feeds"))
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn unfollow(&mut self, user_name: &str, feed_url: &str) -> Result<()> {
        let result = sqlx::query(
            "DELETE
            FROM feed_follows
            WHERE user_id = (SELECT id FROM users WHERE name = ?1)
              AND feed_id = (SELECT id FROM feeds WHERE url = ?2)",
        )
        .bind(user_name)
        .bind(feed_url)
        .execute(self.0.as_mut())
        .await
        .map_err(store_err("could not unfollow the feed"))?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!(
                "a follow of `{feed_url}` by `{user_name}`"
            )));
        }

        Ok(())
    }

    /// Fails with [`Error::UniqueViolation`] if the feed already has a post with the same URL.
    #[instrument(level = "TRACE", skip(self, post), fields(url = %post.url))]
    pub async fn create_post(&mut self, post: &NewPost) -> Result<Post> {
        let now = timestamp(OffsetDateTime::now_utc())?;
        debug!(title = %post.title, "Storing post");

        sqlx::query_as(&format!(
            "INSERT
            INTO posts (
              id,
              created_at,
              updated_at,
              title,
              url,
              description,
              published_at,
              feed_id
            ) VALUES (?1, ?2, ?2, ?3, ?4, ?5, ?6, ?7)
            RETURNING {POST_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&now)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(timestamp(post.published_at)?)
        .bind(post.feed_id)
        .fetch_one(self.0.as_mut())
        .await
        .map_err(store_err("could not insert a post"))
    }

    /// Returns the newest posts from the feeds `user_id` follows.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_posts_for_user(&mut self, user_id: Uuid, limit: i64) -> Result<Vec<Post>> {
        sqlx::query_as(
            "SELECT
              posts.id AS id,
              posts.created_at AS created_at,
              posts.updated_at AS updated_at,
              posts.title AS title,
              posts.url AS url,
              posts.description AS description,
              posts.published_at AS published_at,
              posts.feed_id AS feed_id
            FROM posts
              JOIN feed_follows ON (posts.feed_id = feed_follows.feed_id)
            WHERE feed_follows.user_id = ?1
            ORDER BY posts.published_at DESC
            LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.0.as_mut())
        .await
        .map_err(store_err("could not retrieve posts"))
    }

    #[cfg(test)]
    pub async fn get_posts_for_feed(&mut self, feed_id: Uuid) -> Result<Vec<Post>> {
        sqlx::query_as(&format!(
            "SELECT {POST_COLUMNS}
            FROM posts
            WHERE feed_id = ?1
            ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(feed_id)
        .fetch_all(self.0.as_mut())
        .await
        .map_err(store_err("could not retrieve posts"))
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    async fn user_with_feed(storage: &Storage, user: &str, url: &str) -> (User, Feed) {
        let mut tx = storage.begin().await.unwrap();
        let user = tx.create_user(user).await.unwrap();
        let feed = tx.create_feed("Example", url, user.id).await.unwrap();
        tx.commit().await.unwrap();

        (user, feed)
    }

    fn new_post(feed_id: Uuid, url: &str, published_at: OffsetDateTime) -> NewPost {
        NewPost {
            title: format!("Post at {url}"),
            url: url.into(),
            description: None,
            published_at,
            feed_id,
        }
    }

    #[tokio::test]
    async fn duplicate_user_names_are_unique_violations() {
        let storage = Storage::in_memory().await.unwrap();
        let mut tx = storage.begin().await.unwrap();
        tx.create_user("kahya").await.unwrap();

        let err = tx.create_user("kahya").await.unwrap_err();

        assert!(matches!(err, Error::UniqueViolation { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn next_feed_prefers_never_fetched_then_oldest() {
        let storage = Storage::in_memory().await.unwrap();
        let (user, first) = user_with_feed(&storage, "kahya", "https://a.example/rss").await;

        let mut tx = storage.begin().await.unwrap();
        let second = tx
            .create_feed("Second", "https://b.example/rss", user.id)
            .await
            .unwrap();
        tx.mark_fetched(first.id, datetime!(2024-01-01 00:00 UTC))
            .await
            .unwrap();

        assert_eq!(tx.next_feed_to_fetch().await.unwrap().unwrap().id, second.id);

        tx.mark_fetched(second.id, datetime!(2024-01-02 00:00 UTC))
            .await
            .unwrap();

        let next = tx.next_feed_to_fetch().await.unwrap().unwrap();
        assert_eq!(next.id, first.id);
        assert_eq!(next.last_fetched_at, Some(datetime!(2024-01-01 00:00 UTC)));
    }

    #[tokio::test]
    async fn no_feeds_means_no_next_feed() {
        let storage = Storage::in_memory().await.unwrap();
        let mut tx = storage.begin().await.unwrap();

        assert_eq!(tx.next_feed_to_fetch().await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_posts_are_unique_violations() {
        let storage = Storage::in_memory().await.unwrap();
        let (_, feed) = user_with_feed(&storage, "kahya", "https://a.example/rss").await;
        let post = new_post(feed.id, "https://a.example/1", datetime!(2024-01-01 00:00 UTC));

        let mut tx = storage.begin().await.unwrap();
        tx.create_post(&post).await.unwrap();
        let err = tx.create_post(&post).await.unwrap_err();
        assert!(matches!(err, Error::UniqueViolation { .. }), "{err:?}");

        // the transaction is still usable after the violation.
        tx.create_post(&new_post(feed.id, "https://a.example/2", datetime!(2024-01-02 00:00 UTC)))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        assert_eq!(tx.get_posts_for_feed(feed.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn posts_for_user_only_cover_followed_feeds() {
        let storage = Storage::in_memory().await.unwrap();
        let (user, followed) = user_with_feed(&storage, "kahya", "https://a.example/rss").await;

        let mut tx = storage.begin().await.unwrap();
        let other = tx
            .create_feed("Other", "https://b.example/rss", user.id)
            .await
            .unwrap();
        tx.create_feed_follow(user.id, followed.id).await.unwrap();

        for (idx, day) in [1, 3, 2].into_iter().enumerate() {
            let published_at = datetime!(2024-01-01 00:00 UTC) + time::Duration::days(day);
            tx.create_post(&new_post(followed.id, &format!("https://a.example/{idx}"), published_at))
                .await
                .unwrap();
        }

        tx.create_post(&new_post(other.id, "https://b.example/1", datetime!(2025-01-01 00:00 UTC)))
            .await
            .unwrap();

        let posts = tx.get_posts_for_user(user.id, 10).await.unwrap();
        let urls = posts.iter().map(|post| post.url.as_str()).collect::<Vec<_>>();
        assert_eq!(urls, ["https://a.example/1", "https://a.example/2", "https://a.example/0"]);

        assert_eq!(tx.get_posts_for_user(user.id, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fractional_seconds_order_correctly() {
        let storage = Storage::in_memory().await.unwrap();
        let (user, feed) = user_with_feed(&storage, "kahya", "https://a.example/rss").await;

        let mut tx = storage.begin().await.unwrap();
        tx.create_feed_follow(user.id, feed.id).await.unwrap();

        for (url, published_at) in [
            ("https://a.example/whole", datetime!(2024-01-01 00:00:00 UTC)),
            ("https://a.example/half", datetime!(2024-01-01 00:00:00.5 UTC)),
            ("https://a.example/tenth", datetime!(2024-01-01 00:00:01.1 UTC)),
            ("https://a.example/later", datetime!(2024-01-01 00:00:01.15 UTC)),
        ] {
            tx.create_post(&new_post(feed.id, url, published_at)).await.unwrap();
        }

        let posts = tx.get_posts_for_user(user.id, 10).await.unwrap();
        let urls = posts.iter().map(|post| post.url.as_str()).collect::<Vec<_>>();
        assert_eq!(
            urls,
            [
                "https://a.example/later",
                "https://a.example/tenth",
                "https://a.example/half",
                "https://a.example/whole",
            ]
        );
        assert_eq!(posts[2].published_at, datetime!(2024-01-01 00:00:00.5 UTC));
    }

    #[tokio::test]
    async fn fetch_rotation_respects_fractional_seconds() {
        let storage = Storage::in_memory().await.unwrap();
        let (user, first) = user_with_feed(&storage, "kahya", "https://a.example/rss").await;

        let mut tx = storage.begin().await.unwrap();
        let second = tx
            .create_feed("Second", "https://b.example/rss", user.id)
            .await
            .unwrap();
        tx.mark_fetched(first.id, datetime!(2024-01-01 00:00:00.5 UTC))
            .await
            .unwrap();
        tx.mark_fetched(second.id, datetime!(2024-01-01 00:00:01 UTC))
            .await
            .unwrap();

        assert_eq!(tx.next_feed_to_fetch().await.unwrap().unwrap().id, first.id);
    }

    #[test]
    fn timestamps_have_a_fixed_width() {
        assert_eq!(
            timestamp(datetime!(2024-01-01 00:00:00 UTC)).unwrap(),
            "2024-01-01T00:00:00.000000000Z"
        );
        assert_eq!(
            timestamp(datetime!(2024-01-01 02:00:00.5 +2)).unwrap(),
            "2024-01-01T00:00:00.500000000Z"
        );
    }

    #[tokio::test]
    async fn follows_and_unfollows() {
        let storage = Storage::in_memory().await.unwrap();
        let (user, feed) = user_with_feed(&storage, "kahya", "https://a.example/rss").await;

        let mut tx = storage.begin().await.unwrap();
        let follow = tx.create_feed_follow(user.id, feed.id).await.unwrap();
        assert_eq!(follow.user_name, "kahya");
        assert_eq!(follow.feed_name, "Example");

        let err = tx.create_feed_follow(user.id, feed.id).await.unwrap_err();
        assert!(matches!(err, Error::UniqueViolation { .. }), "{err:?}");

        assert_eq!(tx.get_feed_follows_for_user(user.id).await.unwrap().len(), 1);
        tx.unfollow("kahya", "https://a.example/rss").await.unwrap();
        assert!(tx.get_feed_follows_for_user(user.id).await.unwrap().is_empty());

        let err = tx.unfollow("kahya", "https://a.example/rss").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn reset_cascades() {
        let storage = Storage::in_memory().await.unwrap();
        let (_, feed) = user_with_feed(&storage, "kahya", "https://a.example/rss").await;

        let mut tx = storage.begin().await.unwrap();
        tx.create_post(&new_post(feed.id, "https://a.example/1", datetime!(2024-01-01 00:00 UTC)))
            .await
            .unwrap();

        assert_eq!(tx.reset().await.unwrap(), 1);
        assert!(tx.get_users().await.unwrap().is_empty());
        assert!(tx.get_feeds().await.unwrap().is_empty());
        assert!(tx.get_posts_for_feed(feed.id).await.unwrap().is_empty());
    }
}
