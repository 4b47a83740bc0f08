use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub name: String,
}

#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: Uuid,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub name: String,
    pub url: String,
    pub user_id: Uuid,
    pub last_fetched_at: Option<OffsetDateTime>,
}

/// A feed together with the name of the user who added it.
#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct FeedInfo {
    pub name: String,
    pub url: String,
    pub user_name: String,
}

#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct FeedFollowInfo {
    pub id: Uuid,
    pub created_at: OffsetDateTime,
    pub user_name: String,
    pub feed_name: String,
    pub feed_url: String,
}

#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: Uuid,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: OffsetDateTime,
    pub feed_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: OffsetDateTime,
    pub feed_id: Uuid,
}
