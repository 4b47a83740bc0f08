use reqwest::StatusCode;

use crate::timestamp::UnparseableTimestamp;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(anyhow::Error),

    #[error("{what}")]
    Store {
        what: &'static str,

        #[source]
        source: sqlx::Error,
    },

    #[error("could not prepare a database schema")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A unique constraint rejected the write. Ingestion treats this as a duplicate, not a failure.
    #[error("{what}: a record with the same key already exists")]
    UniqueViolation { what: &'static str },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("no feeds are registered")]
    NoFeeds,

    #[error("failed to fetch feed: status code {}", .0.as_u16())]
    FetchFailed(StatusCode),

    #[error("failed to fetch feed")]
    Transport(#[source] reqwest::Error),

    #[error("could not decode the feed document")]
    MalformedFeed(#[source] rss::Error),

    #[error(transparent)]
    UnparseableTimestamp(#[from] UnparseableTimestamp),

    #[error("the operation was cancelled")]
    Cancelled,

    #[error("no such command: `{0}`")]
    UnknownCommand(String),

    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("usage: {0}")]
    Usage(String),
}

impl Error {
    pub fn config(e: impl Into<anyhow::Error>) -> Self {
        Self::Config(e.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn usage(usage: impl Into<String>) -> Self {
        Self::Usage(usage.into())
    }
}

/// Classifies a database error by its kind, attaching `what` as the context message.
pub fn store_err(what: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |source| match &source {
        sqlx::Error::Database(db) if db.is_unique_violation() => Error::UniqueViolation { what },
        _ => Error::Store { what, source },
    }
}
