use async_trait::async_trait;
use reqwest::Url;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::info;

use crate::config;
use crate::error::{Error, Result};
use crate::scheduler::{relay_interrupts, Scheduler};
use crate::state::State;
use crate::storage::entities::{Post, User};

use super::{current_user, AuthedHandler, Command, Handler};

pub const DEFAULT_BROWSE_LIMIT: i64 = 2;

static DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute] [offset_hour sign:mandatory]:[offset_minute]"
);

pub struct Login;

#[async_trait]
impl Handler for Login {
    async fn run(&self, state: &mut State, cmd: &Command) -> Result<()> {
        let name = cmd.arg(0, "<name>")?;

        let mut tx = state.storage.begin().await?;
        let user = tx.get_user_by_name(name).await?;
        tx.commit().await?;

        let user = user.ok_or_else(|| Error::not_found(format!("user `{name}`")))?;
        state.cfg.set_current_user(&user.name)?;
        println!("Logged in as {}", user.name);

        Ok(())
    }
}

pub struct Register;

#[async_trait]
impl Handler for Register {
    async fn run(&self, state: &mut State, cmd: &Command) -> Result<()> {
        let name = cmd.arg(0, "<name>")?;

        let mut tx = state.storage.begin().await?;
        let user = tx.create_user(name).await?;
        tx.commit().await?;
        info!(user = %user.name, id = %user.id, "Registered a new user");

        state.cfg.set_current_user(&user.name)?;
        println!("Registered and logged in as {}", user.name);

        Ok(())
    }
}

pub struct Reset;

#[async_trait]
impl Handler for Reset {
    async fn run(&self, state: &mut State, _cmd: &Command) -> Result<()> {
        let mut tx = state.storage.begin().await?;
        let deleted = tx.reset().await?;
        tx.commit().await?;
        info!(deleted, "Deleted all users");

        println!("Database reset");

        Ok(())
    }
}

pub struct Users;

#[async_trait]
impl Handler for Users {
    async fn run(&self, state: &mut State, _cmd: &Command) -> Result<()> {
        let mut tx = state.storage.begin().await?;
        let users = tx.get_users().await?;
        tx.commit().await?;

        let current = state.cfg.current_user_name();

        for user in users {
            if Some(user.name.as_str()) == current {
                println!("* {} (current)", user.name);
            } else {
                println!("* {}", user.name);
            }
        }

        Ok(())
    }
}

pub struct Agg;

#[async_trait]
impl Handler for Agg {
    async fn run(&self, state: &mut State, cmd: &Command) -> Result<()> {
        let interval = cmd
            .arg(0, "<interval>")?
            .parse::<config::Duration>()
            .map_err(|e| Error::usage(format!("agg <interval>: {e}")))?;
        let scheduler = Scheduler::new(
            state.storage.clone(),
            state.fetcher.clone(),
            interval.into(),
        )?;

        println!("Collecting feeds every {interval}");

        // Ctrl-C is only intercepted while polling.
        let interrupts = tokio::spawn(relay_interrupts(
            tokio::signal::ctrl_c,
            state.stop.clone(),
            state.abort.clone(),
        ));
        let result = scheduler.run(state.stop.clone(), state.abort.clone()).await;
        interrupts.abort();

        result
    }
}

pub struct AddFeed;

#[async_trait]
impl AuthedHandler for AddFeed {
    async fn run(&self, state: &mut State, cmd: &Command, user: &User) -> Result<()> {
        let name = cmd.arg(0, "<name> <url>")?;
        let url = cmd.arg(1, "<name> <url>")?;
        Url::parse(url).map_err(|e| Error::usage(format!("`{url}` is not a valid URL: {e}")))?;

        let mut tx = state.storage.begin().await?;
        let feed = tx.create_feed(name, url, user.id).await?;
        tx.create_feed_follow(user.id, feed.id).await?;
        tx.commit().await?;
        info!(feed = %feed.name, id = %feed.id, "Added a feed");

        println!("Added {} ({}), followed by {}", feed.name, feed.url, user.name);

        Ok(())
    }
}

pub struct Feeds;

#[async_trait]
impl Handler for Feeds {
    async fn run(&self, state: &mut State, _cmd: &Command) -> Result<()> {
        let mut tx = state.storage.begin().await?;
        let feeds = tx.get_feeds().await?;
        tx.commit().await?;

        for feed in feeds {
            println!("* {} ({}), added by {}", feed.name, feed.url, feed.user_name);
        }

        Ok(())
    }
}

pub struct Follow;

#[async_trait]
impl AuthedHandler for Follow {
    async fn run(&self, state: &mut State, cmd: &Command, user: &User) -> Result<()> {
        let url = cmd.arg(0, "<url>")?;

        let mut tx = state.storage.begin().await?;
        let feed = tx
            .get_feed_by_url(url)
            .await?
            .ok_or_else(|| Error::not_found(format!("feed `{url}`")))?;
        let follow = tx.create_feed_follow(user.id, feed.id).await?;
        tx.commit().await?;

        println!("{} now follows {}", follow.user_name, follow.feed_name);

        Ok(())
    }
}

pub struct Following;

#[async_trait]
impl AuthedHandler for Following {
    async fn run(&self, state: &mut State, _cmd: &Command, user: &User) -> Result<()> {
        let mut tx = state.storage.begin().await?;
        let follows = tx.get_feed_follows_for_user(user.id).await?;
        tx.commit().await?;

        for follow in follows {
            println!("* {} ({})", follow.feed_name, follow.feed_url);
        }

        Ok(())
    }
}

pub struct Unfollow;

#[async_trait]
impl AuthedHandler for Unfollow {
    async fn run(&self, state: &mut State, cmd: &Command, user: &User) -> Result<()> {
        let url = cmd.arg(0, "<url>")?;

        let mut tx = state.storage.begin().await?;
        tx.unfollow(&user.name, url).await?;
        tx.commit().await?;

        println!("{} no longer follows {url}", user.name);

        Ok(())
    }
}

pub struct Browse;

impl Browse {
    pub fn limit(cmd: &Command) -> Result<i64> {
        match cmd.args.first() {
            None => Ok(DEFAULT_BROWSE_LIMIT),

            Some(limit) => limit
                .parse::<u32>()
                .map(i64::from)
                .map_err(|e| Error::usage(format!("browse [limit]: `{limit}`: {e}"))),
        }
    }

    /// Returns up to `limit` of the newest posts from the feeds the current user follows.
    pub async fn posts(state: &State, limit: i64) -> Result<Vec<Post>> {
        let user = current_user(state).await?;

        let mut tx = state.storage.begin().await?;
        let posts = tx.get_posts_for_user(user.id, limit).await?;
        tx.commit().await?;

        Ok(posts)
    }
}

#[async_trait]
impl Handler for Browse {
    async fn run(&self, state: &mut State, cmd: &Command) -> Result<()> {
        let limit = Self::limit(cmd)?;

        for post in Self::posts(state, limit).await? {
            let published = post
                .published_at
                .format(DATE_FORMAT)
                .unwrap_or_else(|_| post.published_at.to_string());

            println!("{} [{published}]", post.title);
            println!("  {}", post.url);

            if let Some(description) = &post.description {
                println!("  {description}");
            }
        }

        Ok(())
    }
}
