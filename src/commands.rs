mod handlers;

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info_span, Instrument};

use crate::error::{Error, Result};
use crate::state::State;
use crate::storage::entities::User;

pub use self::handlers::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Returns the argument at `idx`, or a usage error built from `usage` if there are too few.
    pub fn arg(&self, idx: usize, usage: &str) -> Result<&str> {
        self.args
            .get(idx)
            .map(String::as_str)
            .ok_or_else(|| Error::usage(format!("{} {usage}", self.name)))
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn run(&self, state: &mut State, cmd: &Command) -> Result<()>;
}

/// A handler that acts on behalf of the current user.
#[async_trait]
pub trait AuthedHandler: Send + Sync {
    async fn run(&self, state: &mut State, cmd: &Command, user: &User) -> Result<()>;
}

/// Adapts an [`AuthedHandler`] into a [`Handler`] by resolving the current user first.
pub struct LoggedIn<H>(H);

pub fn logged_in<H: AuthedHandler>(handler: H) -> LoggedIn<H> {
    LoggedIn(handler)
}

#[async_trait]
impl<H: AuthedHandler> Handler for LoggedIn<H> {
    async fn run(&self, state: &mut State, cmd: &Command) -> Result<()> {
        let user = current_user(state).await?;
        debug!(user = %user.name, "Resolved the current user");

        self.0.run(state, cmd, &user).await
    }
}

/// Looks up the user named in the config. Fails with [`Error::NotAuthenticated`] if the name is
/// unset or no longer exists.
pub async fn current_user(state: &State) -> Result<User> {
    let Some(name) = state.cfg.current_user_name() else {
        return Err(Error::NotAuthenticated(
            "no user is logged in (use `login` or `register`)".into(),
        ));
    };

    let mut tx = state.storage.begin().await?;
    let user = tx.get_user_by_name(name).await?;
    tx.commit().await?;

    user.ok_or_else(|| Error::NotAuthenticated(format!("user `{name}` does not exist")))
}

#[derive(Default)]
pub struct Commands {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl Commands {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers `handler` under `name`, replacing any earlier registration.
    pub fn register(&mut self, name: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        let name = name.into();

        if self.handlers.insert(name.clone(), Box::new(handler)).is_some() {
            debug!(%name, "Replaced a command handler");
        }

        self
    }

    pub async fn run(&self, state: &mut State, cmd: &Command) -> Result<()> {
        let handler = self
            .handlers
            .get(&cmd.name)
            .ok_or_else(|| Error::UnknownCommand(cmd.name.clone()))?;

        handler
            .run(state, cmd)
            .instrument(info_span!("command", name = %cmd.name))
            .await
    }
}

/// Returns the registry of every command gator understands.
pub fn all() -> Commands {
    let mut commands = Commands::new();

    commands
        .register("login", Login)
        .register("register", Register)
        .register("reset", Reset)
        .register("users", Users)
        .register("agg", Agg)
        .register("addfeed", logged_in(AddFeed))
        .register("feeds", Feeds)
        .register("follow", logged_in(Follow))
        .register("following", logged_in(Following))
        .register("unfollow", logged_in(Unfollow))
        .register("browse", Browse);

    commands
}
