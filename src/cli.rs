use clap::ValueHint;

use std::path::PathBuf;

use crate::commands::Command;

#[derive(clap::Parser, Debug, Clone)]
#[command(version, about)]
pub struct Args {
    /// Path to the config file.
    ///
    /// By default, gator looks for a config file in the following locations (in order):
    ///
    /// - `./gatorconfig.toml`
    /// - `~/.gatorconfig.toml`
    #[arg(
        short,
        env = "GATOR_CONFIG",
        value_hint(ValueHint::FilePath)
    )]
    pub config_path: Option<PathBuf>,

    /// Path to the database file. Overrides the config file.
    #[arg(long, env = "GATOR_DB", value_hint(ValueHint::FilePath))]
    pub db_path: Option<PathBuf>,

    /// The command to run: login, register, reset, users, agg, addfeed, feeds, follow, following,
    /// unfollow, browse.
    pub command: String,

    /// Arguments passed to the command.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl Args {
    pub fn parse() -> Self {
        clap::Parser::parse()
    }

    pub fn command(&self) -> Command {
        Command::new(self.command.clone(), self.args.clone())
    }
}
