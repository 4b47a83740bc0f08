mod types;

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use take_mut::take;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub use self::types::*;

pub const CONFIG_FILE_NAME: &str = "gatorconfig.toml";
pub const HOME_CONFIG_FILE_NAME: &str = ".gatorconfig.toml";

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    env!("CARGO_PKG_NAME").into()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub db_path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_user_name: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout: Duration,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Config {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            current_user_name: None,
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }

    pub fn update(&mut self, args: &crate::cli::Args) {
        if let Some(db_path) = &args.db_path {
            self.db_path = db_path.clone();
        }
    }

    pub fn resolve_relative_paths(&mut self, config_dir: impl AsRef<Path>) {
        let config_dir = config_dir.as_ref();

        // do the dance so that new fields can't be forgotten here.
        take(self, |this| Self {
            db_path: config_dir.join(this.db_path),
            current_user_name: this.current_user_name,
            request_timeout: this.request_timeout,
            user_agent: this.user_agent,
        })
    }
}

/// A loaded config together with the file it came from, so that it can be written back.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    raw: Config,
    config: Config,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>, config: Config) -> Self {
        let path = path.into();
        let mut resolved = config.clone();

        if let Some(parent) = path.parent() {
            resolved.resolve_relative_paths(parent);
        }

        Self {
            path,
            raw: config,
            config: resolved,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn current_user_name(&self) -> Option<&str> {
        self.config.current_user_name.as_deref()
    }

    /// Persists `name` as the current user. The in-memory config is only changed once the write
    /// succeeds.
    pub fn set_current_user(&mut self, name: &str) -> Result<()> {
        let mut raw = self.raw.clone();
        raw.current_user_name = Some(name.into());

        let contents = toml::to_string_pretty(&raw)
            .context("could not serialize the config")
            .map_err(Error::config)?;
        fs::write(&self.path, contents)
            .with_context(|| anyhow!("could not write the config file `{}`", self.path.display()))
            .map_err(Error::config)?;
        debug!(file = %self.path.display(), %name, "Persisted the current user");

        self.raw = raw;
        self.config.current_user_name = Some(name.into());

        Ok(())
    }
}

/// Returns the config search paths: the explicit path first, then the working directory and the
/// home directory.
pub fn search_paths(explicit: Option<PathBuf>) -> Vec<PathBuf> {
    explicit
        .into_iter()
        .chain([PathBuf::from(".").join(CONFIG_FILE_NAME)])
        .chain(std::env::var_os("HOME").map(|home| PathBuf::from(home).join(HOME_CONFIG_FILE_NAME)))
        .collect()
}

pub fn load(search_paths: &[PathBuf]) -> Result<ConfigFile> {
    for path in search_paths {
        debug!("Trying to load {}", path.display());
        let mut contents = String::new();

        {
            let mut f = match File::open(path) {
                Ok(f) => f,

                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(file = %path.display(), "File not found, skipping");
                    continue;
                }

                Err(e) => {
                    return Err(Error::config(anyhow::Error::new(e).context(anyhow!(
                        "could not load a config file `{}`",
                        path.display()
                    ))));
                }
            };

            f.read_to_string(&mut contents)
                .with_context(|| {
                    anyhow!(
                        "could not read the contents of a config file `{}`",
                        path.display()
                    )
                })
                .map_err(Error::config)?;
        }

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| anyhow!("could not load the config file `{}`", path.display()))
            .map_err(Error::config)?;

        if cfg.request_timeout.is_zero() {
            return Err(Error::config(anyhow!(
                "`request-timeout` in the config file `{}` must be positive",
                path.display()
            )));
        }

        info!("Loaded a config file `{}`", path.display());

        return Ok(ConfigFile::new(path, cfg));
    }

    let tried = search_paths
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(Error::config(anyhow!("no config file found (tried {tried})")))
}
