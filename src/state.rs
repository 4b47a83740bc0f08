use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ConfigFile;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::storage::Storage;

/// Everything a command handler may touch. Lives for the whole process.
pub struct State {
    pub storage: Arc<Storage>,
    pub cfg: ConfigFile,
    pub fetcher: Fetcher,

    /// Ends a running poller at the next cycle boundary.
    pub stop: CancellationToken,

    /// Interrupts a fetch in progress.
    pub abort: CancellationToken,
}

impl State {
    pub async fn new(cfg: ConfigFile, stop: CancellationToken, abort: CancellationToken) -> Result<Self> {
        let storage = Arc::new(Storage::new(&cfg.config().db_path).await?);

        Self::with_storage(cfg, storage, stop, abort)
    }

    pub fn with_storage(
        cfg: ConfigFile,
        storage: Arc<Storage>,
        stop: CancellationToken,
        abort: CancellationToken,
    ) -> Result<Self> {
        let fetcher = Fetcher::new(cfg.config())?;

        Ok(State {
            storage,
            cfg,
            fetcher,
            stop,
            abort,
        })
    }
}
