use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::select;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::ingest;
use crate::storage::Storage;

/// Drives one ingestion cycle per tick, strictly sequentially.
pub struct Scheduler {
    storage: Arc<Storage>,
    fetcher: Fetcher,
    interval: Duration,
}

impl Scheduler {
    pub fn new(storage: Arc<Storage>, fetcher: Fetcher, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::config(anyhow!("the polling interval must be positive")));
        }

        Ok(Self {
            storage,
            fetcher,
            interval,
        })
    }

    /// Polls until `stop` is cancelled (returns `Ok`) or a cycle fails (returns the error).
    ///
    /// The first cycle runs one full interval after the start. `stop` is only observed between
    /// cycles; `abort` is handed to the fetcher and interrupts a request in flight.
    pub async fn run(self, stop: CancellationToken, abort: CancellationToken) -> Result<()> {
        async move {
            let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    biased;

                    _ = stop.cancelled() => {
                        debug!("Received a cancellation signal; exiting");

                        return Ok(());
                    }

                    _ = ticker.tick() => {}
                }

                let report = ingest::run_cycle(&self.storage, &self.fetcher, &abort).await?;

                debug!(
                    feed = %report.feed.name,
                    created = report.created,
                    skipped = report.skipped,
                    "Scheduling the next cycle in {}s",
                    self.interval.as_secs_f64()
                );
            }
        }
        .instrument(info_span!("scheduler"))
        .await
    }
}

/// Turns interrupts into cancellations: the first one cancels `stop`, the second one `abort`.
///
/// `interrupted` resolves once per interrupt, like [`tokio::signal::ctrl_c`].
pub async fn relay_interrupts<F, Fut>(
    mut interrupted: F,
    stop: CancellationToken,
    abort: CancellationToken,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    for (token, what) in [(stop, "stopping after the current cycle"), (abort, "aborting")] {
        if let Err(e) = interrupted().await {
            warn!("Could not listen for interrupts: {e}");

            return;
        }

        debug!("Interrupted; {what}");
        token.cancel();
    }
}
