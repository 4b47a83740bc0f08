use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::storage::entities::{Feed, NewPost};
use crate::storage::Storage;
use crate::timestamp;

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub feed: Feed,
    pub created: usize,
    pub skipped: usize,
}

/// Runs one ingestion cycle: picks the least recently attempted feed, stamps it, fetches it, and
/// stores its new entries as posts.
///
/// The feed is stamped before the fetch, so a feed that fails is not retried until every other
/// feed has had its turn. A bad publication date aborts the whole feed before any post is
/// written; entries that were already ingested are skipped.
pub async fn run_cycle(
    storage: &Storage,
    fetcher: &Fetcher,
    cancel: &CancellationToken,
) -> Result<CycleReport> {
    let feed = {
        let mut tx = storage.begin().await?;
        let feed = tx.next_feed_to_fetch().await?.ok_or(Error::NoFeeds)?;
        let feed = tx.mark_fetched(feed.id, OffsetDateTime::now_utc()).await?;
        tx.commit().await?;

        feed
    };

    let span = info_span!("cycle", feed_name = %feed.name, feed_url = %feed.url);

    async move {
        debug!("Marked the feed as fetched");

        let document = fetcher.fetch(&feed.url, cancel).await?;
        info!(title = %document.title, "Retrieved {} entries", document.entries.len());

        let posts = document
            .entries
            .into_iter()
            .map(|entry| -> Result<NewPost> {
                Ok(NewPost {
                    published_at: timestamp::normalize(&entry.pub_date)?,
                    title: entry.title,
                    url: entry.link,
                    description: entry.description,
                    feed_id: feed.id,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut created = 0;
        let mut skipped = 0;

        for post in posts {
            let mut tx = storage.begin().await?;

            match tx.create_post(&post).await {
                Ok(_) => created += 1,

                Err(Error::UniqueViolation { .. }) => {
                    debug!(url = %post.url, "Post already exists, skipping");
                    skipped += 1;

                    continue;
                }

                Err(e) => {
                    debug!(url = %post.url, "Could not create a post");

                    return Err(e);
                }
            }

            tx.commit().await?;
        }

        info!(created, skipped, "Finished the ingestion cycle");

        Ok(CycleReport {
            feed,
            created,
            skipped,
        })
    }
    .instrument(span)
    .await
}
