use std::time::Duration;

use html_escape::decode_html_entities;
use reqwest::{header, StatusCode};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDocument {
    pub title: String,
    pub link: String,
    pub description: String,
    pub entries: Vec<FeedEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub description: Option<String>,

    /// As written in the feed; normalized at ingestion.
    pub pub_date: String,
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    http_client: reqwest::Client,
}

impl Fetcher {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .timeout(cfg.request_timeout.into())
            .user_agent(cfg.user_agent.as_str())
            .build()
            .map_err(|e| {
                Error::config(anyhow::Error::new(e).context("could not create an HTTP client"))
            })?;

        Ok(Self { http_client })
    }

    /// Downloads and decodes the RSS document at `url`. Cancelling `cancel` aborts the request.
    #[instrument(level = "DEBUG", skip(self, cancel))]
    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<FeedDocument> {
        let body = select! {
            _ = cancel.cancelled() => {
                debug!("Received a cancellation signal; aborting the request");

                return Err(Error::Cancelled);
            }

            body = self.download(url) => body?,
        };

        debug!(len = body.len(), "Downloaded the feed");

        decode(&body)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http_client
            .get(url)
            .header(header::ACCEPT, "application/rss+xml, application/xml, text/xml")
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = response.status();

        if status != StatusCode::OK {
            return Err(Error::FetchFailed(status));
        }

        let body = response.bytes().await.map_err(Error::Transport)?;

        Ok(body.to_vec())
    }
}

fn unescape(s: &str) -> String {
    decode_html_entities(s).into_owned()
}

/// Decodes an RSS channel, unescaping HTML entities in titles and descriptions.
pub fn decode(body: &[u8]) -> Result<FeedDocument> {
    let channel = rss::Channel::read_from(body).map_err(Error::MalformedFeed)?;

    let entries = channel
        .items()
        .iter()
        .map(|item| FeedEntry {
            title: unescape(item.title().unwrap_or_default()),
            link: item.link().unwrap_or_default().into(),
            description: item
                .description()
                .map(unescape)
                .filter(|description| !description.is_empty()),
            pub_date: item.pub_date().unwrap_or_default().into(),
        })
        .collect();

    Ok(FeedDocument {
        title: unescape(channel.title()),
        link: channel.link().into(),
        description: unescape(channel.description()),
        entries,
    })
}
