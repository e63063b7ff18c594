use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::video::{self, Batch};

pub const DEFAULT_FEED_URL: &str =
    "https://ioeunedt82.execute-api.us-east-1.amazonaws.com/groovi/load_feed";

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("feed: transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("feed: api error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("feed: decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("feed: payload is not a JSON array")]
    NotAnArray,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    endpoint: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("feed client user agent required");
        }
        let endpoint = if config.endpoint.trim().is_empty() {
            DEFAULT_FEED_URL
        } else {
            config.endpoint.trim()
        };
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("feed: parse endpoint {endpoint:?}"))?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()
                .context("feed: build http client")?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    // `last_id` is omitted on the first call of a session.
    pub fn load_feed(
        &self,
        last_id: Option<u64>,
        limit: usize,
    ) -> std::result::Result<Batch, FeedError> {
        let url = feed_url(&self.endpoint, last_id, limit);
        debug!(%url, "feed request");

        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(FeedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = resp.text()?;
        let payload: Value = serde_json::from_str(&text)?;
        video::records_from_payload(payload).ok_or(FeedError::NotAnArray)
    }
}

fn feed_url(endpoint: &Url, last_id: Option<u64>, limit: usize) -> Url {
    let mut url = endpoint.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("limit", &limit.to_string());
        if let Some(last_id) = last_id {
            pairs.append_pair("lastId", &last_id.to_string());
        }
    }
    url
}
