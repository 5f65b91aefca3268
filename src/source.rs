//! Backend access for the feed
//!
//! `EventSource` and `ChunkReader` are the seams the session talks through;
//! `HttpEventSource` is the reqwest-backed production implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, Url, header};
use tracing::debug;

use crate::error::{FeedError, Result};
use crate::event::ActivityEvent;

/// Reads raw body chunks from an open stream
#[async_trait]
pub trait ChunkReader: Send {
    /// `Ok(None)` means the server closed the stream cleanly.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Where the feed gets its snapshot and its live stream from
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<ActivityEvent>>;

    async fn open_stream(&self) -> Result<Box<dyn ChunkReader>>;
}

/// Activity endpoints of the cost-tracking backend over HTTP
#[derive(Debug, Clone)]
pub struct HttpEventSource {
    client: Client,
    recent_url: Url,
    stream_url: Url,
    token: Option<String>,
}

impl HttpEventSource {
    pub fn new(client: Client, recent_url: Url, stream_url: Url, token: Option<String>) -> Self {
        Self {
            client,
            recent_url,
            stream_url,
            token,
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Client for request/response calls; the stream client must not carry an
/// overall timeout since the body stays open indefinitely.
pub fn build_client(timeout: Option<Duration>) -> reqwest::Result<Client> {
    let mut builder = Client::builder().user_agent(concat!(
        env!("CARGO_PKG_NAME"),
        "/",
        env!("CARGO_PKG_VERSION")
    ));
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

pub(crate) fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(FeedError::Status {
            status,
            url: response.url().to_string(),
        })
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn fetch_recent(&self, limit: usize) -> Result<Vec<ActivityEvent>> {
        let mut url = self.recent_url.clone();
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());

        let response = self
            .authorize(self.client.get(url))
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        let body = check_status(response)?.bytes().await?;
        let events: Vec<ActivityEvent> = serde_json::from_slice(&body)?;
        debug!(count = events.len(), "fetched recent activity events");
        Ok(events)
    }

    async fn open_stream(&self) -> Result<Box<dyn ChunkReader>> {
        let response = self
            .authorize(self.client.get(self.stream_url.clone()))
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let response = check_status(response)?;
        debug!(url = %self.stream_url, "activity stream opened");
        Ok(Box::new(HttpChunkReader { response }))
    }
}

/// Dropping the reader drops the response, which cancels the body.
struct HttpChunkReader {
    response: Response,
}

#[async_trait]
impl ChunkReader for HttpChunkReader {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let chunk = self.response.chunk().await?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }
}
