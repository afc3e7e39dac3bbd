use std::io;
use std::pin::Pin;
use std::time::Duration;

use futures_util::TryStreamExt;
use log::{debug, warn};
use reqwest::Client;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::error::UpdateError;

const USER_AGENT: &str = concat!("droidpad-updater/", env!("CARGO_PKG_VERSION"));

/// Byte stream of a remote payload plus the size the server announced.
pub struct Payload {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    pub content_length: Option<u64>,
}

#[derive(Clone)]
pub struct NetworkClient {
    client: Client,
}

impl NetworkClient {
    pub fn new(connect_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client }
    }

    /// GET `url` and return the body as text. Non-2xx statuses are errors.
    pub async fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String, UpdateError> {
        debug!("network: GET {url}");
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| UpdateError::FetchTransport(format!("GET {url} failed: {e}")))?
            .error_for_status()
            .map_err(|e| UpdateError::FetchTransport(format!("bad status: {e}")))?;
        response
            .text()
            .await
            .map_err(|e| UpdateError::FetchTransport(format!("body read error: {e}")))
    }

    /// Open `url` as a streaming payload without buffering the body.
    pub async fn open_payload(&self, url: &str) -> Result<Payload, UpdateError> {
        debug!("network: opening payload {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UpdateError::DownloadOpen(format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| UpdateError::DownloadOpen(format!("payload not available: {e}")))?;
        let content_length = response.content_length();
        let stream = response.bytes_stream().map_err(io::Error::other);
        Ok(Payload {
            reader: Box::pin(StreamReader::new(stream)),
            content_length,
        })
    }
}
