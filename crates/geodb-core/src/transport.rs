use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::error::{ConfigError, TransportError};

/// Response body delivered chunk by chunk. Dropping it releases the
/// underlying connection.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Request/response seam used for both the version token and the artifact.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a request for `url`.
    ///
    /// # Errors
    /// Returns `UnexpectedStatus` for a non-success status (no stream is
    /// produced) and `NetworkFailure` for connection problems and timeouts.
    async fn fetch(&self, url: &str) -> Result<ByteStream, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport whose requests, bodies included, are bounded by
    /// `timeout`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(30)))
            .user_agent(format!("geodb/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| ConfigError::HttpClient(error.to_string()))?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str) -> Result<ByteStream, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|error| TransportError::network(url, describe(&error)))?;

        if !response.status().is_success() {
            return Err(TransportError::UnexpectedStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let owned_url = url.to_string();
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map_err(|error| TransportError::network(&owned_url, describe(&error)))
            })
            .boxed())
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("timed out: {error}")
    } else {
        error.to_string()
    }
}
