use crate::storage::Channel;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

/// Default per-fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
/// Default cap on a feed document's size.
pub const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while retrieving one channel's feed document.
///
/// Every variant is local to the channel being fetched. The orchestrator
/// records it against that channel and carries on with the others.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request and body read exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Body is not valid UTF-8
    #[error("Response is not valid UTF-8")]
    InvalidUtf8,
}

/// Bounds applied to a single fetch.
#[derive(Debug, Clone, Copy)]
pub struct FetchLimits {
    pub timeout: Duration,
    pub max_size: usize,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_FETCH_TIMEOUT,
            max_size: DEFAULT_MAX_FEED_SIZE,
        }
    }
}

/// Retrieves the raw feed document for `channel`.
///
/// One attempt per call; a failed channel is retried by the next pass, not
/// here. The timeout covers both the request and reading the body.
///
/// # Errors
///
/// - [`FetchError::Network`] - Connection or TLS errors
/// - [`FetchError::Timeout`] - Exceeded `limits.timeout`
/// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
/// - [`FetchError::ResponseTooLarge`] - Body exceeded `limits.max_size`
/// - [`FetchError::IncompleteResponse`] - Body shorter than Content-Length
/// - [`FetchError::InvalidUtf8`] - Body could not be decoded
pub async fn fetch_document(
    client: &reqwest::Client,
    channel: &Channel,
    limits: FetchLimits,
) -> Result<String, FetchError> {
    let bytes = tokio::time::timeout(
        limits.timeout,
        fetch_bytes(client, &channel.url, limits.max_size),
    )
    .await
    .map_err(|_| FetchError::Timeout)??;

    tracing::debug!(
        channel = %channel.name,
        bytes = bytes.len(),
        "Fetched feed document"
    );

    let text = String::from_utf8(bytes).map_err(|_| FetchError::InvalidUtf8)?;
    Ok(match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_owned(),
        None => text,
    })
}

async fn fetch_bytes(client: &reqwest::Client, url: &str, limit: usize) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    read_limited_bytes(response, limit).await
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
