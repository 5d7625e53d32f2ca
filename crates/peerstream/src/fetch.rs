use std::time::Duration;

use bytes::Bytes;
use reqwest::{header::RANGE, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    segment::SegmentRequest,
    util::{http::HttpClient, range::ByteRange},
    StreamError, StreamResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Delay before the `attempt`-th retry, starting at 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// Download one segment, retrying per `policy`.
///
/// Resolves to [`StreamError::Cancelled`] as soon as `cancel` fires, dropping the request in
/// flight. Empty segments never touch the network.
pub async fn fetch_segment(
    client: &HttpClient,
    url: &Url,
    request: &SegmentRequest,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> StreamResult<Bytes> {
    if request.range.is_empty() {
        return Ok(Bytes::new());
    }

    let mut attempt = 0;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            result = fetch_range(client, url, request.index, request.range) => result,
        };

        match result {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                tracing::warn!(
                    "Fetching segment {} failed, retry {attempt}/{} later. {e}",
                    request.index,
                    policy.retries
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                    _ = tokio::time::sleep(policy.delay(attempt)) => {}
                }
            }
            Err(e) => {
                return Err(StreamError::SegmentFetch {
                    index: request.index,
                    source: Box::new(e),
                })
            }
        }
    }
}

async fn fetch_range(
    client: &HttpClient,
    url: &Url,
    index: usize,
    range: ByteRange,
) -> StreamResult<Bytes> {
    let mut request = client.get(url.clone());
    if let Some(header) = range.to_http_range() {
        request = request.header(RANGE, header);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        if let Ok(body) = response.text().await {
            tracing::warn!("Error body: {body}");
        }
        return Err(StreamError::HttpError(status));
    }

    let bytes = response.bytes().await?;
    let bytes = if status == StatusCode::PARTIAL_CONTENT {
        bytes
    } else {
        // the origin ignored the range and sent the whole asset
        let bounds = usize::try_from(range.start)
            .ok()
            .zip(usize::try_from(range.end).ok())
            .filter(|&(_, end)| end <= bytes.len());
        let Some((start, end)) = bounds else {
            return Err(StreamError::SegmentLengthMismatch {
                index,
                expected: range.len(),
                actual: bytes.len() as u64,
            });
        };
        bytes.slice(start..end)
    };

    if bytes.len() as u64 != range.len() {
        return Err(StreamError::SegmentLengthMismatch {
            index,
            expected: range.len(),
            actual: bytes.len() as u64,
        });
    }
    Ok(bytes)
}
