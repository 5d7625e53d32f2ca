use std::{num::NonZeroUsize, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{fetch::RetryPolicy, StreamError, StreamResult};

pub const DEFAULT_SEGMENT_COUNT: usize = 10;
pub const MAX_SEGMENT_COUNT: usize = 10_000;
pub const DEFAULT_MIME_TYPE: &str = "audio/mpeg";

/// Fraction of a segment's playback window after which the following segment is requested.
pub const DEFAULT_PREFETCH_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Number of segments every asset is split into.
    pub segment_count: NonZeroUsize,
    pub mime_type: String,
    pub prefetch_threshold: f64,

    /// Extra attempts for a failed segment fetch before the session errors out.
    pub retries: u32,
    /// Delay before the n-th retry is `n * retry_backoff_ms`.
    pub retry_backoff_ms: u64,
    /// `0` disables request timeouts.
    pub request_timeout_secs: u64,

    /// Cross-check the declared size with a HEAD request.
    pub verify_size: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            segment_count: NonZeroUsize::new(DEFAULT_SEGMENT_COUNT).unwrap(),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            prefetch_threshold: DEFAULT_PREFETCH_THRESHOLD,
            retries: 2,
            retry_backoff_ms: 500,
            request_timeout_secs: 30,
            verify_size: true,
        }
    }
}

impl StreamConfig {
    pub fn load(path: impl AsRef<Path>) -> StreamResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_toml(&data)
    }

    pub fn from_toml(data: &str) -> StreamResult<Self> {
        let config: Self = toml::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot make progress with.
    ///
    /// A threshold above `1` would only request the next segment after playback ran past the
    /// buffered data, which never happens.
    pub fn validate(&self) -> StreamResult<()> {
        if !(self.prefetch_threshold > 0. && self.prefetch_threshold <= 1.) {
            return Err(StreamError::InvalidConfig(format!(
                "prefetch_threshold must be in (0, 1], got {}",
                self.prefetch_threshold
            )));
        }
        if self.segment_count.get() > MAX_SEGMENT_COUNT {
            return Err(StreamError::InvalidConfig(format!(
                "segment_count must be at most {MAX_SEGMENT_COUNT}, got {}",
                self.segment_count
            )));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}
