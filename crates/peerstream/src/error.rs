use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Streamable file not found: {0}")]
    MetadataUnavailable(String),

    #[error("Streamable file not valid: {0}")]
    InvalidMetadata(String),

    #[error("Segment {index} fetch failed: {source}")]
    SegmentFetch {
        index: usize,
        #[source]
        source: Box<StreamError>,
    },

    #[error("Segment {index} returned {actual} bytes, expected {expected}")]
    SegmentLengthMismatch {
        index: usize,
        expected: u64,
        actual: u64,
    },

    #[error("Out of order append: expected offset {expected}, got {actual}")]
    OutOfOrderAppend { expected: u64, actual: u64 },

    #[error("End of stream has already been signaled")]
    EndOfStreamAlreadySignaled,

    #[error("Seeking but playback buffer is not open")]
    SeekDuringUnreadyBuffer,

    #[error("Playback buffer is closed")]
    BufferClosed,

    #[error("Playback element does not support {0}")]
    UnsupportedCapability(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    ConfigError(#[from] toml::de::Error),

    #[error(transparent)]
    TaskError(#[from] tokio::task::JoinError),
}

impl StreamError {
    /// Message raised to the user when a session ends with this error.
    pub fn alert(&self) -> String {
        match self {
            Self::MetadataUnavailable(_) | Self::HttpError(_) | Self::RequestError(_) => {
                "Error, streamable file not found.".to_string()
            }
            Self::InvalidMetadata(_) | Self::JsonError(_) => {
                "Error, streamable file not valid.".to_string()
            }
            Self::SegmentFetch { index, .. } => {
                format!("Error, failed to download segment {index} of the stream.")
            }
            e => format!("Error, streaming stopped: {e}"),
        }
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
