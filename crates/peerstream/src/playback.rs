//! The playback side a session talks to.
//!
//! A [`MediaRuntime`] is the playing element: it either accepts a segmented buffer that the
//! session fills, or is pointed at the full asset URL and left alone. Notifications flow back
//! to the session as [`PlaybackEvent`]s over a single channel.

use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use crate::{segment::Asset, StreamResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Not attached to an element, or torn down.
    Closed,
    /// Accepting data.
    Open,
    /// End of stream was signaled.
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    /// Enough data was decoded to start playing. `duration` is in seconds.
    CanPlay { duration: f64 },
    /// Fires continuously while playing.
    TimeUpdate { current_time: f64 },
    /// The user started seeking to `current_time`.
    Seeking { current_time: f64 },
    Ended,
}

/// Appendable buffer bound to the playing element.
pub trait PlaybackBuffer: Send + 'static {
    fn ready_state(&self) -> ReadyState;

    fn append(&mut self, data: Bytes) -> StreamResult<()>;

    /// Abort the append in progress and reset the parser.
    fn abort(&mut self) -> StreamResult<()>;

    /// No more data will arrive.
    fn end_of_stream(&mut self) -> StreamResult<()>;
}

pub trait MediaRuntime: Send + 'static {
    type Buffer: PlaybackBuffer;

    /// Whether segmented buffering is available for `mime_type`.
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Bind a fresh buffer for `asset` to the element and subscribe to its notifications.
    fn attach_buffer(
        &mut self,
        asset: &Asset,
    ) -> StreamResult<(Self::Buffer, mpsc::UnboundedReceiver<PlaybackEvent>)>;

    /// Point the element at the whole asset. The runtime streams it on its own.
    fn play_direct(&mut self, url: &Url) -> StreamResult<()>;

    /// Unbind whatever source the element is playing.
    fn detach(&mut self) {}
}
