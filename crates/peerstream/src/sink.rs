use bytes::Bytes;

use crate::{
    playback::{PlaybackBuffer, ReadyState},
    util::range::ByteRange,
    StreamError, StreamResult,
};

/// Feeds fetched ranges into the playback buffer.
///
/// Ranges must arrive contiguous and in increasing offset order. Reordering is not supported;
/// the scheduler's single in-flight fetch is what keeps this true.
pub struct BufferSink<B> {
    buffer: B,
    next_offset: u64,
    ended: bool,
}

impl<B> BufferSink<B>
where
    B: PlaybackBuffer,
{
    pub fn new(buffer: B) -> Self {
        Self {
            buffer,
            next_offset: 0,
            ended: false,
        }
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn is_ready(&self) -> bool {
        self.buffer.ready_state() == ReadyState::Open
    }

    pub fn append_range(&mut self, range: ByteRange, data: Bytes) -> StreamResult<()> {
        if self.ended {
            return Err(StreamError::BufferClosed);
        }
        if range.start != self.next_offset {
            return Err(StreamError::OutOfOrderAppend {
                expected: self.next_offset,
                actual: range.start,
            });
        }

        if !data.is_empty() {
            self.buffer.append(data)?;
        }
        self.next_offset = range.end;
        Ok(())
    }

    /// Abort the append in progress. Only valid while the buffer is open.
    pub fn abort(&mut self) -> StreamResult<()> {
        if !self.is_ready() {
            return Err(StreamError::SeekDuringUnreadyBuffer);
        }
        self.buffer.abort()
    }

    pub fn signal_end_of_stream(&mut self) -> StreamResult<()> {
        if self.ended {
            return Err(StreamError::EndOfStreamAlreadySignaled);
        }
        self.buffer.end_of_stream()?;
        self.ended = true;
        Ok(())
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }
}
