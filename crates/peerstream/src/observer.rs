use tokio::sync::mpsc;

use crate::{
    playback::{PlaybackBuffer, PlaybackEvent},
    scheduler::{Decision, FetchScheduler},
    segment::SegmentRequest,
    sink::BufferSink,
};

/// Listens to the playing element and turns its notifications into scheduling work.
pub struct PlaybackObserver {
    events: Option<mpsc::UnboundedReceiver<PlaybackEvent>>,
    last_position: f64,
}

impl PlaybackObserver {
    pub fn subscribe(events: mpsc::UnboundedReceiver<PlaybackEvent>) -> Self {
        Self {
            events: Some(events),
            last_position: 0.,
        }
    }

    pub fn last_position(&self) -> f64 {
        self.last_position
    }

    pub fn is_attached(&self) -> bool {
        self.events.is_some()
    }

    /// Next notification from the element. `None` means the element is gone or the observer
    /// was detached.
    pub async fn next_event(&mut self) -> Option<PlaybackEvent> {
        let event = self.events.as_mut()?.recv().await;
        if event.is_none() {
            self.detach();
        }
        event
    }

    pub fn on_position_change(
        &mut self,
        current_time: f64,
        scheduler: &mut FetchScheduler,
    ) -> Decision {
        self.last_position = current_time;
        scheduler.maybe_fetch_next(current_time)
    }

    /// Abort the pending append and release the in-flight fetch it belonged to.
    ///
    /// Returns the request whose data must no longer reach the buffer. Seeking before the
    /// buffer is open only gets logged; the element still moves to the new position.
    pub fn on_seek_start<B>(
        &mut self,
        current_time: f64,
        sink: &mut BufferSink<B>,
        scheduler: &mut FetchScheduler,
    ) -> Option<SegmentRequest>
    where
        B: PlaybackBuffer,
    {
        self.last_position = current_time;

        if let Err(e) = sink.abort() {
            tracing::warn!("Seek to {current_time:.2}s ignored: {e}");
            return None;
        }

        let cancelled = scheduler.cancel_in_flight();
        if let Some(request) = &cancelled {
            tracing::debug!(
                "Seek to {current_time:.2}s cancelled fetch of segment {}.",
                request.index
            );
        }
        cancelled
    }

    /// Stop listening to the element altogether.
    pub fn detach(&mut self) {
        self.events = None;
    }
}
