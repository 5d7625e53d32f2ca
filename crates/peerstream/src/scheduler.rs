//! Decides which segment to download next from the playback position.
//!
//! Issuance is completion gated: while a segment is in flight nothing else is issued, so the
//! buffer always receives segments in byte order no matter how the network reorders responses.

use crate::segment::{Segment, SegmentRequest};

/// What the session should do after feeding a position to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Issue this request. The segment is already marked as requested.
    Fetch(SegmentRequest),
    /// Every segment has been appended and playback reached the last one.
    Complete,
    Idle,
}

/// Number of segments consumed so far, counting the one currently playing.
///
/// Always within `[1, segment_count]`. A duration that cannot map positions yields `1`.
pub fn current_segment_index(current_time: f64, segment_duration: f64, segment_count: usize) -> usize {
    let count = segment_count.max(1);
    if !(segment_duration > 0.) {
        return 1;
    }

    let consumed = (current_time / segment_duration).floor();
    if !(consumed >= 0.) {
        return 1;
    }
    // float to int casts saturate
    (consumed as usize).saturating_add(1).clamp(1, count)
}

#[derive(Debug)]
pub struct FetchScheduler {
    segments: Vec<Segment>,
    segment_duration: Option<f64>,
    threshold: f64,

    bytes_fetched: u64,
    in_flight: Option<SegmentRequest>,
    next_ticket: u64,
    completed: bool,
}

impl FetchScheduler {
    pub fn new(segments: Vec<Segment>, threshold: f64) -> Self {
        Self {
            segments,
            segment_duration: None,
            threshold,
            bytes_fetched: 0,
            in_flight: None,
            next_ticket: 0,
            completed: false,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn bytes_fetched(&self) -> u64 {
        self.bytes_fetched
    }

    pub fn segment_duration(&self) -> Option<f64> {
        self.segment_duration
    }

    pub fn set_segment_duration(&mut self, segment_duration: Option<f64>) {
        self.segment_duration = segment_duration;
    }

    pub fn in_flight(&self) -> Option<&SegmentRequest> {
        self.in_flight.as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn all_requested(&self) -> bool {
        self.segments.iter().all(|s| s.requested)
    }

    /// Issue the first segment. Playback has not started yet, so no threshold applies.
    pub fn start(&mut self) -> Option<SegmentRequest> {
        match self.segments.first() {
            Some(first) if !first.requested => Some(self.dispatch(0)),
            _ => None,
        }
    }

    pub fn maybe_fetch_next(&mut self, current_time: f64) -> Decision {
        if self.completed || self.in_flight.is_some() {
            return Decision::Idle;
        }

        // a seek dropped this one; it is next in byte order, so it goes first
        if let Some(index) = self.segments.iter().position(|s| s.requested && !s.fetched) {
            tracing::debug!("Re-issuing segment {index} after cancellation.");
            return Decision::Fetch(self.dispatch(index));
        }

        let Some(segment_duration) = self.segment_duration else {
            return Decision::Idle;
        };
        let count = self.segment_count();
        let current = current_segment_index(current_time, segment_duration, count);

        let Some(next) = self.segments.iter().position(|s| !s.requested) else {
            if current == count {
                self.completed = true;
                return Decision::Complete;
            }
            return Decision::Idle;
        };

        // `next < current` only happens after a forward seek skipped segments
        let threshold = self.threshold * segment_duration * current as f64;
        if next < current || (next == current && current_time > threshold) {
            tracing::debug!(
                "Position {current_time:.2}s passed {threshold:.2}s, fetching segment {next}."
            );
            return Decision::Fetch(self.dispatch(next));
        }

        Decision::Idle
    }

    /// Whether a completion for `request` may still reach the buffer.
    pub fn accepts(&self, request: &SegmentRequest) -> bool {
        self.in_flight.as_ref() == Some(request)
    }

    /// Record that `request` was appended. Stale requests are ignored and return `false`.
    pub fn complete_fetch(&mut self, request: &SegmentRequest, length: u64) -> bool {
        if !self.accepts(request) {
            return false;
        }
        self.in_flight = None;

        let segment = &mut self.segments[request.index];
        segment.fetched = true;
        self.bytes_fetched += length;
        true
    }

    /// Give up the in-flight slot, e.g. because a seek aborted the pending append.
    ///
    /// The segment stays requested and is re-issued by the next [`Self::maybe_fetch_next`].
    pub fn cancel_in_flight(&mut self) -> Option<SegmentRequest> {
        self.in_flight.take()
    }

    fn dispatch(&mut self, index: usize) -> SegmentRequest {
        let segment = &mut self.segments[index];
        segment.requested = true;

        let request = SegmentRequest {
            index,
            range: segment.range,
            ticket: self.next_ticket,
        };
        self.next_ticket += 1;
        self.in_flight = Some(request);
        request
    }
}
