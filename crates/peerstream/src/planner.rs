//! Segment layout of an asset.
//!
//! Everything here is pure and can run before any network activity.

use std::num::NonZeroUsize;

use crate::{segment::Segment, util::range::ByteRange};

/// `round(total_size / segment_count)`, rounding halves up.
pub fn segment_length(total_size: u64, segment_count: NonZeroUsize) -> u64 {
    let count = segment_count.get() as u64;
    total_size / count + u64::from(total_size % count * 2 >= count)
}

/// Split `[0, total_size)` into `segment_count` contiguous ranges.
///
/// Every range has [`segment_length`] bytes except the last one, which ends exactly at
/// `total_size`. When rounding overshoots, trailing segments shrink (possibly to empty) instead
/// of running past the end.
pub fn plan_segments(total_size: u64, segment_count: NonZeroUsize) -> Vec<Segment> {
    let length = segment_length(total_size, segment_count);
    let count = segment_count.get();

    (0..count)
        .map(|index| {
            let start = (index as u64).saturating_mul(length).min(total_size);
            let end = if index + 1 == count {
                total_size
            } else {
                (index as u64 + 1).saturating_mul(length).min(total_size)
            };
            Segment::new(index, ByteRange::new(start, end))
        })
        .collect()
}

/// Playback time covered by one segment, once the element knows the total duration.
pub fn segment_duration(total_duration: f64, segment_count: NonZeroUsize) -> Option<f64> {
    if !total_duration.is_finite() || total_duration <= 0. {
        return None;
    }
    Some(total_duration / segment_count.get() as f64)
}
