use crate::util::range::ByteRange;

/// A remote audio file as announced by the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub name: String,
    pub total_size: u64,
    pub mime_type: String,
    /// Reported by the playback element once it has decoded enough data.
    pub total_duration: Option<f64>,
}

impl Asset {
    pub fn new(name: impl Into<String>, total_size: u64, mime_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            total_size,
            mime_type: mime_type.into(),
            total_duration: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub range: ByteRange,
    pub requested: bool,
    pub fetched: bool,
}

impl Segment {
    pub fn new(index: usize, range: ByteRange) -> Self {
        Self {
            index,
            range,
            requested: false,
            fetched: false,
        }
    }
}

/// A segment fetch the scheduler wants issued.
///
/// `ticket` identifies this particular issuance; completions carrying an older ticket belong
/// to a cancelled request and must not reach the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRequest {
    pub index: usize,
    pub range: ByteRange,
    pub ticket: u64,
}
