use std::fmt;

use serde::{Deserialize, Serialize};

/// Inter-byte sentinel inserted by the sender between payload bytes.
/// The wire value is 0xFF; chunks arrive as uppercase hex text, so the
/// separator is the literal two-character string "FF". The match is
/// case-sensitive: a lowercase "ff" is hex payload, not a separator.
pub const FRAME_SENTINEL: &str = "FF";

/// What to do with a segment that is not valid hexadecimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InvalidSegmentPolicy {
    /// Drop the segment and keep decoding the rest of the chunk.
    #[default]
    Skip,
    /// Fail the whole chunk with `DecodeError::InvalidSegment`.
    Reject,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid hex segment: {0:?}")]
    InvalidSegment(String),
}

/// One decoded frame: the ordered integer values of a single raw chunk.
///
/// Segments are parsed whole, so a conforming sender (two hex digits per
/// byte) always yields values in 0..=255; an unseparated run like "1A2B"
/// decodes to its full value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Frame {
    values: Vec<u32>,
}

impl Frame {
    pub fn values(&self) -> &[u32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Renders the display form: decimal values joined by commas, no trailing
/// separator. An empty frame renders as the empty string.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for value in &self.values {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", value)?;
            first = false;
        }
        Ok(())
    }
}

/// Decoder for sentinel-framed hex chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameDecoder {
    policy: InvalidSegmentPolicy,
}

impl FrameDecoder {
    pub fn new(policy: InvalidSegmentPolicy) -> Self {
        Self { policy }
    }

    /// Decode one raw chunk: split on the sentinel, discard empty segments,
    /// parse the rest as base-16, keep split order.
    pub fn decode(&self, chunk: &str) -> Result<Frame, DecodeError> {
        let mut values = Vec::new();

        for segment in chunk.split(FRAME_SENTINEL).filter(|s| !s.is_empty()) {
            match u32::from_str_radix(segment, 16) {
                Ok(value) => values.push(value),
                Err(_) => match self.policy {
                    InvalidSegmentPolicy::Skip => {
                        log::debug!("Skipping invalid hex segment: {:?}", segment);
                    }
                    InvalidSegmentPolicy::Reject => {
                        return Err(DecodeError::InvalidSegment(segment.to_string()));
                    }
                },
            }
        }

        Ok(Frame { values })
    }
}
