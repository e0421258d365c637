//! Labeled time intervals.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrfError};

/// A labeled half-open interval `[start, end)` on the frame timeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub start: i64,
    pub end: i64,
    pub label: String,
}

impl Segment {
    /// Create a segment, rejecting empty or reversed intervals.
    pub fn new(start: i64, end: i64, label: impl Into<String>) -> Result<Self> {
        if start >= end {
            return Err(ScrfError::InvalidSegment { start, end });
        }
        Ok(Self {
            start,
            end,
            label: label.into(),
        })
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    /// Frames shared with `[start, end)`, zero when disjoint.
    pub fn overlap(&self, start: i64, end: i64) -> i64 {
        (self.end.min(end) - self.start.max(start)).max(0)
    }

    /// Length of the smallest interval covering both.
    pub fn union(&self, start: i64, end: i64) -> i64 {
        self.end.max(end) - self.start.min(start)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}) {}", self.start, self.end, self.label)
    }
}

/// Labels of a segmentation, in order.
pub fn labels(segments: &[Segment]) -> Vec<&str> {
    segments.iter().map(|s| s.label.as_str()).collect()
}
