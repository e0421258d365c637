//! # Configuration
//!
//! Segmentation bounds and loss selection. Everything here is parsed and
//! validated once at setup; an unknown name or an out-of-range value never
//! reaches the per-example loop.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrfError};

/// Labels that are penalized by temporal mismatch only.
pub const DEFAULT_STRUCTURAL_LABELS: [&str; 3] = ["<s>", "</s>", "sil"];

/// Bounds on the candidate segments a segmentation lattice contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Shortest segment, in frames.
    pub min_seg: usize,
    /// Longest segment, in frames.
    pub max_seg: usize,
    /// Distance between consecutive lattice vertices, in frames.
    pub stride: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            min_seg: 1,
            max_seg: 20,
            stride: 1,
        }
    }
}

impl SegmentationConfig {
    pub fn with_min_seg(mut self, min_seg: usize) -> Self {
        self.min_seg = min_seg;
        self
    }

    pub fn with_max_seg(mut self, max_seg: usize) -> Self {
        self.max_seg = max_seg;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_seg == 0 {
            return Err(ScrfError::invalid_config(
                "segmentation.min_seg",
                "must be at least 1",
            ));
        }
        if self.max_seg < self.min_seg {
            return Err(ScrfError::invalid_config(
                "segmentation.max_seg",
                format!("{} is below min_seg {}", self.max_seg, self.min_seg),
            ));
        }
        if self.stride == 0 {
            return Err(ScrfError::invalid_config(
                "segmentation.stride",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Training objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    /// Max-margin loss against the cost-augmented best path.
    #[default]
    Hinge,
    /// Negative conditional log-likelihood.
    Log,
    /// Soft margin against a max/mean threshold of edge max-marginals.
    Filtering,
}

impl LossKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossKind::Hinge => "hinge",
            LossKind::Log => "log",
            LossKind::Filtering => "filtering",
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LossKind {
    type Err = ScrfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hinge" => Ok(LossKind::Hinge),
            "log" => Ok(LossKind::Log),
            "filtering" => Ok(LossKind::Filtering),
            other => Err(ScrfError::UnknownConfig(format!("loss `{other}`"))),
        }
    }
}

/// Loss selection and cost-augmentation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub kind: LossKind,
    /// Multiplier on the overlap cost added to graph edge scores.
    pub cost_scale: f64,
    /// Max/mean blend of the filtering threshold, in `[0, 1]`.
    pub alpha: f64,
    /// Labels compared on timing alone by the overlap cost.
    pub structural_labels: Vec<String>,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            kind: LossKind::Hinge,
            cost_scale: 1.0,
            alpha: 0.5,
            structural_labels: DEFAULT_STRUCTURAL_LABELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl LossConfig {
    pub fn with_kind(mut self, kind: LossKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_cost_scale(mut self, cost_scale: f64) -> Self {
        self.cost_scale = cost_scale;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_structural_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.structural_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(ScrfError::invalid_config(
                "loss.alpha",
                format!("{} is outside [0, 1]", self.alpha),
            ));
        }
        if !(self.cost_scale >= 0.0 && self.cost_scale.is_finite()) {
            return Err(ScrfError::invalid_config(
                "loss.cost_scale",
                format!("{} is not a finite non-negative number", self.cost_scale),
            ));
        }
        Ok(())
    }
}
