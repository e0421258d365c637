//! # scrf-core
//!
//! The inference and loss engine of a segmental conditional random field.
//! A [`Lattice`] enumerates candidate segmentations of an utterance, a
//! [`LanguageModel`] constrains label sequences, and their lazy product
//! [`ComposedFst`] is searched in topological order for the best path or
//! summed over in the log semiring. Training losses compare the
//! cost-augmented graph against a reference path chosen by segment overlap.
//!
//! ## Quick Start
//!
//! ```rust
//! use scrf_core::{FstWeight, SegmentationConfig, segmentation_lattice, shortest_path};
//!
//! let config = SegmentationConfig::default().with_max_seg(3);
//! let lattice = segmentation_lattice(5, &config, &["a", "b"]).unwrap();
//! let path = shortest_path(&lattice, lattice.time_order(), &FstWeight).unwrap();
//!
//! assert_eq!(path.segments().last().map(|s| s.end), Some(5));
//! ```

pub mod config;
pub mod cost;
pub mod error;
pub mod fst;
pub mod loss;
pub mod score;
pub mod search;
pub mod segment;

// Re-export primary API
pub use config::{DEFAULT_STRUCTURAL_LABELS, LossConfig, LossKind, SegmentationConfig};
pub use cost::{OverlapCost, min_cost_path, overlap_cost};
pub use error::{Result, ScrfError};
pub use fst::{
    ANY, ComposedFst, EPSILON, Fst, LabelSet, LanguageModel, Lattice, Path, TimedFst,
    labels_compatible, segmentation_lattice,
};
pub use loss::{FilteringLoss, HingeLoss, LogLoss, Loss, make_loss};
pub use score::{
    BackoffCost, CompositeScore, EdgeScore, FeatureKind, FstWeight, LinearScore, ParamSpec,
    Scaled, TableScore, make_linear_score, parse_features,
};
pub use search::{ForwardBackward, OneBest, TopoOrder, Trellis, shortest_path};
pub use segment::Segment;
