//! # SCRF Trainer
//!
//! Data loading, parameter storage, optimizers and the training loop for
//! the segmental CRFs in [`scrf_core`], plus the decoding driver used by
//! the `scrf-predict` binary.
//!
//! A training run reads a frame batch and a segment batch (blocks of rows
//! headed by an utterance name and closed by a `.` line), pairs them up
//! into [`Example`]s, and hands them to a [`Trainer`]:
//!
//! ```no_run
//! use scrf_trainer::{TrainConfig, Trainer, load_examples, load_labels};
//!
//! # fn main() -> scrf_trainer::Result<()> {
//! let labels = load_labels("labels.txt")?;
//! let examples = load_examples("train.frames", "train.segments", 1)?;
//! let dim = examples[0].frames.ncols();
//!
//! let mut trainer = Trainer::new(TrainConfig::default(), labels, None, dim)?;
//! trainer.train(&examples)?;
//! trainer.params().save("param-last.json")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod graph;
pub mod optimizer;
pub mod params;
pub mod predict;
pub mod trainer;

pub use config::TrainConfig;
pub use data::{
    Example, FrameReader, SegmentReader, Transcript, Utterance, load_arpa_bigram, load_examples,
    load_labels,
};
pub use error::{Result, TrainerError};
pub use graph::{GraphVisitor, with_graph};
pub use optimizer::{Optimizer, OptimizerKind};
pub use params::{ParamSet, param_specs};
pub use predict::{Predictor, format_prediction};
pub use trainer::{EpochSummary, StepOutcome, Trainer};
