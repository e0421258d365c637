//! Training configuration.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use scrf_core::{FeatureKind, LossConfig, ScrfError, SegmentationConfig, parse_features};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};
use crate::optimizer::{Optimizer, OptimizerKind};

/// Everything a training or prediction run needs besides its data files.
///
/// Loaded from JSON; every field has a default, so a config file only names
/// what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub segmentation: SegmentationConfig,
    pub loss: LossConfig,
    /// Comma-separated feature names, e.g. `"frame-avg,bias"`.
    pub features: String,
    pub optimizer: OptimizerKind,
    pub step_size: f64,
    /// Decay of the momentum optimizer's velocity, in `[0, 1]`.
    pub momentum: f64,
    pub l2: f64,
    pub epochs: usize,
    /// Seed for shuffling and parameter initialization.
    pub seed: u64,
    /// Factor dividing reference segment times, to match subsampled frames.
    pub subsample: usize,
    /// Write a checkpoint every this many examples.
    pub save_every: Option<usize>,
    /// Range of the uniform initial parameters; 0 starts from zeros.
    pub init_scale: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            segmentation: SegmentationConfig::default(),
            loss: LossConfig::default(),
            features: "frame-avg,length-indicator,bias".to_string(),
            optimizer: OptimizerKind::default(),
            step_size: 0.1,
            momentum: 0.9,
            l2: 0.0,
            epochs: 1,
            seed: 0,
            subsample: 1,
            save_every: None,
            init_scale: 0.0,
        }
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> TrainerError {
    ScrfError::invalid_config(field, reason).into()
}

impl TrainConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| TrainerError::io(path, e))?;
        serde_json::from_reader(BufReader::new(file)).map_err(|source| TrainerError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_features(mut self, features: impl Into<String>) -> Self {
        self.features = features.into();
        self
    }

    pub fn with_loss(mut self, loss: LossConfig) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_segmentation(mut self, segmentation: SegmentationConfig) -> Self {
        self.segmentation = segmentation;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerKind, step_size: f64) -> Self {
        self.optimizer = optimizer;
        self.step_size = step_size;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn feature_kinds(&self) -> Result<Vec<FeatureKind>> {
        Ok(parse_features(&self.features)?)
    }

    /// The configured optimizer with empty state.
    pub fn optimizer(&self) -> Optimizer {
        Optimizer::new(self.optimizer, self.step_size)
            .with_momentum(self.momentum)
            .with_l2(self.l2)
    }

    pub fn validate(&self) -> Result<()> {
        self.segmentation.validate()?;
        self.loss.validate()?;
        self.feature_kinds()?;

        if !(self.step_size > 0.0 && self.step_size.is_finite()) {
            return Err(invalid("step_size", format!("{} is not positive", self.step_size)));
        }
        if !(0.0..=1.0).contains(&self.momentum) {
            return Err(invalid("momentum", format!("{} is outside [0, 1]", self.momentum)));
        }
        if !(self.l2 >= 0.0 && self.l2.is_finite()) {
            return Err(invalid("l2", format!("{} is negative", self.l2)));
        }
        if !(self.init_scale >= 0.0 && self.init_scale.is_finite()) {
            return Err(invalid("init_scale", format!("{} is negative", self.init_scale)));
        }
        if self.epochs == 0 {
            return Err(invalid("epochs", "must be at least 1"));
        }
        if self.subsample == 0 {
            return Err(invalid("subsample", "must be at least 1"));
        }
        if self.save_every == Some(0) {
            return Err(invalid("save_every", "must be at least 1"));
        }
        Ok(())
    }
}
