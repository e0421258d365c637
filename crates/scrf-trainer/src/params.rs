//! Named parameter tensors with JSON persistence.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::Array2;
use oorandom::Rand64;
use scrf_core::{FeatureKind, ParamSpec, ScrfError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, TrainerError};

/// Every parameter the given features own.
pub fn param_specs(
    kinds: &[FeatureKind],
    labels: usize,
    frame_dim: usize,
    max_seg: usize,
) -> Vec<ParamSpec> {
    kinds
        .iter()
        .flat_map(|k| k.params(labels, frame_dim, max_seg))
        .collect()
}

/// A set of named matrices: model parameters, or optimizer state of the
/// same layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet {
    tensors: BTreeMap<String, Array2<f64>>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn zeros(specs: &[ParamSpec]) -> Self {
        let tensors = specs
            .iter()
            .map(|s| (s.name.clone(), Array2::zeros((s.rows, s.cols))))
            .collect();
        Self { tensors }
    }

    /// Uniform values in `[-scale, scale)`.
    pub fn uniform(specs: &[ParamSpec], scale: f64, rng: &mut Rand64) -> Self {
        let tensors = specs
            .iter()
            .map(|s| {
                let m = Array2::from_shape_simple_fn((s.rows, s.cols), || {
                    (2.0 * rng.rand_float() - 1.0) * scale
                });
                (s.name.clone(), m)
            })
            .collect();
        Self { tensors }
    }

    /// Check that every spec is present with its shape.
    pub fn check(&self, specs: &[ParamSpec]) -> Result<()> {
        for spec in specs {
            let Some(m) = self.tensors.get(&spec.name) else {
                return Err(ScrfError::invalid_config(&spec.name, "parameter missing").into());
            };
            if m.dim() != (spec.rows, spec.cols) {
                let reason = format!(
                    "expected shape {}x{}, found {}x{}",
                    spec.rows,
                    spec.cols,
                    m.nrows(),
                    m.ncols()
                );
                return Err(ScrfError::invalid_config(&spec.name, reason).into());
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Array2<f64>> {
        self.tensors.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Array2<f64>) {
        self.tensors.insert(name.into(), value);
    }

    /// The tensor called `name`, created as zeros of `shape` when absent.
    pub fn entry(&mut self, name: &str, shape: (usize, usize)) -> &mut Array2<f64> {
        self.tensors
            .entry(name.to_string())
            .or_insert_with(|| Array2::zeros(shape))
    }

    pub fn as_map(&self) -> &BTreeMap<String, Array2<f64>> {
        &self.tensors
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| TrainerError::io(path, e))?;
        let params: ParamSet =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| TrainerError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), tensors = params.len(), "loaded parameters");
        Ok(params)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| TrainerError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self).map_err(|source| TrainerError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(|e| TrainerError::io(path, e))?;
        debug!(path = %path.display(), tensors = self.len(), "saved parameters");
        Ok(())
    }
}
