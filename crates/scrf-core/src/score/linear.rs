//! # Linear Frame Scores
//!
//! Per-label linear scores over acoustic frames and segment lengths. Frame
//! features project every frame through a `labels x dim` parameter matrix
//! once per utterance, then read the projected matrix at the columns a
//! segment covers. Gradients land in the projected matrix and are folded
//! back into the parameter by [`LinearScore::gradients`].

use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, ArrayView2};
use tracing::debug;

use super::EdgeScore;
use crate::error::{Result, ScrfError};
use crate::fst::{LabelSet, TimedFst};

/// A named family of linear features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    /// Mean of the projected frames inside the segment.
    FrameAvg,
    /// Projected frames at 1/6, 1/2 and 5/6 of the segment.
    FrameSamples,
    /// Projected frames 1, 2 and 3 before the segment start.
    LeftBoundary,
    /// Projected frames 1, 2 and 3 after the segment end.
    RightBoundary,
    /// One weight per label and duration.
    LengthIndicator,
    /// Linear and quadratic terms in duration.
    LengthValue,
    /// Linear and quadratic terms in log duration.
    LogLength,
    /// One weight per label.
    Bias,
    /// A single weight on the edge's intrinsic weight.
    FstWeight,
    /// A single weight on the lattice side of the edge weight.
    LatticeScore,
    /// A single weight on the language-model side of the edge weight.
    LmScore,
}

const SAMPLE_POINTS: [f64; 3] = [1.0 / 6.0, 1.0 / 2.0, 5.0 / 6.0];
const BOUNDARY_SHIFTS: [i64; 3] = [1, 2, 3];

impl FeatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::FrameAvg => "frame-avg",
            FeatureKind::FrameSamples => "frame-samples",
            FeatureKind::LeftBoundary => "left-boundary",
            FeatureKind::RightBoundary => "right-boundary",
            FeatureKind::LengthIndicator => "length-indicator",
            FeatureKind::LengthValue => "length-value",
            FeatureKind::LogLength => "log-length",
            FeatureKind::Bias => "bias",
            FeatureKind::FstWeight => "fst-weight",
            FeatureKind::LatticeScore => "lattice-score",
            FeatureKind::LmScore => "lm-score",
        }
    }

    /// Parameters this feature owns.
    pub fn params(&self, labels: usize, frame_dim: usize, max_seg: usize) -> Vec<ParamSpec> {
        let name = self.as_str();
        let indexed = |n: usize, cols: usize| -> Vec<ParamSpec> {
            (0..n)
                .map(|i| ParamSpec::new(format!("{name}.{i}"), labels, cols))
                .collect()
        };
        match self {
            FeatureKind::FrameAvg => vec![ParamSpec::new(name, labels, frame_dim)],
            FeatureKind::FrameSamples => indexed(SAMPLE_POINTS.len(), frame_dim),
            FeatureKind::LeftBoundary | FeatureKind::RightBoundary => {
                indexed(BOUNDARY_SHIFTS.len(), frame_dim)
            }
            FeatureKind::LengthIndicator => vec![ParamSpec::new(name, labels, max_seg)],
            FeatureKind::LengthValue | FeatureKind::LogLength => {
                vec![ParamSpec::new(name, labels, 2)]
            }
            FeatureKind::Bias => vec![ParamSpec::new(name, labels, 1)],
            FeatureKind::FstWeight | FeatureKind::LatticeScore | FeatureKind::LmScore => {
                vec![ParamSpec::new(name, 1, 1)]
            }
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureKind {
    type Err = ScrfError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "frame-avg" => Ok(FeatureKind::FrameAvg),
            "frame-samples" => Ok(FeatureKind::FrameSamples),
            "left-boundary" => Ok(FeatureKind::LeftBoundary),
            "right-boundary" => Ok(FeatureKind::RightBoundary),
            "length-indicator" => Ok(FeatureKind::LengthIndicator),
            "length-value" => Ok(FeatureKind::LengthValue),
            "log-length" => Ok(FeatureKind::LogLength),
            "bias" => Ok(FeatureKind::Bias),
            "fst-weight" => Ok(FeatureKind::FstWeight),
            "lattice-score" => Ok(FeatureKind::LatticeScore),
            "lm-score" => Ok(FeatureKind::LmScore),
            other => Err(ScrfError::UnknownConfig(format!("feature `{other}`"))),
        }
    }
}

/// Parse a comma-separated feature list such as `"frame-avg,bias"`.
pub fn parse_features(list: &str) -> Result<Vec<FeatureKind>> {
    let mut seen = HashSet::new();
    let mut kinds = Vec::new();
    for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let kind: FeatureKind = name.parse()?;
        if !seen.insert(kind) {
            return Err(ScrfError::invalid_config(
                "features",
                format!("`{name}` listed twice"),
            ));
        }
        kinds.push(kind);
    }
    if kinds.is_empty() {
        return Err(ScrfError::invalid_config("features", "no feature given"));
    }
    Ok(kinds)
}

/// Name and shape of one parameter matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
}

impl ParamSpec {
    fn new(name: impl Into<String>, rows: usize, cols: usize) -> Self {
        Self {
            name: name.into(),
            rows,
            cols,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Reduce {
    Average,
    Sample(f64),
    Before(i64),
    After(i64),
}

#[derive(Debug)]
enum Term {
    /// `labels x frames` projection of the utterance.
    Frame { reduce: Reduce, projected: Array2<f64> },
    Length,
    LengthValue,
    LogLength,
    Bias,
    Weight(WeightSource),
}

/// Which part of an edge's intrinsic weight a weight feature reads.
#[derive(Debug, Clone, Copy)]
enum WeightSource {
    Total,
    Lattice,
    Lm,
}

#[derive(Debug)]
struct Feature {
    name: String,
    term: Term,
    param: Array2<f64>,
    /// Same shape as `projected` for frame terms, as `param` otherwise.
    grad: RefCell<Array2<f64>>,
}

/// A sum of linear features over one utterance.
#[derive(Debug)]
pub struct LinearScore<'a> {
    labels: &'a LabelSet,
    frames: ArrayView2<'a, f64>,
    features: Vec<Feature>,
}

/// Build the linear scorer for one utterance.
///
/// `frames` is `frames x dim`. Every parameter the features need must be in
/// `params` with the shape [`FeatureKind::params`] gives.
pub fn make_linear_score<'a>(
    kinds: &[FeatureKind],
    params: &BTreeMap<String, Array2<f64>>,
    frames: ArrayView2<'a, f64>,
    labels: &'a LabelSet,
    max_seg: usize,
) -> Result<LinearScore<'a>> {
    let dim = frames.ncols();
    let mut features = Vec::new();

    for kind in kinds {
        let specs = kind.params(labels.len(), dim, max_seg);
        for (i, spec) in specs.into_iter().enumerate() {
            let param = params.get(&spec.name).ok_or_else(|| {
                ScrfError::invalid_config(&spec.name, "parameter missing")
            })?;
            if param.dim() != (spec.rows, spec.cols) {
                return Err(ScrfError::invalid_config(
                    &spec.name,
                    format!(
                        "expected shape {}x{}, found {}x{}",
                        spec.rows,
                        spec.cols,
                        param.nrows(),
                        param.ncols()
                    ),
                ));
            }

            let term = match kind {
                FeatureKind::FrameAvg => frame_term(Reduce::Average, param, frames),
                FeatureKind::FrameSamples => {
                    frame_term(Reduce::Sample(SAMPLE_POINTS[i]), param, frames)
                }
                FeatureKind::LeftBoundary => {
                    frame_term(Reduce::Before(BOUNDARY_SHIFTS[i]), param, frames)
                }
                FeatureKind::RightBoundary => {
                    frame_term(Reduce::After(BOUNDARY_SHIFTS[i]), param, frames)
                }
                FeatureKind::LengthIndicator => Term::Length,
                FeatureKind::LengthValue => Term::LengthValue,
                FeatureKind::LogLength => Term::LogLength,
                FeatureKind::Bias => Term::Bias,
                FeatureKind::FstWeight => Term::Weight(WeightSource::Total),
                FeatureKind::LatticeScore => Term::Weight(WeightSource::Lattice),
                FeatureKind::LmScore => Term::Weight(WeightSource::Lm),
            };
            let grad_shape = match &term {
                Term::Frame { projected, .. } => projected.dim(),
                _ => param.dim(),
            };
            features.push(Feature {
                name: spec.name,
                term,
                param: param.clone(),
                grad: RefCell::new(Array2::zeros(grad_shape)),
            });
        }
    }

    debug!(
        features = features.len(),
        frames = frames.nrows(),
        dim,
        "linear score ready"
    );
    Ok(LinearScore {
        labels,
        frames,
        features,
    })
}

fn frame_term(reduce: Reduce, param: &Array2<f64>, frames: ArrayView2<'_, f64>) -> Term {
    Term::Frame {
        reduce,
        projected: param.dot(&frames.t()),
    }
}

/// Frame columns a segment `[start, end)` reads, each with its weight.
fn frame_columns(reduce: Reduce, start: i64, end: i64, frames: usize) -> Vec<(usize, f64)> {
    let last = frames as i64 - 1;
    let col = |t: i64| t.clamp(0, last) as usize;
    let duration = end - start;
    match reduce {
        Reduce::Average => {
            let w = 1.0 / duration as f64;
            (start..end).map(|t| (col(t), w)).collect()
        }
        Reduce::Sample(at) => {
            vec![(col(start + (duration as f64 * at) as i64), 1.0)]
        }
        Reduce::Before(shift) => vec![(col(start - shift), 1.0)],
        Reduce::After(shift) => vec![(col(end + shift), 1.0)],
    }
}

impl LinearScore<'_> {
    /// Parameter gradients accumulated so far, by parameter name.
    pub fn gradients(&self) -> Vec<(String, Array2<f64>)> {
        self.features
            .iter()
            .map(|f| {
                let grad = f.grad.borrow();
                let g = match f.term {
                    Term::Frame { .. } => grad.dot(&self.frames),
                    _ => grad.clone(),
                };
                (f.name.clone(), g)
            })
            .collect()
    }

    pub fn clear_grad(&self) {
        for f in &self.features {
            f.grad.borrow_mut().fill(0.0);
        }
    }

    pub fn feature_count(&self) -> usize {
        self.features.len()
    }

    /// Visit the (row, column, coefficient) cells an edge reads in each
    /// feature's score or gradient matrix.
    fn cells<F: TimedFst>(
        &self,
        fst: &F,
        e: F::Edge,
        mut visit: impl FnMut(&Feature, usize, usize, f64),
    ) {
        let start = fst.time(fst.tail(e));
        let end = fst.time(fst.head(e));
        let duration = end - start;
        let row = self.labels.index(fst.output(e));

        for f in &self.features {
            if let Term::Weight(source) = f.term {
                let w = match source {
                    WeightSource::Total => fst.weight(e),
                    WeightSource::Lattice => fst.lattice_weight(e),
                    WeightSource::Lm => fst.lm_weight(e),
                };
                visit(f, 0, 0, w);
                continue;
            }
            let Some(row) = row else { continue };
            if duration <= 0 {
                continue;
            }
            match &f.term {
                Term::Frame { reduce, projected } => {
                    if projected.ncols() == 0 {
                        continue;
                    }
                    for (c, w) in frame_columns(*reduce, start, end, projected.ncols()) {
                        visit(f, row, c, w);
                    }
                }
                Term::Length => {
                    let Some(last) = f.param.ncols().checked_sub(1) else {
                        continue;
                    };
                    visit(f, row, ((duration - 1) as usize).min(last), 1.0);
                }
                Term::LengthValue => {
                    let d = duration as f64;
                    visit(f, row, 0, d);
                    visit(f, row, 1, d * d);
                }
                Term::LogLength => {
                    let logd = (duration as f64).ln();
                    visit(f, row, 0, logd);
                    visit(f, row, 1, logd * logd);
                }
                Term::Bias => visit(f, row, 0, 1.0),
                Term::Weight(_) => {}
            }
        }
    }
}

impl<F: TimedFst> EdgeScore<F> for LinearScore<'_> {
    fn score(&self, fst: &F, e: F::Edge) -> f64 {
        let mut sum = 0.0;
        self.cells(fst, e, |f, r, c, w| {
            let m = match &f.term {
                Term::Frame { projected, .. } => projected,
                _ => &f.param,
            };
            sum += w * m[[r, c]];
        });
        sum
    }

    fn accumulate_grad(&self, g: f64, fst: &F, e: F::Edge) {
        self.cells(fst, e, |f, r, c, w| {
            f.grad.borrow_mut()[[r, c]] += g * w;
        });
    }
}
