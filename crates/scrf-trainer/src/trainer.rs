//! Training loop for the segmental CRF.
//!
//! Each example runs through the same pipeline: build the search graph,
//! decode the path closest to the reference segmentation, evaluate the
//! configured loss on the cost-augmented graph, and step the optimizer on the
//! loss gradient. An example whose graph has no path, or whose forward and
//! backward totals disagree, is logged and skipped.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use oorandom::Rand64;
use scrf_core::search::TopoOrder;
use scrf_core::{
    FeatureKind, LabelSet, LanguageModel, OverlapCost, ParamSpec, TimedFst, make_linear_score,
    make_loss, min_cost_path,
};
use tracing::{debug, info, warn};

use crate::config::TrainConfig;
use crate::data::Example;
use crate::error::{Result, TrainerError};
use crate::graph::{GraphVisitor, with_graph};
use crate::optimizer::Optimizer;
use crate::params::{ParamSet, param_specs};

/// A loss below this means the scores have blown up.
const DIVERGED: f64 = -1e6;

/// What one training step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Positive loss; parameters were updated.
    Updated(f64),
    /// Zero or negative loss; parameters were left alone.
    Unchanged(f64),
    /// The example could not be scored.
    Skipped,
}

/// Totals over one pass through the data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpochSummary {
    pub examples: usize,
    pub updated: usize,
    pub skipped: usize,
    pub total_loss: f64,
}

impl EpochSummary {
    /// Mean loss over the examples that were scored.
    pub fn mean_loss(&self) -> f64 {
        let scored = self.examples - self.skipped;
        if scored == 0 {
            0.0
        } else {
            self.total_loss / scored as f64
        }
    }
}

pub struct Trainer {
    config: TrainConfig,
    kinds: Vec<FeatureKind>,
    labels: LabelSet,
    lm: Option<LanguageModel>,
    frame_dim: usize,
    params: ParamSet,
    optimizer: Optimizer,
    rng: Rand64,
    step: usize,
    checkpoint: Option<(PathBuf, PathBuf)>,
}

impl Trainer {
    /// Set up training on frames of width `frame_dim`. Parameters start at
    /// zero, or uniform in `[-init_scale, init_scale)` when that is set.
    pub fn new(
        config: TrainConfig,
        labels: LabelSet,
        lm: Option<LanguageModel>,
        frame_dim: usize,
    ) -> Result<Self> {
        config.validate()?;
        let kinds = config.feature_kinds()?;
        let specs = param_specs(&kinds, labels.len(), frame_dim, config.segmentation.max_seg);
        let mut rng = Rand64::new(u128::from(config.seed));
        let params = if config.init_scale > 0.0 {
            ParamSet::uniform(&specs, config.init_scale, &mut rng)
        } else {
            ParamSet::zeros(&specs)
        };

        info!(
            features = %config.features,
            loss = %config.loss.kind,
            optimizer = %config.optimizer,
            labels = labels.len(),
            tensors = params.len(),
            "trainer ready"
        );

        Ok(Self {
            optimizer: config.optimizer(),
            kinds,
            labels,
            lm,
            frame_dim,
            params,
            rng,
            step: 0,
            checkpoint: None,
            config,
        })
    }

    /// Start from existing parameters, which must match the features.
    pub fn with_params(mut self, params: ParamSet) -> Result<Self> {
        params.check(&self.specs())?;
        self.params = params;
        Ok(self)
    }

    /// Resume optimizer state saved by an earlier run.
    pub fn with_optimizer_state(mut self, state: ParamSet) -> Self {
        self.optimizer = self.optimizer.with_state(state);
        self
    }

    /// Where periodic checkpoints go when `save_every` is set.
    pub fn with_checkpoint(mut self, params: impl Into<PathBuf>, opt_data: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some((params.into(), opt_data.into()));
        self
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    pub fn steps(&self) -> usize {
        self.step
    }

    fn specs(&self) -> Vec<ParamSpec> {
        param_specs(
            &self.kinds,
            self.labels.len(),
            self.frame_dim,
            self.config.segmentation.max_seg,
        )
    }

    /// Train on one example.
    pub fn step(&mut self, example: &Example) -> Result<StepOutcome> {
        let frames = example.frames.nrows();
        if frames == 0 || example.segments.is_empty() {
            warn!(utterance = %example.name, "empty example, skipping");
            return Ok(StepOutcome::Skipped);
        }

        let visitor = LossStep {
            trainer: self,
            example,
        };
        let result = with_graph(
            frames,
            &self.config.segmentation,
            &self.labels,
            self.lm.as_ref(),
            visitor,
        );
        let (loss, grads) = match result {
            Ok(r) => r,
            Err(e) if e.is_per_example() => {
                warn!(utterance = %example.name, error = %e, "skipping example");
                return Ok(StepOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        self.step += 1;
        info!(utterance = %example.name, step = self.step, loss, "loss");

        if loss < DIVERGED {
            return Err(TrainerError::Diverged {
                utterance: example.name.clone(),
                loss,
            });
        }

        let outcome = match grads {
            Some(grads) => {
                self.optimizer.update(&mut self.params, &grads);
                StepOutcome::Updated(loss)
            }
            None => {
                if loss < 0.0 {
                    info!(utterance = %example.name, loss, "loss is below zero, no update");
                }
                StepOutcome::Unchanged(loss)
            }
        };

        if let Some(every) = self.config.save_every {
            if self.step % every == 0 {
                if let Some((params, opt_data)) = &self.checkpoint {
                    self.save(params, opt_data)?;
                }
            }
        }
        Ok(outcome)
    }

    /// One pass over `examples` in a shuffled order.
    pub fn run_epoch(&mut self, examples: &[Example]) -> Result<EpochSummary> {
        let mut order: Vec<usize> = (0..examples.len()).collect();
        for i in (1..order.len()).rev() {
            let j = self.rng.rand_range(0..(i as u64 + 1)) as usize;
            order.swap(i, j);
        }

        let mut summary = EpochSummary::default();
        for i in order {
            summary.examples += 1;
            match self.step(&examples[i])? {
                StepOutcome::Updated(loss) => {
                    summary.updated += 1;
                    summary.total_loss += loss;
                }
                StepOutcome::Unchanged(loss) => summary.total_loss += loss,
                StepOutcome::Skipped => summary.skipped += 1,
            }
        }
        Ok(summary)
    }

    /// Run the configured number of epochs.
    pub fn train(&mut self, examples: &[Example]) -> Result<Vec<EpochSummary>> {
        let mut summaries = Vec::with_capacity(self.config.epochs);
        for epoch in 0..self.config.epochs {
            let summary = self.run_epoch(examples)?;
            info!(
                epoch = epoch + 1,
                epochs = self.config.epochs,
                mean_loss = summary.mean_loss(),
                updated = summary.updated,
                skipped = summary.skipped,
                "epoch complete"
            );
            summaries.push(summary);
        }
        Ok(summaries)
    }

    /// Write parameters and optimizer state.
    pub fn save(&self, params: &Path, opt_data: &Path) -> Result<()> {
        self.params.save(params)?;
        self.optimizer.state().save(opt_data)?;
        info!(params = %params.display(), opt_data = %opt_data.display(), "saved");
        Ok(())
    }
}

/// Loss and, when positive, parameter gradients of one example.
struct LossStep<'t> {
    trainer: &'t Trainer,
    example: &'t Example,
}

impl GraphVisitor for LossStep<'_> {
    type Output = (f64, Option<Vec<(String, Array2<f64>)>>);

    fn visit<F: TimedFst + TopoOrder>(self, graph: &F) -> Result<Self::Output> {
        let Self { trainer, example } = self;
        let config = &trainer.config;

        let score = make_linear_score(
            &trainer.kinds,
            trainer.params.as_map(),
            example.frames.view(),
            &trainer.labels,
            config.segmentation.max_seg,
        )?;
        let order = graph.topo_order()?;
        let structural = &config.loss.structural_labels;

        let gold = min_cost_path(graph, order.clone(), &example.segments, structural)?;
        let cost = OverlapCost::from_path(&gold, structural);
        debug!(
            utterance = %example.name,
            reference = ?scrf_core::segment::labels(&example.segments),
            gold_cost = gold.score(&cost),
            "reference path"
        );

        let loss = make_loss(&config.loss, graph, order, gold, &score, &cost)?;
        let value = loss.value();
        if value <= 0.0 {
            return Ok((value, None));
        }
        loss.accumulate_grad();
        Ok((value, Some(score.gradients())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrf_core::{LossConfig, LossKind, Segment, SegmentationConfig};
    use tempfile::tempdir;

    /// Two labels with distinct frame signatures: `a` frames are [1, 0],
    /// `b` frames are [0, 1].
    fn example(name: &str, pattern: &[(usize, &str)]) -> Example {
        let mut rows = Vec::new();
        let mut segments = Vec::new();
        let mut t = 0;
        for &(len, label) in pattern {
            for _ in 0..len {
                rows.extend(if label == "a" { [1.0, 0.0] } else { [0.0, 1.0] });
            }
            segments.push(Segment::new(t as i64, (t + len) as i64, label).unwrap());
            t += len;
        }
        Example {
            name: name.to_string(),
            frames: Array2::from_shape_vec((t, 2), rows).unwrap(),
            segments,
        }
    }

    fn config(kind: LossKind) -> TrainConfig {
        TrainConfig::default()
            .with_features("frame-avg,bias")
            .with_segmentation(SegmentationConfig::default().with_max_seg(4))
            .with_loss(LossConfig::default().with_kind(kind))
    }

    fn labels() -> LabelSet {
        LabelSet::from_labels(["a", "b"]).unwrap()
    }

    #[test]
    fn hinge_step_moves_frame_weights_toward_labels() {
        let mut trainer = Trainer::new(config(LossKind::Hinge), labels(), None, 2).unwrap();
        let ex = example("u1", &[(2, "a"), (3, "b")]);

        let outcome = trainer.step(&ex).unwrap();
        assert!(matches!(outcome, StepOutcome::Updated(l) if l > 0.0));

        let w = trainer.params().get("frame-avg").unwrap();
        // row 0 is `a`, row 1 is `b`; column 0 fires on `a` frames
        assert!(w[[0, 0]] > w[[1, 0]]);
        assert!(w[[1, 1]] > w[[0, 1]]);
    }

    #[test]
    fn training_reduces_loss() {
        let examples = vec![
            example("u1", &[(2, "a"), (3, "b")]),
            example("u2", &[(3, "b"), (2, "a"), (2, "b")]),
        ];
        let cfg = config(LossKind::Hinge).with_epochs(5).with_seed(3);
        let mut trainer = Trainer::new(cfg, labels(), None, 2).unwrap();

        let summaries = trainer.train(&examples).unwrap();
        assert_eq!(summaries.len(), 5);
        let first = summaries[0].mean_loss();
        let last = summaries[4].mean_loss();
        assert!(last < first, "loss went from {first} to {last}");
        assert_eq!(trainer.steps(), 10);
    }

    #[test]
    fn every_loss_kind_trains() {
        let examples = vec![example("u1", &[(2, "a"), (2, "b")])];
        for kind in [LossKind::Hinge, LossKind::Log, LossKind::Filtering] {
            let mut trainer = Trainer::new(config(kind), labels(), None, 2).unwrap();
            let summary = trainer.run_epoch(&examples).unwrap();
            assert_eq!(summary.examples, 1);
            assert_eq!(summary.skipped, 0);
            assert!(summary.total_loss >= 0.0);
        }
    }

    #[test]
    fn empty_example_is_skipped() {
        let mut trainer = Trainer::new(config(LossKind::Hinge), labels(), None, 2).unwrap();
        let ex = Example {
            name: "empty".to_string(),
            frames: Array2::zeros((0, 2)),
            segments: vec![],
        };
        assert_eq!(trainer.step(&ex).unwrap(), StepOutcome::Skipped);
        assert_eq!(trainer.steps(), 0);
    }

    #[test]
    fn unreachable_lattice_end_is_skipped() {
        // 5 frames with segments of 3 or 4 frames: no path reaches frame 5
        let seg = SegmentationConfig::default().with_min_seg(3).with_max_seg(4);
        let cfg = config(LossKind::Hinge).with_segmentation(seg);
        let mut trainer = Trainer::new(cfg, labels(), None, 2).unwrap();
        let ex = example("u1", &[(2, "a"), (3, "b")]);
        assert_eq!(trainer.step(&ex).unwrap(), StepOutcome::Skipped);
    }

    #[test]
    fn mismatched_params_are_rejected() {
        let trainer = Trainer::new(config(LossKind::Hinge), labels(), None, 2).unwrap();
        let mut params = trainer.params().clone();
        params.insert("bias", Array2::zeros((5, 1)));
        assert!(trainer.with_params(params).is_err());
    }

    #[test]
    fn checkpoints_are_written() {
        let dir = tempdir().unwrap();
        let param_path = dir.path().join("param-last.json");
        let opt_path = dir.path().join("opt-data-last.json");

        let mut cfg = config(LossKind::Hinge);
        cfg.save_every = Some(1);
        let mut trainer = Trainer::new(cfg, labels(), None, 2)
            .unwrap()
            .with_checkpoint(&param_path, &opt_path);
        trainer.step(&example("u1", &[(2, "a"), (2, "b")])).unwrap();

        let saved = ParamSet::load(&param_path).unwrap();
        let current = trainer.params();
        assert_eq!(saved.names().collect::<Vec<_>>(), current.names().collect::<Vec<_>>());
        for name in current.names() {
            let (a, b) = (saved.get(name).unwrap(), current.get(name).unwrap());
            assert!(a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-12));
        }
        assert!(opt_path.exists());
    }
}
