//! # Training Losses
//!
//! Every loss searches or sums over the cost-augmented graph, where an
//! edge's weight is `score + cost_scale * cost`. The reference path is always
//! scored without cost. Gradients are pushed into the scorer through
//! [`EdgeScore::accumulate_grad`]; the cost never receives any.

use std::collections::HashMap;

use tracing::debug;

use crate::config::{LossConfig, LossKind};
use crate::error::Result;
use crate::fst::{Fst, Path};
use crate::score::EdgeScore;
use crate::search::{ForwardBackward, OneBest, Trellis, check_agreement, shortest_path};

/// A loss on one training example.
pub trait Loss {
    fn value(&self) -> f64;

    /// Add the loss gradient into the scorer's parameters.
    fn accumulate_grad(&self);
}

/// `score + scale * cost`, with gradients flowing to `score` only.
struct Augmented<'s, S: ?Sized, C: ?Sized> {
    score: &'s S,
    cost: &'s C,
    scale: f64,
}

impl<F, S, C> EdgeScore<F> for Augmented<'_, S, C>
where
    F: Fst,
    S: EdgeScore<F> + ?Sized,
    C: EdgeScore<F> + ?Sized,
{
    fn score(&self, fst: &F, e: F::Edge) -> f64 {
        let cost = if self.scale == 0.0 {
            0.0
        } else {
            self.scale * self.cost.score(fst, e)
        };
        self.score.score(fst, e) + cost
    }

    fn accumulate_grad(&self, g: f64, fst: &F, e: F::Edge) {
        self.score.accumulate_grad(g, fst, e);
    }
}

/// Max-margin loss: cost-augmented best path score minus reference score.
pub struct HingeLoss<'a, F: Fst, S: ?Sized> {
    gold: Path<'a, F>,
    best: Path<'a, F>,
    score: &'a S,
    value: f64,
}

impl<'a, F, S> HingeLoss<'a, F, S>
where
    F: Fst,
    S: EdgeScore<F> + ?Sized,
{
    pub fn new<C: EdgeScore<F> + ?Sized>(
        graph: &'a F,
        order: Vec<F::Vertex>,
        gold: Path<'a, F>,
        score: &'a S,
        cost: &C,
        cost_scale: f64,
    ) -> Result<Self> {
        let aug = Augmented {
            score,
            cost,
            scale: cost_scale,
        };
        let best = shortest_path(graph, order, &aug)?;
        let best_score = best.score(&aug);
        let gold_score = gold.score(score);

        debug!(labels = ?gold.labels(), score = gold_score, "gold");
        debug!(labels = ?best.labels(), score = best_score, "cost aug");

        Ok(Self {
            gold,
            best,
            score,
            value: best_score - gold_score,
        })
    }

    /// The cost-augmented best path.
    pub fn best(&self) -> &Path<'a, F> {
        &self.best
    }
}

impl<F, S> Loss for HingeLoss<'_, F, S>
where
    F: Fst,
    S: EdgeScore<F> + ?Sized,
{
    fn value(&self) -> f64 {
        self.value
    }

    /// +1 on the best path, −1 on the reference. Nothing when the margin is
    /// already met.
    fn accumulate_grad(&self) {
        if self.value <= 0.0 {
            debug!(loss = self.value, "margin met, no update");
            return;
        }
        self.best.accumulate_grad(1.0, self.score);
        self.gold.accumulate_grad(-1.0, self.score);
    }
}

/// Negative log-likelihood: `log Z - score(reference)`.
pub struct LogLoss<'a, F: Fst, S: ?Sized> {
    graph: &'a F,
    gold: Path<'a, F>,
    score: &'a S,
    posteriors: Vec<(F::Edge, f64)>,
    value: f64,
}

impl<'a, F, S> LogLoss<'a, F, S>
where
    F: Fst,
    S: EdgeScore<F> + ?Sized,
{
    pub fn new<C: EdgeScore<F> + ?Sized>(
        graph: &'a F,
        order: Vec<F::Vertex>,
        gold: Path<'a, F>,
        score: &'a S,
        cost: &C,
        cost_scale: f64,
    ) -> Result<Self> {
        let aug = Augmented {
            score,
            cost,
            scale: cost_scale,
        };
        let trellis = Trellis::new(graph, order, &aug);
        let fb = ForwardBackward::new(&trellis)?;
        let gold_score = gold.score(score);

        debug!(labels = ?gold.labels(), score = gold_score, log_z = fb.log_partition(), "gold");

        Ok(Self {
            graph,
            posteriors: fb.posteriors(&trellis),
            value: fb.log_partition() - gold_score,
            gold,
            score,
        })
    }

    pub fn posteriors(&self) -> &[(F::Edge, f64)] {
        &self.posteriors
    }
}

impl<F, S> Loss for LogLoss<'_, F, S>
where
    F: Fst,
    S: EdgeScore<F> + ?Sized,
{
    fn value(&self) -> f64 {
        self.value
    }

    /// Edge posteriors minus the reference indicator.
    fn accumulate_grad(&self) {
        for &(e, p) in &self.posteriors {
            self.score.accumulate_grad(p, self.graph, e);
        }
        self.gold.accumulate_grad(-1.0, self.score);
    }
}

/// Soft margin against a threshold between the best and the mean edge
/// max-marginal: `max(0, 1 + threshold - score(reference))` with
/// `threshold = alpha * max + (1 - alpha) * mean`.
///
/// An edge's max-marginal is the score of the best path through it. Forward
/// and backward maxima must agree with the best max-marginal, otherwise the
/// example is rejected.
pub struct FilteringLoss<'a, F: Fst, S: ?Sized> {
    graph: &'a F,
    gold: Path<'a, F>,
    score: &'a S,
    threshold: f64,
    /// Derivative of the threshold with respect to each edge's score.
    coefficients: Vec<(F::Edge, f64)>,
    value: f64,
}

impl<'a, F, S> FilteringLoss<'a, F, S>
where
    F: Fst,
    S: EdgeScore<F> + ?Sized,
{
    pub fn new<C: EdgeScore<F> + ?Sized>(
        graph: &'a F,
        order: Vec<F::Vertex>,
        gold: Path<'a, F>,
        score: &'a S,
        cost: &C,
        cost_scale: f64,
        alpha: f64,
    ) -> Result<Self> {
        let aug = Augmented {
            score,
            cost,
            scale: cost_scale,
        };
        let trellis = Trellis::new(graph, order, &aug);
        let fwd = OneBest::forward(&trellis);
        let bwd = OneBest::backward(&trellis);

        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut edges = 0usize;
        let mut finite = Vec::new();
        for (e, t, h, w) in trellis.edges() {
            edges += 1;
            let s = fwd.value(t) + w + bwd.value(h);
            if s > max {
                max = s;
            }
            if s.is_finite() {
                sum += s;
                finite.push((e, t, h));
            }
        }

        let f_max = fwd.best_final(&trellis).map_or(f64::NEG_INFINITY, |(_, v)| v);
        let b_max = bwd.best_initial(&trellis).map_or(f64::NEG_INFINITY, |(_, v)| v);
        check_agreement(f_max, b_max, Some(max))?;

        // dead-end edges count toward the mean with a zero contribution
        let edges = edges.max(1) as f64;
        let mean = sum / edges;
        let threshold = alpha * max + (1.0 - alpha) * mean;
        let best = fwd.path(&trellis)?;

        // Each finite edge contributes (1 - alpha) / N times the gradient of
        // its max-marginal: itself, the best path into its tail and the best
        // path out of its head. N counts every edge.
        let share = (1.0 - alpha) / edges;
        let mut coef: HashMap<F::Edge, f64> = HashMap::new();
        let mut into_tail = vec![0.0; trellis.len()];
        let mut out_of_head = vec![0.0; trellis.len()];
        for &(e, t, h) in &finite {
            *coef.entry(e).or_insert(0.0) += share;
            into_tail[t] += share;
            out_of_head[h] += share;
        }
        for i in (0..trellis.len()).rev() {
            if into_tail[i] == 0.0 {
                continue;
            }
            if let Some((e, t)) = fwd.pointer(i) {
                *coef.entry(e).or_insert(0.0) += into_tail[i];
                into_tail[t] += into_tail[i];
            }
        }
        for i in 0..trellis.len() {
            if out_of_head[i] == 0.0 {
                continue;
            }
            if let Some((e, h)) = bwd.pointer(i) {
                *coef.entry(e).or_insert(0.0) += out_of_head[i];
                out_of_head[h] += out_of_head[i];
            }
        }
        for &e in best.edges() {
            *coef.entry(e).or_insert(0.0) += alpha;
        }

        let gold_score = gold.score(score);
        let value = (1.0 + threshold - gold_score).max(0.0);

        debug!(labels = ?gold.labels(), score = gold_score, "gold");
        debug!(labels = ?best.labels(), max, mean, threshold, "filtering");

        Ok(Self {
            graph,
            gold,
            score,
            threshold,
            coefficients: coef.into_iter().collect(),
            value,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl<F, S> Loss for FilteringLoss<'_, F, S>
where
    F: Fst,
    S: EdgeScore<F> + ?Sized,
{
    fn value(&self) -> f64 {
        self.value
    }

    fn accumulate_grad(&self) {
        if self.value <= 0.0 {
            return;
        }
        for &(e, c) in &self.coefficients {
            self.score.accumulate_grad(c, self.graph, e);
        }
        self.gold.accumulate_grad(-1.0, self.score);
    }
}

/// Build the configured loss for one example.
pub fn make_loss<'a, F, S, C>(
    config: &LossConfig,
    graph: &'a F,
    order: Vec<F::Vertex>,
    gold: Path<'a, F>,
    score: &'a S,
    cost: &C,
) -> Result<Box<dyn Loss + 'a>>
where
    F: Fst + 'a,
    S: EdgeScore<F> + ?Sized + 'a,
    C: EdgeScore<F> + ?Sized,
{
    config.validate()?;
    let scale = config.cost_scale;
    Ok(match config.kind {
        LossKind::Hinge => Box::new(HingeLoss::new(graph, order, gold, score, cost, scale)?),
        LossKind::Log => Box::new(LogLoss::new(graph, order, gold, score, cost, scale)?),
        LossKind::Filtering => Box::new(FilteringLoss::new(
            graph,
            order,
            gold,
            score,
            cost,
            scale,
            config.alpha,
        )?),
    })
}
