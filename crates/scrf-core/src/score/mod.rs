//! # Edge Scoring
//!
//! The [`EdgeScore`] capability turns an edge of an automaton into a real
//! number and, for parametric scores, accepts a gradient for that edge. The
//! search and loss code never looks further into a scorer than these two
//! operations.

pub mod linear;

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;

use crate::fst::{EPSILON, Fst};

pub use linear::{FeatureKind, LinearScore, ParamSpec, make_linear_score, parse_features};

/// Scores edges of an automaton of type `F`.
pub trait EdgeScore<F: Fst> {
    fn score(&self, fst: &F, e: F::Edge) -> f64;

    /// Add `g` times the derivative of this edge's score into whatever
    /// parameter produced it. Gradients only ever accumulate.
    fn accumulate_grad(&self, _g: f64, _fst: &F, _e: F::Edge) {}
}

impl<F: Fst, S: EdgeScore<F> + ?Sized> EdgeScore<F> for &S {
    fn score(&self, fst: &F, e: F::Edge) -> f64 {
        (**self).score(fst, e)
    }

    fn accumulate_grad(&self, g: f64, fst: &F, e: F::Edge) {
        (**self).accumulate_grad(g, fst, e)
    }
}

impl<F: Fst, S: EdgeScore<F> + ?Sized> EdgeScore<F> for Box<S> {
    fn score(&self, fst: &F, e: F::Edge) -> f64 {
        (**self).score(fst, e)
    }

    fn accumulate_grad(&self, g: f64, fst: &F, e: F::Edge) {
        (**self).accumulate_grad(g, fst, e)
    }
}

/// Sum of several scorers.
pub struct CompositeScore<'a, F: Fst> {
    parts: Vec<Box<dyn EdgeScore<F> + 'a>>,
}

impl<'a, F: Fst> CompositeScore<'a, F> {
    pub fn new() -> Self {
        Self { parts: Vec::new() }
    }

    pub fn push(&mut self, part: impl EdgeScore<F> + 'a) {
        self.parts.push(Box::new(part));
    }

    pub fn with(mut self, part: impl EdgeScore<F> + 'a) -> Self {
        self.push(part);
        self
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl<F: Fst> Default for CompositeScore<'_, F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Fst> EdgeScore<F> for CompositeScore<'_, F> {
    fn score(&self, fst: &F, e: F::Edge) -> f64 {
        self.parts.iter().map(|p| p.score(fst, e)).sum()
    }

    fn accumulate_grad(&self, g: f64, fst: &F, e: F::Edge) {
        for part in &self.parts {
            part.accumulate_grad(g, fst, e);
        }
    }
}

/// A scorer multiplied by a constant. `Scaled::new(cost, -1.0)` turns a cost
/// into a score that a maximizing search minimizes.
pub struct Scaled<S> {
    inner: S,
    factor: f64,
}

impl<S> Scaled<S> {
    pub fn new(inner: S, factor: f64) -> Self {
        Self { inner, factor }
    }
}

impl<F: Fst, S: EdgeScore<F>> EdgeScore<F> for Scaled<S> {
    fn score(&self, fst: &F, e: F::Edge) -> f64 {
        self.factor * self.inner.score(fst, e)
    }

    fn accumulate_grad(&self, g: f64, fst: &F, e: F::Edge) {
        self.inner.accumulate_grad(self.factor * g, fst, e);
    }
}

/// −1 for every epsilon move, 0 otherwise.
pub struct BackoffCost;

impl<F: Fst> EdgeScore<F> for BackoffCost {
    fn score(&self, fst: &F, e: F::Edge) -> f64 {
        if fst.output(e) == EPSILON { -1.0 } else { 0.0 }
    }
}

/// The weight stored on the edge itself.
pub struct FstWeight;

impl<F: Fst> EdgeScore<F> for FstWeight {
    fn score(&self, fst: &F, e: F::Edge) -> f64 {
        fst.weight(e)
    }
}

/// Fixed per-edge scores with a recorded gradient; edges not in the table
/// score 0.
#[derive(Debug, Default)]
pub struct TableScore<E> {
    scores: HashMap<E, f64>,
    grads: RefCell<HashMap<E, f64>>,
}

impl<E: Copy + Eq + Hash> TableScore<E> {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            grads: RefCell::new(HashMap::new()),
        }
    }

    pub fn set(&mut self, e: E, score: f64) {
        self.scores.insert(e, score);
    }

    /// Gradient accumulated for `e` so far.
    pub fn grad(&self, e: E) -> f64 {
        self.grads.borrow().get(&e).copied().unwrap_or(0.0)
    }

    pub fn clear_grad(&self) {
        self.grads.borrow_mut().clear();
    }
}

impl<E: Copy + Eq + Hash> FromIterator<(E, f64)> for TableScore<E> {
    fn from_iter<I: IntoIterator<Item = (E, f64)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (e, s) in iter {
            table.set(e, s);
        }
        table
    }
}

impl<F: Fst> EdgeScore<F> for TableScore<F::Edge> {
    fn score(&self, _fst: &F, e: F::Edge) -> f64 {
        self.scores.get(&e).copied().unwrap_or(0.0)
    }

    fn accumulate_grad(&self, g: f64, _fst: &F, e: F::Edge) {
        *self.grads.borrow_mut().entry(e).or_insert(0.0) += g;
    }
}
