//! Decoded paths.

use std::fmt;

use super::{EPSILON, Fst, TimedFst};
use crate::score::EdgeScore;
use crate::segment::Segment;

/// An edge sequence from an initial to a final vertex, borrowing the
/// automaton it was extracted from. Valid for as long as that automaton is.
pub struct Path<'a, F: Fst> {
    fst: &'a F,
    edges: Vec<F::Edge>,
}

impl<'a, F: Fst> Path<'a, F> {
    pub fn new(fst: &'a F, edges: Vec<F::Edge>) -> Self {
        Self { fst, edges }
    }

    pub fn fst(&self) -> &'a F {
        self.fst
    }

    pub fn edges(&self) -> &[F::Edge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Sum of the intrinsic edge weights.
    pub fn weight(&self) -> f64 {
        self.edges.iter().map(|&e| self.fst.weight(e)).sum()
    }

    /// Re-evaluate the path under a scoring function.
    pub fn score<S: EdgeScore<F> + ?Sized>(&self, score: &S) -> f64 {
        self.edges.iter().map(|&e| score.score(self.fst, e)).sum()
    }

    /// Push `g` into the scorer's gradient for every edge on the path.
    pub fn accumulate_grad<S: EdgeScore<F> + ?Sized>(&self, g: f64, score: &S) {
        for &e in &self.edges {
            score.accumulate_grad(g, self.fst, e);
        }
    }

    /// Output labels, epsilons dropped.
    pub fn labels(&self) -> Vec<&'a str> {
        self.edges
            .iter()
            .map(|&e| self.fst.output(e))
            .filter(|l| *l != EPSILON)
            .collect()
    }
}

impl<F: TimedFst> Path<'_, F> {
    /// The segmentation the path induces. Zero-duration edges (epsilon
    /// moves) do not produce a segment.
    pub fn segments(&self) -> Vec<Segment> {
        self.edges
            .iter()
            .filter_map(|&e| {
                let start = self.fst.time(self.fst.tail(e));
                let end = self.fst.time(self.fst.head(e));
                Segment::new(start, end, self.fst.output(e)).ok()
            })
            .collect()
    }
}

impl<F: Fst> Clone for Path<'_, F> {
    fn clone(&self) -> Self {
        Self {
            fst: self.fst,
            edges: self.edges.clone(),
        }
    }
}

impl<F: Fst> fmt::Debug for Path<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path").field("edges", &self.edges).finish()
    }
}
