//! Ordered, pre-scored view of an automaton.

use std::collections::HashMap;

use tracing::{debug, debug_span};

use crate::fst::Fst;
use crate::score::EdgeScore;

/// An automaton restricted to the vertices of a topological order, with
/// every edge between them scored once.
///
/// Self-loops and edges leaving the order are dropped. Per-vertex edge lists
/// keep the automaton's own iteration order, which is what tie-breaking in
/// the one-best search follows.
pub struct Trellis<'a, F: Fst> {
    fst: &'a F,
    order: Vec<F::Vertex>,
    index: HashMap<F::Vertex, usize>,
    weights: HashMap<F::Edge, f64>,
    /// `(edge, tail position)` per vertex position.
    incoming: Vec<Vec<(F::Edge, usize)>>,
    /// `(edge, head position)` per vertex position.
    outgoing: Vec<Vec<(F::Edge, usize)>>,
}

impl<'a, F: Fst> Trellis<'a, F> {
    pub fn new<S: EdgeScore<F> + ?Sized>(fst: &'a F, order: Vec<F::Vertex>, score: &S) -> Self {
        let _span = debug_span!("trellis", vertices = order.len()).entered();

        let index: HashMap<F::Vertex, usize> =
            order.iter().enumerate().map(|(i, &v)| (v, i)).collect();

        let mut weights = HashMap::new();
        let mut outgoing = Vec::with_capacity(order.len());
        for &v in &order {
            let mut edges = Vec::new();
            for e in fst.out_edges(v) {
                let head = fst.head(e);
                if head == v {
                    continue;
                }
                if let Some(&h) = index.get(&head) {
                    weights.insert(e, score.score(fst, e));
                    edges.push((e, h));
                }
            }
            outgoing.push(edges);
        }

        let mut incoming = Vec::with_capacity(order.len());
        for &v in &order {
            let mut edges = Vec::new();
            for e in fst.in_edges(v) {
                if !weights.contains_key(&e) {
                    continue;
                }
                let tail = fst.tail(e);
                if let Some(&t) = index.get(&tail) {
                    edges.push((e, t));
                }
            }
            incoming.push(edges);
        }

        debug!(edges = weights.len(), "scored");
        Self {
            fst,
            order,
            index,
            weights,
            incoming,
            outgoing,
        }
    }

    pub fn fst(&self) -> &'a F {
        self.fst
    }

    pub fn order(&self) -> &[F::Vertex] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Position of `v` in the order.
    pub fn position(&self, v: F::Vertex) -> Option<usize> {
        self.index.get(&v).copied()
    }

    /// Score of an edge inside the trellis.
    pub fn weight(&self, e: F::Edge) -> Option<f64> {
        self.weights.get(&e).copied()
    }

    pub fn edge_count(&self) -> usize {
        self.weights.len()
    }

    pub(crate) fn incoming(&self, i: usize) -> &[(F::Edge, usize)] {
        &self.incoming[i]
    }

    pub(crate) fn outgoing(&self, i: usize) -> &[(F::Edge, usize)] {
        &self.outgoing[i]
    }

    /// Every edge as `(edge, tail position, head position, weight)`, in
    /// order of tail.
    pub fn edges(&self) -> impl Iterator<Item = (F::Edge, usize, usize, f64)> + '_ {
        self.outgoing.iter().enumerate().flat_map(move |(t, edges)| {
            edges
                .iter()
                .map(move |&(e, h)| (e, t, h, self.weights[&e]))
        })
    }

    /// Positions of the automaton's initial vertices that are in the order.
    pub fn initial_positions(&self) -> Vec<usize> {
        self.fst
            .initials()
            .into_iter()
            .filter_map(|v| self.position(v))
            .collect()
    }

    /// Positions of the automaton's final vertices that are in the order.
    pub fn final_positions(&self) -> Vec<usize> {
        self.fst
            .finals()
            .into_iter()
            .filter_map(|v| self.position(v))
            .collect()
    }
}
