//! # Weighted Automata
//!
//! The automaton abstraction shared by lattices, language models and their
//! lazy product. Everything downstream (ordering, decoding, forward-backward,
//! costs and losses) is written against [`Fst`] and [`TimedFst`], so the same
//! algorithms run on a bare segmentation lattice or on a lattice composed with
//! a language model.

pub mod compose;
mod index;
pub mod lattice;
pub mod lm;
pub mod path;
pub mod symbols;

use std::fmt::Debug;
use std::hash::Hash;

pub use compose::{ComposedEdge, ComposedFst, ComposedVertex};
pub use lattice::{EdgeData, Lattice, VertexData, segmentation_lattice};
pub use lm::LanguageModel;
pub use path::Path;
pub use symbols::LabelSet;

/// Index of a vertex inside the automaton that owns it.
pub type VertexId = usize;

/// Index of an edge inside the automaton that owns it.
pub type EdgeId = usize;

/// The epsilon label: a transition that consumes nothing on its side.
pub const EPSILON: &str = "<eps>";

/// The wildcard label, accepted by any label other than [`EPSILON`].
pub const ANY: &str = "<label>";

/// Whether an output label of the left operand can synchronise with an input
/// label of the right operand.
///
/// Labels match when they are equal, or when exactly one of them is [`ANY`]
/// and the other is not [`EPSILON`]. Composition, ordering and decoding all go
/// through this predicate.
#[must_use]
pub fn labels_compatible(output: &str, input: &str) -> bool {
    if output == input {
        return true;
    }
    match (output == ANY, input == ANY) {
        (true, false) => input != EPSILON,
        (false, true) => output != EPSILON,
        _ => false,
    }
}

/// A weighted, labeled directed multigraph with designated initial and final
/// vertices.
pub trait Fst {
    type Vertex: Copy + Eq + Hash + Debug;
    type Edge: Copy + Eq + Hash + Debug;

    fn initials(&self) -> Vec<Self::Vertex>;
    fn finals(&self) -> Vec<Self::Vertex>;

    fn tail(&self, e: Self::Edge) -> Self::Vertex;
    fn head(&self, e: Self::Edge) -> Self::Vertex;

    fn in_edges(&self, v: Self::Vertex) -> Vec<Self::Edge>;
    fn out_edges(&self, v: Self::Vertex) -> Vec<Self::Edge>;

    fn input(&self, e: Self::Edge) -> &str;
    fn output(&self, e: Self::Edge) -> &str;

    /// Weight stored on the edge itself (lattice score, LM log-probability).
    fn weight(&self, e: Self::Edge) -> f64;
}

/// An automaton whose vertices carry a time stamp on the acoustic timeline.
pub trait TimedFst: Fst {
    fn time(&self, v: Self::Vertex) -> i64;

    /// Duration of an edge in frames.
    fn duration(&self, e: Self::Edge) -> i64 {
        self.time(self.head(e)) - self.time(self.tail(e))
    }

    /// The share of [`Fst::weight`] contributed by the time-stamped lattice.
    fn lattice_weight(&self, e: Self::Edge) -> f64 {
        self.weight(e)
    }

    /// The share of [`Fst::weight`] contributed by a composed language model.
    fn lm_weight(&self, _e: Self::Edge) -> f64 {
        0.0
    }
}
