//! Building the search graph of an utterance.
//!
//! Without a language model the graph is a segmentation lattice carrying
//! every label. With one, the lattice only segments (its labels are the
//! wildcard) and the lazy composition with the LM supplies the labels.

use scrf_core::search::TopoOrder;
use scrf_core::{
    ANY, ComposedFst, LabelSet, LanguageModel, SegmentationConfig, TimedFst, segmentation_lattice,
};
use tracing::debug;

use crate::error::Result;

/// Work to run on whichever graph [`with_graph`] builds.
pub trait GraphVisitor {
    type Output;

    fn visit<F: TimedFst + TopoOrder>(self, graph: &F) -> Result<Self::Output>;
}

/// Build the graph for an utterance of `frames` frames and hand it to
/// `visitor`.
pub fn with_graph<V: GraphVisitor>(
    frames: usize,
    config: &SegmentationConfig,
    labels: &LabelSet,
    lm: Option<&LanguageModel>,
    visitor: V,
) -> Result<V::Output> {
    match lm {
        None => {
            let names: Vec<&str> = labels.labels().collect();
            let lattice = segmentation_lattice(frames, config, &names)?;
            debug!(edges = lattice.edge_count(), "labeled lattice");
            visitor.visit(&lattice)
        }
        Some(lm) => {
            let mut lattice = segmentation_lattice(frames, config, &[ANY])?;
            lattice.add_eps_loops();
            let graph = ComposedFst::new(&lattice, lm)?;
            debug!(edges = lattice.edge_count(), "wildcard lattice composed with LM");
            visitor.visit(&graph)
        }
    }
}
