//! Lazy product of a lattice and a language model.
//!
//! Nothing about the product is stored: vertices and edges are pairs of
//! operand ids, and every query is answered from the operands on demand.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, debug_span};

use super::lattice::Lattice;
use super::lm::{LanguageModel, epsilon_ranks};
use super::{ANY, EPSILON, EdgeId, Fst, TimedFst, VertexId, labels_compatible};
use crate::error::Result;

/// A product vertex: a lattice vertex paired with an LM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComposedVertex {
    pub lattice: VertexId,
    pub lm: VertexId,
}

/// A product edge: a lattice edge synchronized with an LM edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComposedEdge {
    pub lattice: EdgeId,
    pub lm: EdgeId,
}

/// The product automaton, borrowing both operands.
///
/// A lattice edge with output `x` pairs with an LM edge with input `y`
/// whenever [`labels_compatible`]`(x, y)`. Lattice epsilon self-loops pair
/// with LM back-off edges, which lets the model move while time stands still.
#[derive(Debug, Clone)]
pub struct ComposedFst<'a> {
    lattice: &'a Lattice,
    lm: &'a LanguageModel,
    lm_rank: Vec<usize>,
}

impl<'a> ComposedFst<'a> {
    /// Compose two automata. Fails when either lacks initial or final
    /// vertices, or when the LM has a cycle of epsilon edges.
    pub fn new(lattice: &'a Lattice, lm: &'a LanguageModel) -> Result<Self> {
        lattice.validate()?;
        lm.validate()?;
        let lm_rank = epsilon_ranks(lm)?;
        Ok(Self {
            lattice,
            lm,
            lm_rank,
        })
    }

    pub fn lattice(&self) -> &'a Lattice {
        self.lattice
    }

    pub fn lm(&self) -> &'a LanguageModel {
        self.lm
    }

    fn lm_labeled(&self, v: VertexId, label: &str, outgoing: bool) -> &[EdgeId] {
        if outgoing {
            self.lm.out_edges_labeled(v, label)
        } else {
            self.lm.in_edges_labeled(v, label)
        }
    }

    /// LM edges at `v` (leaving it when `outgoing`, else entering it) that
    /// can synchronize with a lattice output `label`.
    fn lm_edges(&self, v: VertexId, label: &str, outgoing: bool) -> Vec<EdgeId> {
        let candidates: Vec<EdgeId> = if label == ANY {
            if outgoing {
                self.lm.out_edge_slice(v).to_vec()
            } else {
                self.lm.in_edge_slice(v).to_vec()
            }
        } else if label == EPSILON {
            self.lm_labeled(v, EPSILON, outgoing).to_vec()
        } else {
            self.lm_labeled(v, label, outgoing)
                .iter()
                .chain(self.lm_labeled(v, ANY, outgoing))
                .copied()
                .collect()
        };

        candidates
            .into_iter()
            .filter(|&e| labels_compatible(label, self.lm.input(e)))
            .collect()
    }

    /// Reachable product vertices in topological order.
    ///
    /// Lattice vertices are visited by time. At one lattice vertex the LM
    /// states follow the LM's epsilon order, which orders the only edges that
    /// stay at the same lattice vertex. Unreachable pairs are never visited.
    pub fn reachable_order(&self) -> Vec<ComposedVertex> {
        let _span = debug_span!(
            "compose_order",
            lattice_vertices = self.lattice.vertex_count(),
            lm_states = self.lm.vertex_count()
        )
        .entered();

        let mut pending: HashMap<VertexId, BTreeSet<(usize, VertexId)>> = HashMap::new();
        for v in self.initials() {
            pending
                .entry(v.lattice)
                .or_default()
                .insert((self.lm_rank[v.lm], v.lm));
        }

        let mut order = Vec::new();
        let mut edges = 0usize;
        for a in self.lattice.time_order() {
            let Some(mut frontier) = pending.remove(&a) else {
                continue;
            };
            while let Some((_, b)) = frontier.pop_first() {
                let v = ComposedVertex { lattice: a, lm: b };
                order.push(v);
                for e in self.out_edges(v) {
                    edges += 1;
                    let h = self.head(e);
                    let key = (self.lm_rank[h.lm], h.lm);
                    if h.lattice == a {
                        frontier.insert(key);
                    } else {
                        pending.entry(h.lattice).or_default().insert(key);
                    }
                }
            }
        }

        debug!(vertices = order.len(), edges, "composed");
        order
    }
}

impl Fst for ComposedFst<'_> {
    type Vertex = ComposedVertex;
    type Edge = ComposedEdge;

    fn initials(&self) -> Vec<ComposedVertex> {
        let lm_initials = self.lm.initials();
        self.lattice
            .initials()
            .into_iter()
            .flat_map(|a| {
                lm_initials
                    .iter()
                    .map(move |&b| ComposedVertex { lattice: a, lm: b })
            })
            .collect()
    }

    fn finals(&self) -> Vec<ComposedVertex> {
        let lm_finals = self.lm.finals();
        self.lattice
            .finals()
            .into_iter()
            .flat_map(|a| {
                lm_finals
                    .iter()
                    .map(move |&b| ComposedVertex { lattice: a, lm: b })
            })
            .collect()
    }

    fn tail(&self, e: ComposedEdge) -> ComposedVertex {
        ComposedVertex {
            lattice: self.lattice.tail(e.lattice),
            lm: self.lm.tail(e.lm),
        }
    }

    fn head(&self, e: ComposedEdge) -> ComposedVertex {
        ComposedVertex {
            lattice: self.lattice.head(e.lattice),
            lm: self.lm.head(e.lm),
        }
    }

    fn in_edges(&self, v: ComposedVertex) -> Vec<ComposedEdge> {
        let mut result = Vec::new();
        for &ea in self.lattice.in_edge_slice(v.lattice) {
            for eb in self.lm_edges(v.lm, self.lattice.output(ea), false) {
                result.push(ComposedEdge { lattice: ea, lm: eb });
            }
        }
        result
    }

    fn out_edges(&self, v: ComposedVertex) -> Vec<ComposedEdge> {
        let mut result = Vec::new();
        for &ea in self.lattice.out_edge_slice(v.lattice) {
            for eb in self.lm_edges(v.lm, self.lattice.output(ea), true) {
                result.push(ComposedEdge { lattice: ea, lm: eb });
            }
        }
        result
    }

    fn input(&self, e: ComposedEdge) -> &str {
        self.lattice.input(e.lattice)
    }

    /// The LM output, unless it is the wildcard, in which case the lattice
    /// output.
    fn output(&self, e: ComposedEdge) -> &str {
        let out = self.lm.output(e.lm);
        if out == ANY {
            self.lattice.output(e.lattice)
        } else {
            out
        }
    }

    fn weight(&self, e: ComposedEdge) -> f64 {
        self.lattice.weight(e.lattice) + self.lm.weight(e.lm)
    }
}

impl TimedFst for ComposedFst<'_> {
    fn time(&self, v: ComposedVertex) -> i64 {
        self.lattice.time(v.lattice)
    }

    fn lattice_weight(&self, e: ComposedEdge) -> f64 {
        self.lattice.weight(e.lattice)
    }

    fn lm_weight(&self, e: ComposedEdge) -> f64 {
        self.lm.weight(e.lm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentationConfig;
    use crate::fst::segmentation_lattice;

    fn toy_bigram() -> LanguageModel {
        LanguageModel::bigram(
            &[("<s>", -99.0), ("</s>", -1.0), ("a", -0.5), ("b", -0.9)],
            &[("<s>", "a", -0.1), ("a", "b", -0.2), ("b", "</s>", -0.3)],
            &[("<s>", -0.7), ("a", -0.4), ("b", -0.6)],
        )
        .unwrap()
    }

    #[test]
    fn labeled_edges_pair_with_matching_words() {
        let mut lat = Lattice::new();
        let v0 = lat.add_vertex(0);
        let v1 = lat.add_vertex(2);
        lat.add_edge(v0, v1, EPSILON, "a", 0.25).unwrap();
        lat.add_edge(v0, v1, EPSILON, "b", 0.0).unwrap();
        lat.add_initial(v0).unwrap();
        lat.add_final(v1).unwrap();
        let lm = LanguageModel::unigram(&["a"]).unwrap();

        let comp = ComposedFst::new(&lat, &lm).unwrap();
        let start = comp.initials()[0];
        let out = comp.out_edges(start);
        assert_eq!(out.len(), 1);
        assert_eq!(comp.output(out[0]), "a");
        assert_eq!(comp.weight(out[0]), 0.25);
        assert_eq!(comp.in_edges(comp.head(out[0])), out);
    }

    #[test]
    fn weight_splits_into_lattice_and_lm_parts() {
        let mut lat = Lattice::new();
        let v0 = lat.add_vertex(0);
        let v1 = lat.add_vertex(2);
        lat.add_edge(v0, v1, EPSILON, "a", 0.25).unwrap();
        lat.add_initial(v0).unwrap();
        lat.add_final(v1).unwrap();
        let lm = toy_bigram();

        let comp = ComposedFst::new(&lat, &lm).unwrap();
        let out = comp.out_edges(comp.initials()[0]);
        assert_eq!(out.len(), 1);
        let e = out[0];
        assert_eq!(comp.lattice_weight(e), 0.25);
        assert!(comp.lm_weight(e) < 0.0);
        assert_eq!(comp.lattice_weight(e) + comp.lm_weight(e), comp.weight(e));
    }

    #[test]
    fn wildcard_lattice_takes_lm_labels() {
        let cfg = SegmentationConfig::default().with_max_seg(2);
        let mut lat = segmentation_lattice(3, &cfg, &[ANY]).unwrap();
        lat.add_eps_loops();
        let lm = toy_bigram();
        let comp = ComposedFst::new(&lat, &lm).unwrap();

        for v in comp.reachable_order() {
            for e in comp.out_edges(v) {
                let label = comp.output(e);
                assert_ne!(label, ANY);
                if label == EPSILON {
                    assert_eq!(comp.duration(e), 0);
                } else {
                    assert!(comp.duration(e) > 0);
                }
            }
        }
    }

    #[test]
    fn erased_lm_overwrites_lattice_labels() {
        let mut lat = Lattice::new();
        let v0 = lat.add_vertex(0);
        let v1 = lat.add_vertex(1);
        lat.add_edge(v0, v1, EPSILON, "x", 0.0).unwrap();
        lat.add_initial(v0).unwrap();
        lat.add_final(v1).unwrap();
        let lm = LanguageModel::unigram(&["a", "b"]).unwrap().erase_input();

        let comp = ComposedFst::new(&lat, &lm).unwrap();
        let out = comp.out_edges(comp.initials()[0]);
        let labels: Vec<&str> = out.iter().map(|&e| comp.output(e)).collect();
        assert_eq!(labels, vec!["a", "b"]);
    }

    #[test]
    fn reachable_order_is_topological() {
        let cfg = SegmentationConfig::default().with_max_seg(3);
        let mut lat = segmentation_lattice(6, &cfg, &[ANY]).unwrap();
        lat.add_eps_loops();
        let lm = toy_bigram();
        let comp = ComposedFst::new(&lat, &lm).unwrap();

        let order = comp.reachable_order();
        let pos: HashMap<ComposedVertex, usize> =
            order.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        assert_eq!(pos.len(), order.len(), "duplicate vertex in order");
        assert_eq!(order[0], comp.initials()[0]);

        for &v in &order {
            for e in comp.out_edges(v) {
                let h = comp.head(e);
                assert!(pos[&v] < pos[&h], "{v:?} -> {h:?} out of order");
            }
        }
    }

    #[test]
    fn back_off_reaches_null_history_in_place() {
        let mut lat = Lattice::new();
        let v0 = lat.add_vertex(0);
        let v1 = lat.add_vertex(1);
        lat.add_edge(v0, v1, EPSILON, ANY, 0.0).unwrap();
        lat.add_initial(v0).unwrap();
        lat.add_final(v1).unwrap();
        lat.add_eps_loops();
        let lm = toy_bigram();
        let comp = ComposedFst::new(&lat, &lm).unwrap();

        let order = comp.reachable_order();
        assert!(order.contains(&ComposedVertex { lattice: v0, lm: 0 }));
    }

    #[test]
    fn epsilon_cycle_fails_composition() {
        let lat = {
            let mut lat = Lattice::new();
            let v = lat.add_vertex(0);
            lat.add_initial(v).unwrap();
            lat.add_final(v).unwrap();
            lat
        };
        let mut lm = LanguageModel::new();
        let a = lm.add_vertex("a");
        lm.add_edge(a, a, EPSILON, EPSILON, 0.0).unwrap();
        lm.add_initial(a).unwrap();
        lm.add_final(a).unwrap();

        assert!(ComposedFst::new(&lat, &lm).is_err());
    }
}
