//! Topological orders.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Result, ScrfError};
use crate::fst::{ComposedFst, Fst, Lattice};

/// Automata that know a topological order of their vertices.
pub trait TopoOrder: Fst {
    fn topo_order(&self) -> Result<Vec<Self::Vertex>>;
}

impl TopoOrder for Lattice {
    /// Time order; every non-loop edge advances time.
    fn topo_order(&self) -> Result<Vec<usize>> {
        self.validate()?;
        Ok(self.time_order())
    }
}

impl TopoOrder for ComposedFst<'_> {
    fn topo_order(&self) -> Result<Vec<Self::Vertex>> {
        Ok(self.reachable_order())
    }
}

/// Kahn's algorithm over the vertices reachable from the initials, for any
/// automaton. Self-loops are ignored; any other cycle is malformed input.
pub fn kahn_order<F: Fst>(fst: &F) -> Result<Vec<F::Vertex>> {
    let mut reachable: HashSet<F::Vertex> = HashSet::new();
    let mut stack = fst.initials();
    while let Some(v) = stack.pop() {
        if reachable.insert(v) {
            stack.extend(fst.out_edges(v).into_iter().map(|e| fst.head(e)));
        }
    }

    let mut indegree: HashMap<F::Vertex, usize> = reachable.iter().map(|&v| (v, 0)).collect();
    for &v in &reachable {
        for e in fst.out_edges(v) {
            let h = fst.head(e);
            if h != v {
                *indegree.entry(h).or_insert(0) += 1;
            }
        }
    }

    let mut ready: VecDeque<F::Vertex> = VecDeque::new();
    let mut queued: HashSet<F::Vertex> = HashSet::new();
    for v in fst.initials() {
        if indegree[&v] == 0 && queued.insert(v) {
            ready.push_back(v);
        }
    }

    let mut order = Vec::with_capacity(reachable.len());
    while let Some(v) = ready.pop_front() {
        order.push(v);
        for e in fst.out_edges(v) {
            let h = fst.head(e);
            if h == v {
                continue;
            }
            if let Some(d) = indegree.get_mut(&h) {
                *d -= 1;
                if *d == 0 {
                    ready.push_back(h);
                }
            }
        }
    }

    if order.len() != reachable.len() {
        return Err(ScrfError::malformed(format!(
            "cycle among {} reachable vertices",
            reachable.len() - order.len()
        )));
    }
    Ok(order)
}

/// Whether every edge between ordered vertices goes forward in `order`.
/// Self-loops are allowed.
pub fn is_topological<F: Fst>(fst: &F, order: &[F::Vertex]) -> bool {
    let pos: HashMap<F::Vertex, usize> = order.iter().enumerate().map(|(i, &v)| (v, i)).collect();
    order.iter().all(|&v| {
        fst.out_edges(v).into_iter().all(|e| {
            let h = fst.head(e);
            h == v || pos.get(&h).is_none_or(|&j| pos[&v] < j)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentationConfig;
    use crate::fst::{ANY, EPSILON, LanguageModel, segmentation_lattice};

    #[test]
    fn kahn_orders_a_diamond() {
        let mut lat = Lattice::new();
        let a = lat.add_vertex(0);
        let b = lat.add_vertex(1);
        let c = lat.add_vertex(2);
        let d = lat.add_vertex(3);
        lat.add_edge(a, c, EPSILON, "x", 0.0).unwrap();
        lat.add_edge(a, b, EPSILON, "x", 0.0).unwrap();
        lat.add_edge(b, c, EPSILON, "x", 0.0).unwrap();
        lat.add_edge(c, d, EPSILON, "x", 0.0).unwrap();
        lat.add_eps_loops();
        lat.add_initial(a).unwrap();
        lat.add_final(d).unwrap();

        let order = kahn_order(&lat).unwrap();
        assert_eq!(order, vec![a, b, c, d]);
        assert!(is_topological(&lat, &order));
        assert!(!is_topological(&lat, &[d, c, b, a]));
    }

    #[test]
    fn kahn_skips_unreachable_vertices() {
        let mut lat = Lattice::new();
        let a = lat.add_vertex(0);
        let b = lat.add_vertex(1);
        let orphan = lat.add_vertex(0);
        lat.add_edge(a, b, EPSILON, "x", 0.0).unwrap();
        lat.add_edge(orphan, b, EPSILON, "x", 0.0).unwrap();
        lat.add_initial(a).unwrap();

        assert_eq!(kahn_order(&lat).unwrap(), vec![a, b]);
    }

    #[test]
    fn kahn_rejects_cycles() {
        let mut lm = LanguageModel::new();
        let a = lm.add_vertex("a");
        let b = lm.add_vertex("b");
        lm.add_edge(a, b, "x", "x", 0.0).unwrap();
        lm.add_edge(b, a, "y", "y", 0.0).unwrap();
        lm.add_initial(a).unwrap();

        assert!(matches!(kahn_order(&lm), Err(ScrfError::MalformedInput(_))));
    }

    #[test]
    fn composed_order_matches_kahn_membership() {
        let cfg = SegmentationConfig::default().with_max_seg(2);
        let mut lat = segmentation_lattice(4, &cfg, &[ANY]).unwrap();
        lat.add_eps_loops();
        let lm = LanguageModel::bigram(
            &[("<s>", -99.0), ("</s>", -1.0), ("a", -0.5)],
            &[("a", "a", -0.2)],
            &[("<s>", -0.3), ("a", -0.1)],
        )
        .unwrap();
        let comp = ComposedFst::new(&lat, &lm).unwrap();

        let order = comp.topo_order().unwrap();
        assert!(is_topological(&comp, &order));

        let mut lazy: Vec<_> = order.clone();
        let mut kahn = kahn_order(&comp).unwrap();
        lazy.sort();
        kahn.sort();
        assert_eq!(lazy, kahn);
    }
}
