//! # One-Best Search
//!
//! Max-semiring dynamic programs over a [`Trellis`]. The forward pass keeps,
//! per vertex, the best incoming edge; the backward pass keeps the best
//! outgoing edge. Ties go to the edge seen first, since a candidate must
//! score strictly higher to replace the current best.

use tracing::{debug, debug_span};

use super::trellis::Trellis;
use crate::error::{Result, ScrfError};
use crate::fst::{Fst, Path};
use crate::score::EdgeScore;

/// Best scores and pointers for every vertex of a trellis.
pub struct OneBest<F: Fst> {
    value: Vec<f64>,
    /// `(edge, neighbor position)`: predecessor for a forward pass,
    /// successor for a backward pass.
    pointer: Vec<Option<(F::Edge, usize)>>,
}

impl<F: Fst> OneBest<F> {
    /// Best score of any path from an initial vertex to each vertex.
    pub fn forward(trellis: &Trellis<'_, F>) -> Self {
        let _span = debug_span!("one_best_forward", vertices = trellis.len()).entered();
        let n = trellis.len();
        let mut value = vec![f64::NEG_INFINITY; n];
        let mut pointer = vec![None; n];
        for i in trellis.initial_positions() {
            value[i] = 0.0;
        }

        for i in 0..n {
            for &(e, t) in trellis.incoming(i) {
                if value[t] == f64::NEG_INFINITY {
                    continue;
                }
                let w = trellis.weight(e).unwrap_or(f64::NEG_INFINITY);
                let candidate = value[t] + w;
                if candidate > value[i] {
                    value[i] = candidate;
                    pointer[i] = Some((e, t));
                }
            }
        }

        Self { value, pointer }
    }

    /// Best score of any path from each vertex to a final vertex.
    pub fn backward(trellis: &Trellis<'_, F>) -> Self {
        let _span = debug_span!("one_best_backward", vertices = trellis.len()).entered();
        let n = trellis.len();
        let mut value = vec![f64::NEG_INFINITY; n];
        let mut pointer = vec![None; n];
        for i in trellis.final_positions() {
            value[i] = 0.0;
        }

        for i in (0..n).rev() {
            for &(e, h) in trellis.outgoing(i) {
                if value[h] == f64::NEG_INFINITY {
                    continue;
                }
                let w = trellis.weight(e).unwrap_or(f64::NEG_INFINITY);
                let candidate = w + value[h];
                if candidate > value[i] {
                    value[i] = candidate;
                    pointer[i] = Some((e, h));
                }
            }
        }

        Self { value, pointer }
    }

    pub fn value(&self, i: usize) -> f64 {
        self.value[i]
    }

    pub fn pointer(&self, i: usize) -> Option<(F::Edge, usize)> {
        self.pointer[i]
    }

    /// Best-valued position among `candidates`, first one on ties.
    fn best_of(&self, candidates: Vec<usize>) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for i in candidates {
            let v = self.value[i];
            if v == f64::NEG_INFINITY {
                continue;
            }
            if best.is_none_or(|(_, b)| v > b) {
                best = Some((i, v));
            }
        }
        best
    }

    /// Best final vertex of a forward pass and its score.
    pub fn best_final(&self, trellis: &Trellis<'_, F>) -> Option<(usize, f64)> {
        self.best_of(trellis.final_positions())
    }

    /// Best initial vertex of a backward pass and its score.
    pub fn best_initial(&self, trellis: &Trellis<'_, F>) -> Option<(usize, f64)> {
        self.best_of(trellis.initial_positions())
    }

    /// Follow forward-pass pointers back from the best final vertex.
    pub fn path<'a>(&self, trellis: &Trellis<'a, F>) -> Result<Path<'a, F>> {
        let (mut i, _) = self.best_final(trellis).ok_or(ScrfError::NoPath)?;
        let mut edges = Vec::new();
        while let Some((e, t)) = self.pointer[i] {
            edges.push(e);
            i = t;
        }
        edges.reverse();
        Ok(Path::new(trellis.fst(), edges))
    }
}

/// The highest-scoring initial-to-final path under `score`, visiting
/// vertices in `order`.
pub fn shortest_path<'a, F, S>(fst: &'a F, order: Vec<F::Vertex>, score: &S) -> Result<Path<'a, F>>
where
    F: Fst,
    S: EdgeScore<F> + ?Sized,
{
    let trellis = Trellis::new(fst, order, score);
    let best = OneBest::forward(&trellis);
    let path = best.path(&trellis)?;
    debug!(edges = path.len(), "shortest path");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fst::{EPSILON, Lattice};
    use crate::score::{FstWeight, TableScore};

    /// Two parallel routes from 0 to 2: direct (edge 0) and via 1 (edges 1, 2).
    fn triangle(direct: f64, first: f64, second: f64) -> Lattice {
        let mut lat = Lattice::new();
        let v0 = lat.add_vertex(0);
        let v1 = lat.add_vertex(1);
        let v2 = lat.add_vertex(2);
        lat.add_edge(v0, v2, EPSILON, "c", direct).unwrap();
        lat.add_edge(v0, v1, EPSILON, "a", first).unwrap();
        lat.add_edge(v1, v2, EPSILON, "b", second).unwrap();
        lat.add_initial(v0).unwrap();
        lat.add_final(v2).unwrap();
        lat
    }

    #[test]
    fn picks_the_higher_route() {
        let lat = triangle(1.0, 0.75, 0.5);
        let path = shortest_path(&lat, lat.time_order(), &FstWeight).unwrap();
        assert_eq!(path.edges(), &[1, 2]);
        assert_eq!(path.score(&FstWeight), 1.25);
    }

    #[test]
    fn handles_negative_scores() {
        let lat = triangle(-3.0, -1.0, -1.5);
        let path = shortest_path(&lat, lat.time_order(), &FstWeight).unwrap();
        assert_eq!(path.edges(), &[1, 2]);
        assert_eq!(path.weight(), -2.5);
    }

    #[test]
    fn ties_go_to_first_in_edge() {
        // direct route is the first in-edge of vertex 2
        let lat = triangle(1.0, 0.5, 0.5);
        let path = shortest_path(&lat, lat.time_order(), &FstWeight).unwrap();
        assert_eq!(path.edges(), &[0]);
    }

    #[test]
    fn ties_go_to_first_final() {
        let mut lat = Lattice::new();
        let v0 = lat.add_vertex(0);
        let a = lat.add_vertex(1);
        let b = lat.add_vertex(1);
        lat.add_edge(v0, b, EPSILON, "b", 1.0).unwrap();
        lat.add_edge(v0, a, EPSILON, "a", 1.0).unwrap();
        lat.add_initial(v0).unwrap();
        lat.add_final(b).unwrap();
        lat.add_final(a).unwrap();

        let path = shortest_path(&lat, lat.time_order(), &FstWeight).unwrap();
        assert_eq!(path.labels(), vec!["b"]);
    }

    #[test]
    fn disconnected_lattice_has_no_path() {
        let mut lat = Lattice::new();
        let v0 = lat.add_vertex(0);
        let v1 = lat.add_vertex(1);
        lat.add_initial(v0).unwrap();
        lat.add_final(v1).unwrap();

        let err = shortest_path(&lat, lat.time_order(), &FstWeight).unwrap_err();
        assert!(matches!(err, ScrfError::NoPath));
    }

    #[test]
    fn initial_equal_to_final_gives_empty_path() {
        let mut lat = Lattice::new();
        let v0 = lat.add_vertex(0);
        lat.add_initial(v0).unwrap();
        lat.add_final(v0).unwrap();
        let path = shortest_path(&lat, lat.time_order(), &FstWeight).unwrap();
        assert!(path.is_empty());
    }

    #[test]
    fn forward_and_backward_maxima_agree() {
        let lat = triangle(1.0, 0.75, 0.5);
        let table: TableScore<usize> = [(0, 0.2), (1, 0.3), (2, 0.4)].into_iter().collect();
        let trellis = Trellis::new(&lat, lat.time_order(), &table);

        let fwd = OneBest::forward(&trellis);
        let bwd = OneBest::backward(&trellis);
        let (_, f) = fwd.best_final(&trellis).unwrap();
        let (_, b) = bwd.best_initial(&trellis).unwrap();
        assert!((f - 0.7).abs() < 1e-12);
        assert!((b - 0.7).abs() < 1e-12);
        assert_eq!(bwd.pointer(0), Some((1, 1)));
    }
}
