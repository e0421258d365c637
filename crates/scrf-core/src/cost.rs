//! # Segment Overlap Cost
//!
//! How far a candidate segment is from a reference segmentation. The
//! candidate is compared against the reference segments it overlaps most;
//! against each of those the cost is the non-shared part of the union when
//! the labels match and the whole union when they do not. A structural label
//! (sentence boundary, silence) matched against the same label is compared
//! on timing alone. The edge cost is the smallest of these.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::Result;
use crate::fst::{Path, TimedFst};
use crate::score::{EdgeScore, Scaled};
use crate::search::shortest_path;
use crate::segment::Segment;

/// Indices of the reference segments sharing the most frames with
/// `[start, end)`. Empty when none overlaps it at all.
fn max_overlap(reference: &[Segment], start: i64, end: i64) -> Vec<usize> {
    let mut best = 0;
    let mut indices = Vec::new();
    for (i, seg) in reference.iter().enumerate() {
        let overlap = seg.overlap(start, end);
        if overlap <= 0 {
            continue;
        }
        if overlap > best {
            best = overlap;
            indices.clear();
        }
        if overlap == best {
            indices.push(i);
        }
    }
    indices
}

fn cost_against(
    seg: &Segment,
    start: i64,
    end: i64,
    label: &str,
    structural: &HashSet<String>,
) -> i64 {
    let overlap = seg.overlap(start, end);
    if seg.label == label && structural.contains(label) {
        (end - start) - overlap
    } else if seg.label == label {
        seg.union(start, end) - overlap
    } else {
        seg.union(start, end)
    }
}

fn cost_among(
    reference: &[Segment],
    candidates: &[usize],
    start: i64,
    end: i64,
    label: &str,
    structural: &HashSet<String>,
) -> f64 {
    if start == end {
        return 0.0;
    }
    candidates
        .iter()
        .map(|&i| cost_against(&reference[i], start, end, label, structural))
        .min()
        .unwrap_or(end - start) as f64
}

/// Cost of the candidate segment `[start, end)` labeled `label`.
///
/// Zero-duration candidates cost 0. A candidate that overlaps no reference
/// segment costs its duration.
pub fn overlap_cost(
    start: i64,
    end: i64,
    label: &str,
    reference: &[Segment],
    structural: &HashSet<String>,
) -> f64 {
    let candidates = max_overlap(reference, start, end);
    cost_among(reference, &candidates, start, end, label, structural)
}

/// Overlap cost against one reference segmentation, as an edge scorer.
///
/// The most-overlapping reference segments of each interval are memoized,
/// so the scorer belongs to exactly one reference; build a new one for the
/// next example.
#[derive(Debug)]
pub struct OverlapCost {
    reference: Vec<Segment>,
    structural: HashSet<String>,
    cache: RefCell<HashMap<(i64, i64), Vec<usize>>>,
}

impl OverlapCost {
    pub fn new<S: AsRef<str>>(reference: Vec<Segment>, structural: &[S]) -> Self {
        Self {
            reference,
            structural: structural.iter().map(|s| s.as_ref().to_string()).collect(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Cost against the segmentation a path induces.
    pub fn from_path<F: TimedFst, S: AsRef<str>>(path: &Path<'_, F>, structural: &[S]) -> Self {
        Self::new(path.segments(), structural)
    }

    pub fn reference(&self) -> &[Segment] {
        &self.reference
    }

    pub fn cost(&self, start: i64, end: i64, label: &str) -> f64 {
        if start == end {
            return 0.0;
        }
        let mut cache = self.cache.borrow_mut();
        let candidates = cache
            .entry((start, end))
            .or_insert_with(|| max_overlap(&self.reference, start, end));
        cost_among(
            &self.reference,
            candidates,
            start,
            end,
            label,
            &self.structural,
        )
    }

    /// Number of memoized intervals.
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }
}

impl<F: TimedFst> EdgeScore<F> for OverlapCost {
    fn score(&self, fst: &F, e: F::Edge) -> f64 {
        let start = fst.time(fst.tail(e));
        let end = fst.time(fst.head(e));
        self.cost(start, end, fst.output(e))
    }
}

/// The path through `graph` whose segmentation is closest to `reference`,
/// found by maximizing the negated overlap cost.
pub fn min_cost_path<'a, F, S>(
    graph: &'a F,
    order: Vec<F::Vertex>,
    reference: &[Segment],
    structural: &[S],
) -> Result<Path<'a, F>>
where
    F: TimedFst,
    S: AsRef<str>,
{
    let cost = OverlapCost::new(reference.to_vec(), structural);
    let path = shortest_path(graph, order, &Scaled::new(&cost, -1.0))?;
    debug!(
        cost = path.score(&cost),
        segments = reference.len(),
        "min-cost reference path"
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_STRUCTURAL_LABELS, SegmentationConfig};
    use crate::fst::{EPSILON, Lattice, segmentation_lattice};

    fn seg(start: i64, end: i64, label: &str) -> Segment {
        Segment::new(start, end, label).unwrap()
    }

    fn structural() -> HashSet<String> {
        DEFAULT_STRUCTURAL_LABELS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match_costs_nothing() {
        let reference = vec![seg(0, 3, "a"), seg(3, 7, "b")];
        assert_eq!(overlap_cost(0, 3, "a", &reference, &structural()), 0.0);
        assert_eq!(overlap_cost(3, 7, "b", &reference, &structural()), 0.0);
    }

    #[test]
    fn no_overlap_costs_duration() {
        let reference = vec![seg(0, 3, "a")];
        assert_eq!(overlap_cost(5, 9, "a", &reference, &structural()), 4.0);
        assert_eq!(overlap_cost(5, 9, "z", &reference, &structural()), 4.0);
        assert_eq!(overlap_cost(0, 2, "a", &[], &structural()), 2.0);
    }

    #[test]
    fn label_mismatch_costs_union() {
        let reference = vec![seg(0, 4, "a")];
        // overlap 2, union 6
        assert_eq!(overlap_cost(2, 6, "a", &reference, &structural()), 4.0);
        assert_eq!(overlap_cost(2, 6, "b", &reference, &structural()), 6.0);
    }

    #[test]
    fn structural_labels_compare_timing_only() {
        let reference = vec![seg(0, 4, "sil")];
        // duration 4, overlap 2
        assert_eq!(overlap_cost(2, 6, "sil", &reference, &structural()), 2.0);
        // two different structural labels are an ordinary mismatch
        assert_eq!(overlap_cost(2, 6, "<s>", &reference, &structural()), 6.0);
        // only one side structural: ordinary mismatch
        assert_eq!(overlap_cost(2, 6, "a", &reference, &structural()), 6.0);
    }

    #[test]
    fn ties_take_the_cheapest_reference() {
        // [2, 6) overlaps both references by 2 frames
        let reference = vec![seg(0, 4, "a"), seg(4, 8, "b")];
        // against a: union 6 - 2; against b: union 6 (mismatch)
        assert_eq!(overlap_cost(2, 6, "a", &reference, &structural()), 4.0);
        assert_eq!(overlap_cost(2, 6, "b", &reference, &structural()), 4.0);
        assert_eq!(overlap_cost(2, 6, "c", &reference, &structural()), 6.0);
    }

    #[test]
    fn only_the_largest_overlap_counts() {
        let reference = vec![seg(0, 5, "a"), seg(5, 6, "b")];
        // overlaps a by 4 and b by 1; b would be cheaper but a wins
        assert_eq!(overlap_cost(1, 6, "b", &reference, &structural()), 6.0);
    }

    #[test]
    fn scorer_caches_intervals() {
        let mut lat = Lattice::new();
        let v0 = lat.add_vertex(0);
        let v1 = lat.add_vertex(2);
        let a = lat.add_edge(v0, v1, EPSILON, "a", 0.0).unwrap();
        let b = lat.add_edge(v0, v1, EPSILON, "b", 0.0).unwrap();
        lat.add_eps_loops();

        let cost = OverlapCost::new(vec![seg(0, 2, "a")], &DEFAULT_STRUCTURAL_LABELS);
        assert_eq!(cost.score(&lat, a), 0.0);
        assert_eq!(cost.score(&lat, b), 2.0);
        assert_eq!(cost.cached(), 1);

        let eps = lat.out_edges_labeled(v0, EPSILON)[0];
        assert_eq!(cost.score(&lat, eps), 0.0);
        assert_eq!(cost.cached(), 1);
    }

    #[test]
    fn min_cost_path_recovers_reference() {
        let cfg = SegmentationConfig::default().with_max_seg(4);
        let lat = segmentation_lattice(6, &cfg, &["a", "b", "sil"]).unwrap();
        let reference = vec![seg(0, 2, "sil"), seg(2, 5, "a"), seg(5, 6, "b")];

        let path =
            min_cost_path(&lat, lat.time_order(), &reference, &DEFAULT_STRUCTURAL_LABELS).unwrap();
        assert_eq!(path.segments(), reference);
    }
}
