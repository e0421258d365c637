//! Time-stamped segmentation lattices.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use super::index::AdjacencyIndex;
use super::{ANY, EPSILON, EdgeId, Fst, TimedFst, VertexId};
use crate::config::SegmentationConfig;
use crate::error::{Result, ScrfError};
use crate::segment::Segment;

/// A lattice vertex: a point on the acoustic timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexData {
    /// Frame index.
    pub time: i64,
}

/// A lattice edge: a candidate segment between two vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    pub tail: VertexId,
    pub head: VertexId,
    pub input: String,
    pub output: String,
    pub weight: f64,
}

/// A weighted, labeled, time-stamped multigraph.
///
/// The lattice owns all vertex and edge storage; everything else refers to it
/// by index. Time never decreases along an edge, and only epsilon self-loops
/// may have zero duration.
#[derive(Debug, Clone, Default)]
pub struct Lattice {
    /// Utterance name, carried through for reporting.
    pub name: String,
    vertices: Vec<VertexData>,
    edges: Vec<EdgeData>,
    index: AdjacencyIndex,
    initials: Vec<VertexId>,
    finals: Vec<VertexId>,
}

impl Lattice {
    /// Create an empty lattice.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty lattice with an utterance name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a vertex at the given frame and return its id.
    pub fn add_vertex(&mut self, time: i64) -> VertexId {
        let v = self.vertices.len();
        self.vertices.push(VertexData { time });
        self.index.push_vertex();
        v
    }

    /// Add an edge and return its id.
    ///
    /// Fails when an endpoint does not exist, or when the edge would go back
    /// in time or have zero duration without being an epsilon self-loop.
    pub fn add_edge(
        &mut self,
        tail: VertexId,
        head: VertexId,
        input: impl Into<String>,
        output: impl Into<String>,
        weight: f64,
    ) -> Result<EdgeId> {
        let input = input.into();
        let output = output.into();

        let (tail_time, head_time) = match (self.vertices.get(tail), self.vertices.get(head)) {
            (Some(t), Some(h)) => (t.time, h.time),
            _ => {
                return Err(ScrfError::malformed(format!(
                    "edge {tail} -> {head} refers to a missing vertex"
                )));
            }
        };

        let eps_loop = tail == head && input == EPSILON && output == EPSILON;
        if head_time < tail_time || (head_time == tail_time && !eps_loop) {
            return Err(ScrfError::malformed(format!(
                "edge {tail} -> {head} spans [{tail_time}, {head_time}); only epsilon self-loops may have zero duration"
            )));
        }

        let e = self.edges.len();
        self.index.push_edge(e, tail, head, &input);
        self.edges.push(EdgeData {
            tail,
            head,
            input,
            output,
            weight,
        });
        Ok(e)
    }

    pub fn add_initial(&mut self, v: VertexId) -> Result<()> {
        self.check_vertex(v)?;
        self.initials.push(v);
        Ok(())
    }

    pub fn add_final(&mut self, v: VertexId) -> Result<()> {
        self.check_vertex(v)?;
        self.finals.push(v);
        Ok(())
    }

    fn check_vertex(&self, v: VertexId) -> Result<()> {
        if v < self.vertices.len() {
            Ok(())
        } else {
            Err(ScrfError::malformed(format!("vertex {v} does not exist")))
        }
    }

    /// Add an `<eps>:<eps>` zero-weight self-loop at every vertex, letting a
    /// composed automaton move on its second operand while time stands still.
    pub fn add_eps_loops(&mut self) {
        for v in 0..self.vertices.len() {
            let e = self.edges.len();
            self.index.push_edge(e, v, v, EPSILON);
            self.edges.push(EdgeData {
                tail: v,
                head: v,
                input: EPSILON.to_string(),
                output: EPSILON.to_string(),
                weight: 0.0,
            });
        }
    }

    /// Check that the lattice can be searched: it needs at least one initial
    /// and one final vertex.
    pub fn validate(&self) -> Result<()> {
        if self.initials.is_empty() {
            return Err(ScrfError::malformed("lattice has no initial vertex"));
        }
        if self.finals.is_empty() {
            return Err(ScrfError::malformed("lattice has no final vertex"));
        }
        Ok(())
    }

    /// Build a linear lattice that spells out a segmentation.
    ///
    /// Zero-length segments are skipped. Segments are laid end to end, so a
    /// gap or overlap between consecutive segments is rejected.
    pub fn from_segments(name: impl Into<String>, segments: &[Segment]) -> Result<Self> {
        let mut lat = Lattice::with_name(name);
        let start = segments.first().map(|s| s.start).unwrap_or(0);
        let mut v = lat.add_vertex(start);
        lat.add_initial(v)?;

        for seg in segments {
            if seg.start == seg.end {
                continue;
            }
            if seg.start != lat.vertices[v].time {
                return Err(ScrfError::malformed(format!(
                    "segment {seg} does not start where the previous one ended ({})",
                    lat.vertices[v].time
                )));
            }
            let u = lat.add_vertex(seg.end);
            lat.add_edge(v, u, EPSILON, seg.label.as_str(), 0.0)?;
            v = u;
        }

        lat.add_final(v)?;
        Ok(lat)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn vertices(&self) -> Range<VertexId> {
        0..self.vertices.len()
    }

    pub fn edges(&self) -> Range<EdgeId> {
        0..self.edges.len()
    }

    pub fn vertex(&self, v: VertexId) -> &VertexData {
        &self.vertices[v]
    }

    pub fn edge(&self, e: EdgeId) -> &EdgeData {
        &self.edges[e]
    }

    /// Out-edges of `v` whose input label is `label`.
    pub fn out_edges_labeled(&self, v: VertexId, label: &str) -> &[EdgeId] {
        self.index.out_edges_labeled(v, label)
    }

    /// In-edges of `v` whose input label is `label`.
    pub fn in_edges_labeled(&self, v: VertexId, label: &str) -> &[EdgeId] {
        self.index.in_edges_labeled(v, label)
    }

    pub(crate) fn out_edge_slice(&self, v: VertexId) -> &[EdgeId] {
        self.index.out_edges(v)
    }

    pub(crate) fn in_edge_slice(&self, v: VertexId) -> &[EdgeId] {
        self.index.in_edges(v)
    }

    pub fn is_eps_loop(&self, e: EdgeId) -> bool {
        let edge = &self.edges[e];
        edge.tail == edge.head && edge.output == EPSILON
    }

    /// Vertices sorted by time, ties broken by id. Since every non-loop edge
    /// strictly advances time, this is a topological order.
    pub fn time_order(&self) -> Vec<VertexId> {
        let mut order: Vec<VertexId> = self.vertices().collect();
        order.sort_by_key(|&v| (self.vertices[v].time, v));
        order
    }
}

impl Fst for Lattice {
    type Vertex = VertexId;
    type Edge = EdgeId;

    fn initials(&self) -> Vec<VertexId> {
        self.initials.clone()
    }

    fn finals(&self) -> Vec<VertexId> {
        self.finals.clone()
    }

    fn tail(&self, e: EdgeId) -> VertexId {
        self.edges[e].tail
    }

    fn head(&self, e: EdgeId) -> VertexId {
        self.edges[e].head
    }

    fn in_edges(&self, v: VertexId) -> Vec<EdgeId> {
        self.index.in_edges(v).to_vec()
    }

    fn out_edges(&self, v: VertexId) -> Vec<EdgeId> {
        self.index.out_edges(v).to_vec()
    }

    fn input(&self, e: EdgeId) -> &str {
        &self.edges[e].input
    }

    fn output(&self, e: EdgeId) -> &str {
        &self.edges[e].output
    }

    fn weight(&self, e: EdgeId) -> f64 {
        self.edges[e].weight
    }
}

impl TimedFst for Lattice {
    fn time(&self, v: VertexId) -> i64 {
        self.vertices[v].time
    }
}

/// Build the full segmentation lattice over `frames` frames.
///
/// Vertices sit every `stride` frames, plus one at `frames` when the stride
/// does not divide it. Every vertex pair whose duration lies in
/// `[min_seg, max_seg]` gets one edge per label; pass `&[ANY]` to leave the
/// labeling to a language model in a later composition.
pub fn segmentation_lattice<S: AsRef<str>>(
    frames: usize,
    config: &SegmentationConfig,
    labels: &[S],
) -> Result<Lattice> {
    let _span = debug_span!("segmentation_lattice", frames, labels = labels.len()).entered();

    config.validate()?;
    if labels.is_empty() {
        return Err(ScrfError::malformed("segmentation lattice needs at least one label"));
    }
    if labels.iter().any(|l| l.as_ref() == EPSILON) {
        return Err(ScrfError::malformed(
            "segmentation lattice labels must not contain <eps>",
        ));
    }

    let frames = frames as i64;
    let stride = config.stride as i64;
    let mut lat = Lattice::new();

    let mut t = 0;
    while t <= frames {
        lat.add_vertex(t);
        t += stride;
    }
    if frames % stride != 0 {
        lat.add_vertex(frames);
    }

    let n = lat.vertex_count();
    for u in 0..n {
        for v in (u + 1)..n {
            let duration = lat.vertices[v].time - lat.vertices[u].time;
            if duration < config.min_seg as i64 {
                continue;
            }
            if duration > config.max_seg as i64 {
                break;
            }
            for label in labels {
                lat.add_edge(u, v, EPSILON, label.as_ref(), 0.0)?;
            }
        }
    }

    lat.add_initial(0)?;
    lat.add_final(n - 1)?;

    debug!(vertices = n, edges = lat.edge_count());
    Ok(lat)
}

/// Whether every label of a lattice is the wildcard, i.e. the lattice only
/// segments and leaves labeling to a language model.
pub fn is_unlabeled(lat: &Lattice) -> bool {
    lat.edges
        .iter()
        .all(|e| e.output == ANY || (e.tail == e.head && e.output == EPSILON))
}
