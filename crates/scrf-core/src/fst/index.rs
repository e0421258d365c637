use std::collections::HashMap;

use super::{EdgeId, VertexId};

/// In/out adjacency lists, plain and keyed by input label.
#[derive(Debug, Clone, Default)]
pub(crate) struct AdjacencyIndex {
    in_edges: Vec<Vec<EdgeId>>,
    out_edges: Vec<Vec<EdgeId>>,
    in_by_label: Vec<HashMap<String, Vec<EdgeId>>>,
    out_by_label: Vec<HashMap<String, Vec<EdgeId>>>,
}

impl AdjacencyIndex {
    pub(crate) fn push_vertex(&mut self) {
        self.in_edges.push(Vec::new());
        self.out_edges.push(Vec::new());
        self.in_by_label.push(HashMap::new());
        self.out_by_label.push(HashMap::new());
    }

    pub(crate) fn push_edge(&mut self, e: EdgeId, tail: VertexId, head: VertexId, input: &str) {
        self.out_edges[tail].push(e);
        self.in_edges[head].push(e);
        self.out_by_label[tail]
            .entry(input.to_string())
            .or_default()
            .push(e);
        self.in_by_label[head]
            .entry(input.to_string())
            .or_default()
            .push(e);
    }

    pub(crate) fn in_edges(&self, v: VertexId) -> &[EdgeId] {
        &self.in_edges[v]
    }

    pub(crate) fn out_edges(&self, v: VertexId) -> &[EdgeId] {
        &self.out_edges[v]
    }

    pub(crate) fn in_edges_labeled(&self, v: VertexId, label: &str) -> &[EdgeId] {
        self.in_by_label[v]
            .get(label)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn out_edges_labeled(&self, v: VertexId, label: &str) -> &[EdgeId] {
        self.out_by_label[v]
            .get(label)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
