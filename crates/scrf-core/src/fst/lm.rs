//! Back-off language-model automata.

use std::collections::{BinaryHeap, HashMap};

use tracing::debug;

use super::index::AdjacencyIndex;
use super::lattice::EdgeData;
use super::{ANY, EPSILON, EdgeId, Fst, VertexId};
use crate::error::{Result, ScrfError};

/// Sentence-start history.
pub const SENTENCE_START: &str = "<s>";

/// Sentence-end word.
pub const SENTENCE_END: &str = "</s>";

/// A language model as a weighted automaton whose vertices are histories.
///
/// Word edges carry the word on both sides; back-off edges carry `<eps>` on
/// both sides. Weights are natural-log probabilities.
#[derive(Debug, Clone, Default)]
pub struct LanguageModel {
    histories: Vec<String>,
    edges: Vec<EdgeData>,
    index: AdjacencyIndex,
    initials: Vec<VertexId>,
    finals: Vec<VertexId>,
}

impl LanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a history state and return its id.
    pub fn add_vertex(&mut self, history: impl Into<String>) -> VertexId {
        let v = self.histories.len();
        self.histories.push(history.into());
        self.index.push_vertex();
        v
    }

    pub fn add_edge(
        &mut self,
        tail: VertexId,
        head: VertexId,
        input: impl Into<String>,
        output: impl Into<String>,
        weight: f64,
    ) -> Result<EdgeId> {
        if tail >= self.histories.len() || head >= self.histories.len() {
            return Err(ScrfError::malformed(format!(
                "LM edge {tail} -> {head} refers to a missing state"
            )));
        }
        let input = input.into();
        let e = self.edges.len();
        self.index.push_edge(e, tail, head, &input);
        self.edges.push(EdgeData {
            tail,
            head,
            input,
            output: output.into(),
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
        if v < self.histories.len() {
            Ok(())
        } else {
            Err(ScrfError::malformed(format!("LM state {v} does not exist")))
        }
    }

    /// A single-state model that accepts any sequence of `labels` at no cost.
    pub fn unigram<S: AsRef<str>>(labels: &[S]) -> Result<Self> {
        let mut lm = LanguageModel::new();
        let v = lm.add_vertex("");
        for label in labels {
            let label = label.as_ref();
            if label == EPSILON {
                return Err(ScrfError::malformed("LM labels must not contain <eps>"));
            }
            lm.add_edge(v, v, label, label, 0.0)?;
        }
        lm.add_initial(v)?;
        lm.add_final(v)?;
        Ok(lm)
    }

    /// Build a back-off bigram automaton.
    ///
    /// State 0 is the null history. Every unigram word gets a history state;
    /// unigram edges leave the null history, bigram edges leave the word's
    /// history, and every history except `</s>` backs off to the null history
    /// through an `<eps>` edge weighted by its back-off weight (0 when absent).
    /// The start state is `<s>` and the final state is `</s>`, so both must be
    /// in the vocabulary.
    pub fn bigram<S: AsRef<str>>(
        unigrams: &[(S, f64)],
        bigrams: &[(S, S, f64)],
        backoffs: &[(S, f64)],
    ) -> Result<Self> {
        let mut lm = LanguageModel::new();
        let null = lm.add_vertex("");

        let mut state: HashMap<&str, VertexId> = HashMap::new();
        for (word, _) in unigrams {
            let word = word.as_ref();
            if word == EPSILON || word == ANY || word.is_empty() {
                return Err(ScrfError::malformed(format!(
                    "`{word}` cannot be an LM word"
                )));
            }
            if state.contains_key(word) {
                return Err(ScrfError::malformed(format!("unigram `{word}` listed twice")));
            }
            state.insert(word, lm.add_vertex(word));
        }

        let start = *state.get(SENTENCE_START).ok_or_else(|| {
            ScrfError::malformed(format!("LM vocabulary lacks {SENTENCE_START}"))
        })?;
        let end = *state
            .get(SENTENCE_END)
            .ok_or_else(|| ScrfError::malformed(format!("LM vocabulary lacks {SENTENCE_END}")))?;

        for (word, logp) in unigrams {
            let word = word.as_ref();
            if word == SENTENCE_START {
                continue;
            }
            lm.add_edge(null, state[word], word, word, *logp)?;
        }

        for (history, word, logp) in bigrams {
            let (history, word) = (history.as_ref(), word.as_ref());
            let tail = match state.get(history) {
                Some(&v) if history != SENTENCE_END => v,
                _ => {
                    return Err(ScrfError::malformed(format!(
                        "bigram `{history} {word}` has an unusable history"
                    )));
                }
            };
            let head = match state.get(word) {
                Some(&v) if word != SENTENCE_START => v,
                _ => {
                    return Err(ScrfError::malformed(format!(
                        "bigram `{history} {word}` predicts an unusable word"
                    )));
                }
            };
            lm.add_edge(tail, head, word, word, *logp)?;
        }

        let backoff: HashMap<&str, f64> = backoffs.iter().map(|(h, w)| (h.as_ref(), *w)).collect();
        for (word, _) in unigrams {
            let word = word.as_ref();
            if word == SENTENCE_END {
                continue;
            }
            let weight = backoff.get(word).copied().unwrap_or(0.0);
            lm.add_edge(state[word], null, EPSILON, EPSILON, weight)?;
        }

        lm.add_initial(start)?;
        lm.add_final(end)?;

        debug!(
            states = lm.vertex_count(),
            edges = lm.edge_count(),
            "built bigram LM"
        );
        Ok(lm)
    }

    /// A copy whose non-epsilon input labels are all [`ANY`], so that the
    /// model can be composed with a lattice whose labels it should overwrite.
    pub fn erase_input(&self) -> LanguageModel {
        let mut lm = LanguageModel {
            histories: self.histories.clone(),
            initials: self.initials.clone(),
            finals: self.finals.clone(),
            ..LanguageModel::default()
        };
        for _ in &self.histories {
            lm.index.push_vertex();
        }
        for edge in &self.edges {
            let input = if edge.input == EPSILON { EPSILON } else { ANY };
            let e = lm.edges.len();
            lm.index.push_edge(e, edge.tail, edge.head, input);
            lm.edges.push(EdgeData {
                input: input.to_string(),
                ..edge.clone()
            });
        }
        lm
    }

    /// Topological order of the states over `<eps>`-input edges only.
    ///
    /// Among ready states the highest id goes first. A cycle of epsilon edges
    /// (an epsilon self-loop included) is malformed input, since a product
    /// with it could loop without consuming time.
    pub fn epsilon_order(&self) -> Result<Vec<VertexId>> {
        let n = self.histories.len();
        let mut indegree = vec![0usize; n];
        for edge in self.edges.iter().filter(|e| e.input == EPSILON) {
            indegree[edge.head] += 1;
        }

        let mut ready: BinaryHeap<VertexId> = (0..n).filter(|&v| indegree[v] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(v) = ready.pop() {
            order.push(v);
            for &e in self.index.out_edges_labeled(v, EPSILON) {
                let head = self.edges[e].head;
                indegree[head] -= 1;
                if indegree[head] == 0 {
                    ready.push(head);
                }
            }
        }

        if order.len() != n {
            return Err(ScrfError::malformed(format!(
                "LM has an epsilon cycle through {} state(s)",
                n - order.len()
            )));
        }
        Ok(order)
    }

    /// Check initial/final states and epsilon acyclicity.
    pub fn validate(&self) -> Result<()> {
        if self.initials.is_empty() {
            return Err(ScrfError::malformed("LM has no initial state"));
        }
        if self.finals.is_empty() {
            return Err(ScrfError::malformed("LM has no final state"));
        }
        self.epsilon_order().map(|_| ())
    }

    pub fn history(&self, v: VertexId) -> &str {
        &self.histories[v]
    }

    pub fn vertex_count(&self) -> usize {
        self.histories.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
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
}

/// Ranks of states in [`LanguageModel::epsilon_order`], indexed by state.
pub(crate) fn epsilon_ranks(lm: &LanguageModel) -> Result<Vec<usize>> {
    let order = lm.epsilon_order()?;
    let mut rank = vec![0; order.len()];
    for (i, v) in order.into_iter().enumerate() {
        rank[v] = i;
    }
    Ok(rank)
}

impl Fst for LanguageModel {
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
