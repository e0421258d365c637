//! Label inventory.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::EPSILON;
use crate::error::{Result, ScrfError};

/// Maps labels to dense ids. Id 0 is always [`EPSILON`], so a real label's
/// row in a per-label parameter matrix is `id - 1`.
///
/// Serializes as the list of real labels in id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet {
    labels: Vec<String>,
    ids: HashMap<String, usize>,
}

impl Default for LabelSet {
    fn default() -> Self {
        Self {
            labels: vec![EPSILON.to_string()],
            ids: HashMap::from([(EPSILON.to_string(), 0)]),
        }
    }
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a label list. Duplicates and `<eps>` are rejected.
    pub fn from_labels<I, S>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for label in labels {
            let label = label.into();
            if set.ids.contains_key(&label) {
                return Err(ScrfError::malformed(format!(
                    "label `{label}` listed twice"
                )));
            }
            set.insert(label);
        }
        Ok(set)
    }

    /// Insert a label if absent and return its id.
    pub fn insert(&mut self, label: impl Into<String>) -> usize {
        let label = label.into();
        if let Some(&id) = self.ids.get(&label) {
            return id;
        }
        let id = self.labels.len();
        self.ids.insert(label.clone(), id);
        self.labels.push(label);
        id
    }

    pub fn id(&self, label: &str) -> Option<usize> {
        self.ids.get(label).copied()
    }

    pub fn label(&self, id: usize) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    /// Parameter row of a label; `None` for `<eps>` and unknown labels.
    pub fn index(&self, label: &str) -> Option<usize> {
        match self.id(label) {
            Some(0) | None => None,
            Some(id) => Some(id - 1),
        }
    }

    /// Number of real labels, `<eps>` excluded.
    pub fn len(&self) -> usize {
        self.labels.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Real labels in id order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels[1..].iter().map(String::as_str)
    }
}

impl TryFrom<Vec<String>> for LabelSet {
    type Error = ScrfError;

    fn try_from(labels: Vec<String>) -> Result<Self> {
        Self::from_labels(labels)
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(mut set: LabelSet) -> Self {
        set.labels.split_off(1)
    }
}
