//! Ordered set of target class names.

use serde::{Deserialize, Serialize};

use crate::error::{CharLstmError, Result};

/// The fixed, ordered set of labels a classifier predicts.
///
/// Output column `i` of the network corresponds to `names()[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct LabelSet {
    names: Vec<String>,
}

impl LabelSet {
    /// Build a label set, dropping duplicates while keeping first-seen order.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        if unique.is_empty() {
            return Err(CharLstmError::EmptyLabelSet);
        }
        Ok(Self { names: unique })
    }

    /// Position of `name` in the set.
    pub fn index(&self, name: &str) -> Result<usize> {
        self.names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| CharLstmError::UnknownLabel(name.to_string()))
    }

    /// Map a slice of label names to indices, failing on the first unknown.
    pub fn indices<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<u32>> {
        names
            .iter()
            .map(|n| self.index(n.as_ref()).map(|i| i as u32))
            .collect()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl TryFrom<Vec<String>> for LabelSet {
    type Error = CharLstmError;

    fn try_from(names: Vec<String>) -> Result<Self> {
        Self::new(names)
    }
}

impl From<LabelSet> for Vec<String> {
    fn from(labels: LabelSet) -> Self {
        labels.names
    }
}
