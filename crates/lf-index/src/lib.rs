#![forbid(unsafe_code)]

use std::cell::OnceCell;
use std::collections::HashMap;

use lf_types::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("label {label:?} not found in index")]
    LabelNotFound { label: String },
    #[error("position {position} out of bounds for length {len}")]
    OutOfBounds { position: usize, len: usize },
}

impl IndexError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LabelNotFound { .. } => ErrorKind::LabelNotFound,
            Self::OutOfBounds { .. } => ErrorKind::IndexOutOfRange,
        }
    }
}

/// Ordered row labels shared by every column of a table.
///
/// Labels need not be unique. Lookups resolve to the first occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    labels: Vec<String>,
    #[serde(skip)]
    duplicate_cache: OnceCell<bool>,
    #[serde(skip)]
    first_position_cache: OnceCell<HashMap<String, usize>>,
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
    }
}

impl Eq for Index {}

impl<S: Into<String>> FromIterator<S> for Index {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

fn first_positions(labels: &[String]) -> HashMap<String, usize> {
    let mut map = HashMap::with_capacity(labels.len());
    for (position, label) in labels.iter().enumerate() {
        map.entry(label.clone()).or_insert(position);
    }
    map
}

impl Index {
    #[must_use]
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            duplicate_cache: OnceCell::new(),
            first_position_cache: OnceCell::new(),
        }
    }

    /// Default positional labels `"0".."len-1"`.
    #[must_use]
    pub fn range(len: usize) -> Self {
        Self::new((0..len).map(|i| i.to_string()).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn into_labels(self) -> Vec<String> {
        self.labels
    }

    pub fn label_at(&self, position: usize) -> Result<&str, IndexError> {
        self.labels
            .get(position)
            .map(String::as_str)
            .ok_or(IndexError::OutOfBounds {
                position,
                len: self.labels.len(),
            })
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        *self
            .duplicate_cache
            .get_or_init(|| first_positions(&self.labels).len() != self.labels.len())
    }

    /// Position of the first occurrence of `label`.
    ///
    /// The label map is built on the first call so repeated lookups are O(1).
    #[must_use]
    pub fn position(&self, label: &str) -> Option<usize> {
        self.first_position_cache
            .get_or_init(|| first_positions(&self.labels))
            .get(label)
            .copied()
    }

    pub fn get_loc(&self, label: &str) -> Result<usize, IndexError> {
        self.position(label).ok_or_else(|| IndexError::LabelNotFound {
            label: label.to_owned(),
        })
    }

    /// Every position holding `label`, in index order.
    #[must_use]
    pub fn positions_of(&self, label: &str) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter_map(|(i, l)| (l == label).then_some(i))
            .collect()
    }

    pub fn take(&self, positions: &[usize]) -> Result<Self, IndexError> {
        let mut labels = Vec::with_capacity(positions.len());
        for &position in positions {
            labels.push(self.label_at(position)?.to_owned());
        }
        Ok(Self::new(labels))
    }

    /// Contiguous slice `[start, start+len)`, truncated at the end of the index.
    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> Self {
        let start = start.min(self.labels.len());
        let end = start.saturating_add(len).min(self.labels.len());
        Self::new(self.labels[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use lf_types::ErrorKind;

    use super::{Index, IndexError};

    #[test]
    fn range_builds_positional_labels() {
        let index = Index::range(3);
        assert_eq!(index.labels(), &["0", "1", "2"]);
        assert!(!index.has_duplicates());
    }

    #[test]
    fn duplicate_labels_resolve_to_first_match() {
        let index: Index = ["a", "b", "a"].into_iter().collect();
        assert!(index.has_duplicates());
        assert_eq!(index.position("a"), Some(0));
        assert_eq!(index.positions_of("a"), vec![0, 2]);
    }

    #[test]
    fn missing_label_reports_label_not_found() {
        let index = Index::range(2);
        let err = index.get_loc("x").expect_err("absent label");
        assert_eq!(
            err,
            IndexError::LabelNotFound {
                label: "x".to_owned()
            }
        );
        assert_eq!(err.kind(), ErrorKind::LabelNotFound);
    }

    #[test]
    fn take_rejects_out_of_bounds_positions() {
        let index = Index::range(2);
        let err = index.take(&[0, 5]).expect_err("out of bounds");
        assert_eq!(err.kind(), ErrorKind::IndexOutOfRange);
        assert_eq!(
            index.take(&[1, 0]).expect("take").labels(),
            &["1", "0"]
        );
    }

    #[test]
    fn slice_truncates_at_end() {
        let index = Index::range(5);
        assert_eq!(index.slice(3, 10).labels(), &["3", "4"]);
        assert!(index.slice(9, 2).is_empty());
    }

    #[test]
    fn equality_ignores_caches() {
        let left = Index::range(3);
        let right = Index::range(3);
        let _ = left.position("1");
        assert_eq!(left, right);
    }
}
