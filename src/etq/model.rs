use derive_more::{AsRef, Deref, Display, From, Into, IntoIterator};
use serde::{Deserialize, Serialize};

use super::error::{DedupError, Result};

/// One entry of normalized input: a stable identifier and the exact text
/// to embed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{id}: {text}")]
pub struct NormalizedItem {
    /// Identifier carried over from the input, or the positional index.
    pub id: String,

    /// The string handed to the embedding provider, verbatim.
    pub text: String,
}

impl NormalizedItem {
    pub fn new<I, T>(id: I, text: T) -> Self
    where
        I: Into<String>,
        T: Into<String>,
    {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Ordered output of the normalizer. Same length and order as the input.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, From, Into, IntoIterator, Deref, AsRef,
)]
#[into_iterator(owned, ref)]
#[serde(transparent)]
pub struct NormalizedItems(Vec<NormalizedItem>);

impl NormalizedItems {
    /// The texts, in input order.
    pub fn texts(&self) -> Vec<&str> {
        self.0.iter().map(|i| i.text.as_str()).collect()
    }

    /// The ids, in input order.
    pub fn ids(&self) -> Vec<&str> {
        self.0.iter().map(|i| i.id.as_str()).collect()
    }
}

impl FromIterator<NormalizedItem> for NormalizedItems {
    fn from_iter<T: IntoIterator<Item = NormalizedItem>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A connected component of near-duplicate items.
///
/// Members are listed in input order. Membership is the transitive closure
/// of pairwise similarity at or above the threshold, so two members may be
/// less similar than the threshold to each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Positions of the members in the input.
    pub indices: Vec<usize>,

    /// The member items, parallel to `indices`.
    pub members: Vec<NormalizedItem>,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Member texts in input order, duplicates included.
    pub fn texts(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.text.as_str()).collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.id.as_str()).collect()
    }

    /// The member whose position in the input comes first.
    pub fn first(&self) -> Option<&NormalizedItem> {
        self.members.first()
    }
}

/// Groups ordered by descending size, then by the input position of each
/// group's first member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, From, Into, IntoIterator, Deref)]
#[into_iterator(owned, ref)]
#[serde(transparent)]
pub struct DuplicateGroups(Vec<DuplicateGroup>);

impl DuplicateGroups {
    /// Total number of items that belong to some group.
    pub fn num_grouped(&self) -> usize {
        self.0.iter().map(DuplicateGroup::len).sum()
    }
}

impl std::fmt::Display for DuplicateGroups {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (n, group) in self.0.iter().enumerate() {
            writeln!(f, "Group {} ({})", n, group.len())?;
            for member in &group.members {
                writeln!(f, "  - {}", member.text)?;
            }
        }
        Ok(())
    }
}

/// Cosine similarity threshold for near-duplicate merging. Comparison is
/// inclusive: pairs at exactly the threshold merge.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Into, AsRef, Deref, Serialize, Deserialize, Display)]
pub struct SimilarityThreshold(f32);

impl SimilarityThreshold {
    pub const MIN: SimilarityThreshold = SimilarityThreshold(-1.0);
    pub const MAX: SimilarityThreshold = SimilarityThreshold(1.0);
    pub const DEFAULT: SimilarityThreshold = SimilarityThreshold(0.9);

    /// Check that `value` is finite and within `[MIN, MAX]`.
    pub fn try_new(value: f32) -> Result<Self> {
        if value.is_finite() && (Self::MIN.0..=Self::MAX.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(DedupError::InvalidParameter(format!(
                "threshold {} must be a finite value in {}..={}",
                value,
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn value(&self) -> f32 {
        self.0
    }

    /// Inclusive comparison against a similarity score.
    pub fn admits(&self, similarity: f32) -> bool {
        similarity >= self.0
    }
}

impl Default for SimilarityThreshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<f32> for SimilarityThreshold {
    type Error = DedupError;

    fn try_from(value: f32) -> std::result::Result<Self, Self::Error> {
        Self::try_new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_checked() {
        assert!(SimilarityThreshold::try_new(0.9).is_ok());
        assert!(SimilarityThreshold::try_new(SimilarityThreshold::MIN.into()).is_ok());
        assert!(SimilarityThreshold::try_new(SimilarityThreshold::MAX.into()).is_ok());
        assert!(SimilarityThreshold::try_new(1.01).is_err());
        assert!(SimilarityThreshold::try_new(-1.5).is_err());
        assert!(SimilarityThreshold::try_new(f32::NAN).is_err());
        assert!(SimilarityThreshold::try_new(f32::INFINITY).is_err());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let t = SimilarityThreshold::try_new(0.5).unwrap();
        assert!(t.admits(0.5));
        assert!(t.admits(0.75));
        assert!(!t.admits(0.4999));
    }

    #[test]
    fn test_group_accessors() {
        let group = DuplicateGroup {
            indices: vec![0, 2],
            members: vec![
                NormalizedItem::new("a", "cost overrun"),
                NormalizedItem::new("c", "cost overruns"),
            ],
        };
        assert_eq!(group.len(), 2);
        assert_eq!(group.texts(), vec!["cost overrun", "cost overruns"]);
        assert_eq!(group.ids(), vec!["a", "c"]);
        assert_eq!(group.first().map(|m| m.id.as_str()), Some("a"));

        let groups = DuplicateGroups::from(vec![group]);
        assert_eq!(groups.num_grouped(), 2);
        assert_eq!(
            groups.to_string(),
            "Group 0 (2)\n  - cost overrun\n  - cost overruns\n"
        );
    }
}
